pub(crate) fn now_ms() -> i64 {
    js_sys::Date::now().round() as i64
}
