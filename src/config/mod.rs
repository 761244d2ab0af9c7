use serde::{Deserialize, Serialize};

pub const DEFAULT_API_URL: &str = "http://localhost:8787";
pub const DEFAULT_SITE_ID: &str = "default";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EditorConfig {
    pub api_url: String,
    pub site_id: String,
    /// Page the content belongs to; defaults to `location.pathname`.
    pub page_path: String,
    pub draft_key: String,
    /// Persist a local draft shortly after each edit, not only on page hide.
    pub autosave_draft: bool,
    pub log_level: String,
}

fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "info"
    } else {
        "warn"
    }
}

pub fn draft_key_for(site_id: &str, page_path: &str) -> String {
    format!("scms_draft::{site_id}::{page_path}")
}

impl EditorConfig {
    /// Read `window.SCMS`, falling back to `window.ENV`. Both `API_URL` and
    /// `api_url` spellings are accepted.
    pub fn new() -> Self {
        let window = web_sys::window();
        let page_path = window
            .as_ref()
            .and_then(|w| w.location().pathname().ok())
            .unwrap_or_else(|| "/".to_string());

        let sources: Vec<wasm_bindgen::JsValue> = window
            .as_ref()
            .map(|w| {
                ["SCMS", "ENV"]
                    .iter()
                    .filter_map(|name| w.get(name))
                    .map(wasm_bindgen::JsValue::from)
                    .filter(|v| !v.is_undefined() && v.is_object())
                    .collect()
            })
            .unwrap_or_default();

        Self::from_lookup(&page_path, |name| {
            sources.iter().find_map(|obj| {
                let v = js_sys::Reflect::get(obj, &name.into()).ok()?;
                v.as_string().or_else(|| v.as_bool().map(|b| b.to_string()))
            })
        })
    }

    /// Build from a name -> value lookup. Each setting is tried in its
    /// upper-case then lower-case spelling.
    pub fn from_lookup(page_path: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |upper: &str, lower: &str| {
            lookup(upper)
                .or_else(|| lookup(lower))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let api_url = get("API_URL", "api_url").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let site_id = get("SITE_ID", "site_id").unwrap_or_else(|| DEFAULT_SITE_ID.to_string());
        let page_path = get("PAGE", "page").unwrap_or_else(|| page_path.to_string());
        let draft_key =
            get("DRAFT_KEY", "draft_key").unwrap_or_else(|| draft_key_for(&site_id, &page_path));
        let autosave_draft = get("AUTOSAVE_DRAFT", "autosave_draft")
            .map_or(true, |v| !matches!(v.as_str(), "false" | "0" | "off"));
        let log_level = get("SCMS_LOG", "log").unwrap_or_else(|| default_log_level().to_string());

        Self {
            api_url,
            site_id,
            page_path,
            draft_key,
            autosave_draft,
            log_level,
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self::from_lookup("/", |_| None)
    }
}
