use crate::drafts::DraftError;
use serde::{Deserialize, Serialize};

pub(crate) const TOKEN_KEY: &str = "scms_token";

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window().and_then(|w| w.local_storage().ok().flatten())
}

pub(crate) fn load_string_from_storage(key: &str) -> Option<String> {
    local_storage()?.get_item(key).ok().flatten()
}

pub(crate) fn load_json_from_storage<T: for<'de> Deserialize<'de>>(key: &str) -> Option<T> {
    let json = load_string_from_storage(key)?;
    match serde_json::from_str(&json) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "discarding unreadable stored value");
            None
        }
    }
}

pub(crate) fn save_json_to_storage<T: Serialize>(key: &str, value: &T) -> Result<(), DraftError> {
    let json = serde_json::to_string(value).map_err(DraftError::Serialize)?;
    let storage = local_storage().ok_or(DraftError::StorageUnavailable)?;
    storage
        .set_item(key, &json)
        .map_err(|e| DraftError::Write(format!("{e:?}")))
}

pub(crate) fn remove_from_storage(key: &str) {
    if let Some(storage) = local_storage() {
        let _ = storage.remove_item(key);
    }
}
