//! In-page content editing for static HTML.
//!
//! Editable nodes are declared with `data-scms-*` attributes. Every editable
//! node gets a storage key derived from the groups and templates around it;
//! template instances can be added, removed and reordered, and content shared
//! through a group stays in sync across every node that shows it.

pub mod api;
pub mod config;
pub mod content;
pub mod dom;
pub mod drafts;
pub mod editor;
pub mod instances;
pub mod keys;
pub mod logging;
pub mod models;
pub mod session;
mod storage;
pub mod templates;
mod util;

pub use config::EditorConfig;
pub use editor::Editor;
pub use session::{EditorSession, SessionEvent};

use leptos::task::spawn_local;

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;

// Only register the WASM start function for normal builds (not for tests),
// otherwise wasm-bindgen-test will end up with multiple entry symbols.
#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();

    let config = EditorConfig::new();
    logging::init(&config.log_level);
    tracing::debug!(site = %config.site_id, page = %config.page_path, "starting editor");

    let editor = Editor::new(config);
    spawn_local(async move {
        match editor.load().await {
            Ok(()) => editor.start(),
            Err(e) => tracing::error!(kind = ?e.kind, error = %e, "could not load page content"),
        }
    });
}
