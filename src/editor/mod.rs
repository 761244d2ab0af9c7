//! Page-level controller: boots the session from fetched content and drafts,
//! wires the global listeners and runs the save flow.

use crate::api::{ApiClient, ApiResult};
use crate::config::EditorConfig;
use crate::content;
use crate::dom::{document, ADD_CONTROL_ATTR, TEMPLATE_ATTR};
use crate::drafts::{capture_draft, restore_draft, DraftError, DraftStore};
use crate::instances;
use crate::models::{BatchUpdate, OrderValue};
use crate::session::{EditorSession, SessionEvent};
use crate::templates;
use leptos::ev;
use leptos::prelude::*;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use web_sys::Element;

const DRAFT_DEBOUNCE_MS: i32 = 800;

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct Editor {
    session: Rc<RefCell<EditorSession>>,
    api: ApiClient,
    drafts: DraftStore,
    config: EditorConfig,

    /// Global listeners (keep handles alive).
    handles: Rc<RefCell<Vec<WindowListenerHandle>>>,
    draft_timer: Rc<Cell<Option<i32>>>,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        let api = ApiClient::load_from_storage(config.api_url.clone(), config.site_id.clone());
        let drafts = DraftStore::new(config.draft_key.clone());
        Self {
            session: Rc::new(RefCell::new(EditorSession::new())),
            api,
            drafts,
            config,
            handles: Rc::new(RefCell::new(Vec::new())),
            draft_timer: Rc::new(Cell::new(None)),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Borrow the session. Callers must not re-enter the editor from `f`.
    pub fn with_session<R>(&self, f: impl FnOnce(&EditorSession) -> R) -> R {
        f(&self.session.borrow())
    }

    /// Fetch the page content and bootstrap the DOM from it.
    pub async fn load(&self) -> ApiResult<()> {
        let fetched = self.api.fetch_content(&self.config.page_path).await?;
        self.bootstrap(fetched.flatten());
        Ok(())
    }

    /// Order matters: instances must exist at their final count before the
    /// editable scan runs, and drafted orders are reconciled before any
    /// drafted content is applied.
    pub fn bootstrap(&self, fetched: BTreeMap<String, String>) {
        let Some(root) = document().and_then(|d| d.document_element()) else {
            tracing::error!("no document to edit");
            return;
        };

        let mut session = self.session.borrow_mut();
        session.seed_content(fetched);

        let templates = templates::scan(&mut session, &root);
        materialize_all(&mut session);

        if let Some(draft) = self.drafts.load() {
            restore_draft(&mut session, &draft);
        }

        let keys = content::scan_editables(&mut session, &root);
        let applied = content::apply_all(&mut session);
        tracing::info!(
            page = %self.config.page_path,
            templates,
            keys,
            applied,
            "editor ready"
        );
    }

    /// Register the page-wide listeners.
    pub fn start(&self) {
        let input = {
            let editor = self.clone();
            window_event_listener(ev::input, move |e| {
                let Some(target) = e.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
                    return;
                };
                let changed = content::handle_input(&mut editor.session.borrow_mut(), &target);
                if changed {
                    editor.schedule_draft();
                }
            })
        };

        let click = {
            let editor = self.clone();
            window_event_listener(ev::click, move |e| {
                let Some(target) = e.target().and_then(|t| t.dyn_into::<Element>().ok()) else {
                    return;
                };
                let selector = format!("[{ADD_CONTROL_ATTR}]");
                let Some(control) = target.closest(&selector).ok().flatten() else {
                    return;
                };
                let template_id = control
                    .parent_element()
                    .and_then(|c| c.get_attribute(TEMPLATE_ATTR));
                if let Some(template_id) = template_id {
                    e.prevent_default();
                    editor.add_instance(&template_id);
                }
            })
        };

        let pagehide = {
            let editor = self.clone();
            window_event_listener(ev::pagehide, move |_ev: web_sys::PageTransitionEvent| {
                if let Err(e) = editor.persist_draft() {
                    tracing::warn!(error = %e, "could not persist draft on page hide");
                }
            })
        };

        self.handles.borrow_mut().extend([input, click, pagehide]);
    }

    /// Remove the global listeners and any pending draft write.
    pub fn teardown(&self) {
        for handle in self.handles.borrow_mut().drain(..) {
            handle.remove();
        }
        self.clear_draft_timer();
    }

    /// Listeners run inside editor operations. They read state through the
    /// session they are given and must not call back into the editor.
    pub fn subscribe(&self, listener: impl FnMut(&SessionEvent, &EditorSession) + 'static) {
        self.session.borrow_mut().subscribe(listener);
    }

    // ---- editing operations ----

    pub fn set_content(&self, key: &str, json: &str) -> usize {
        let n = content::set_content(&mut self.session.borrow_mut(), key, json);
        self.schedule_draft();
        n
    }

    pub fn add_instance(&self, template_id: &str) -> Option<String> {
        let id = instances::add_instance(&mut self.session.borrow_mut(), template_id, None);
        if id.is_some() {
            self.schedule_draft();
        }
        id
    }

    pub fn remove_instance(&self, template_id: &str, instance_id: &str) -> bool {
        let removed =
            instances::remove_instance(&mut self.session.borrow_mut(), template_id, instance_id);
        if removed {
            self.schedule_draft();
        }
        removed
    }

    pub fn reorder(&self, template_id: &str, order: &[String]) -> bool {
        let done = instances::reorder(&mut self.session.borrow_mut(), template_id, order);
        if done {
            self.schedule_draft();
        }
        done
    }

    pub fn move_instance(&self, template_id: &str, instance_id: &str, to_index: usize) -> bool {
        let done = instances::move_instance(
            &mut self.session.borrow_mut(),
            template_id,
            instance_id,
            to_index,
        );
        if done {
            self.schedule_draft();
        }
        done
    }

    pub fn instance_position(&self, template_id: &str, instance_id: &str) -> Option<(usize, usize)> {
        self.session
            .borrow()
            .instance_position(template_id, instance_id)
    }

    // ---- drafts ----

    /// Write (or clear) the local draft right away.
    pub fn persist_draft(&self) -> Result<(), DraftError> {
        self.clear_draft_timer();
        let draft = capture_draft(&self.session.borrow());
        match draft {
            Some(draft) => {
                self.drafts.save(&draft)?;
                tracing::debug!(keys = draft.content.len(), "draft saved");
            }
            None => self.drafts.clear(),
        }
        Ok(())
    }

    fn clear_draft_timer(&self) {
        if let (Some(tid), Some(win)) = (self.draft_timer.take(), web_sys::window()) {
            win.clear_timeout_with_handle(tid);
        }
    }

    fn schedule_draft(&self) {
        if !self.config.autosave_draft {
            return;
        }
        let Some(win) = web_sys::window() else {
            return;
        };
        self.clear_draft_timer();

        let editor = self.clone();
        let cb = wasm_bindgen::closure::Closure::once_into_js(move || {
            editor.draft_timer.set(None);
            if let Err(e) = editor.persist_draft() {
                tracing::warn!(error = %e, "could not persist draft");
            }
        });

        let tid = win
            .set_timeout_with_callback_and_timeout_and_arguments_0(
                cb.as_ref().unchecked_ref(),
                DRAFT_DEBOUNCE_MS,
            )
            .unwrap_or(0);
        self.draft_timer.set(Some(tid));
    }

    // ---- saving ----

    /// Send pending changes. Returns the number of keys written.
    ///
    /// On failure the working content is left as is so the save can be
    /// retried. A save cancelled while in flight is ignored on completion.
    pub async fn save(&self) -> ApiResult<usize> {
        let Some(ticket) = self.session.borrow_mut().begin_save() else {
            return Ok(0);
        };
        if !self.api.is_authenticated() {
            tracing::warn!("saving without a sign-in token");
        }
        let update = BatchUpdate {
            page: self.config.page_path.clone(),
            content: ticket.changes.clone(),
        };

        let response = match self.api.patch_content(&update).await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, keys = update.content.len(), "save failed");
                return Err(e);
            }
        };

        let written = response.saved.len() + response.deleted.len();
        let applied = self.session.borrow_mut().complete_save(&ticket, response);
        if !applied {
            return Ok(0);
        }
        if let Err(e) = self.persist_draft() {
            tracing::warn!(error = %e, "could not refresh draft after save");
        }
        tracing::info!(keys = written, "saved");
        Ok(written)
    }

    pub fn cancel_save(&self) {
        self.session.borrow_mut().cancel_save();
    }

    pub fn has_pending_changes(&self) -> bool {
        self.session.borrow().has_pending_changes()
    }
}

/// Give every template its initial instances: the stored order when there
/// is one, otherwise the author's markup as-is.
pub fn materialize_all(session: &mut EditorSession) {
    let plans: Vec<(String, Option<Vec<String>>)> = session
        .templates()
        .map(|t| {
            let order = session
                .current(&t.order_key())
                .and_then(OrderValue::parse);
            (t.template_id.clone(), order)
        })
        .collect();

    for (template_id, order) in plans {
        match order {
            Some(ids) => {
                instances::materialize(session, &template_id, &ids);
            }
            None => {
                instances::adopt_existing(session, &template_id);
            }
        }
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use crate::dom::query_all;
    use crate::dom::test_support::fixture;
    use crate::models::BatchUpdateResponse;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    const PAGE: &str = r#"<h1 data-scms-text="headline">Hello</h1>
      <ul data-scms-template="features">
        <li><span data-scms-text="label">One</span></li>
        <li><span data-scms-text="label">Two</span></li>
      </ul>"#;

    fn test_config(draft_key: &str) -> EditorConfig {
        EditorConfig {
            draft_key: draft_key.to_string(),
            autosave_draft: false,
            ..EditorConfig::default()
        }
    }

    #[wasm_bindgen_test]
    fn test_bootstrap_materializes_stored_order() {
        let root = fixture(PAGE);
        let editor = Editor::new(test_config("scms_test_draft_order"));
        editor.drafts.clear();

        let mut fetched = BTreeMap::new();
        fetched.insert("headline".to_string(), r#"{"type":"text","value":"Welcome"}"#.to_string());
        fetched.insert(
            "features._order".to_string(),
            r#"{"type":"order","value":["f1","f2","f3"]}"#.to_string(),
        );
        fetched.insert(
            "features.f2.label".to_string(),
            r#"{"type":"text","value":"Fast"}"#.to_string(),
        );
        editor.bootstrap(fetched);

        let ids: Vec<String> = query_all(&root, "[data-scms-instance]")
            .iter()
            .filter_map(|e| e.get_attribute("data-scms-instance"))
            .collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);

        let label = root
            .query_selector("[data-scms-instance=\"f2\"] span")
            .expect("query")
            .expect("label");
        assert_eq!(label.text_content().unwrap_or_default(), "Fast");
        assert!(!editor.has_pending_changes());
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_bootstrap_adopts_markup_without_order() {
        let root = fixture(PAGE);
        let editor = Editor::new(test_config("scms_test_draft_adopt"));
        editor.drafts.clear();
        editor.bootstrap(BTreeMap::new());

        let (count, order_key) = editor.with_session(|s| {
            let t = s.template("features").expect("features");
            (t.instance_count(), t.order_key())
        });
        assert_eq!(count, 2);
        assert!(editor.with_session(|s| s.current(&order_key).is_some()));
        root.remove();
    }

    fn labels(root: &Element) -> Vec<String> {
        query_all(root, "[data-scms-instance] [data-scms-text]")
            .iter()
            .map(|e| e.text_content().unwrap_or_default())
            .collect()
    }

    #[wasm_bindgen_test]
    fn test_adopted_labels_survive_save_and_reload() {
        let root = fixture(PAGE);
        let editor = Editor::new(test_config("scms_test_draft_adopt_save"));
        editor.drafts.clear();
        editor.bootstrap(BTreeMap::new());

        // Stand-in for the server: accept everything the save sends.
        let stored = {
            let mut session = editor.session.borrow_mut();
            let ticket = session.begin_save().expect("adopted order is pending");
            let saved: BTreeMap<String, String> = ticket
                .changes
                .iter()
                .filter_map(|(k, v)| Some((k.clone(), v.clone()?)))
                .collect();
            assert_eq!(saved.len(), ticket.changes.len());
            assert!(session.complete_save(
                &ticket,
                BatchUpdateResponse {
                    saved: saved.clone(),
                    deleted: vec![],
                },
            ));
            saved
        };
        assert!(!editor.has_pending_changes());
        assert!(stored.contains_key("features._order"));
        root.remove();

        let root = fixture(PAGE);
        let editor = Editor::new(test_config("scms_test_draft_adopt_save"));
        editor.bootstrap(stored);
        assert_eq!(labels(&root), vec!["One", "Two"]);
        assert!(!editor.has_pending_changes());
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_listener_reads_position_of_added_instance() {
        let root = fixture(PAGE);
        let editor = Editor::new(test_config("scms_test_draft_listener"));
        editor.drafts.clear();
        editor.bootstrap(BTreeMap::new());

        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();
        editor.subscribe(move |ev, session| {
            if let SessionEvent::InstanceAdded {
                template_id,
                instance_id,
            } = ev
            {
                *seen2.borrow_mut() = session.instance_position(template_id, instance_id);
            }
        });

        let id = editor.add_instance("features").expect("added");
        assert_eq!(*seen.borrow(), Some((3, 3)));
        assert_eq!(editor.instance_position("features", &id), Some((3, 3)));
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_draft_survives_reload() {
        let key = "scms_test_draft_reload";
        let root = fixture(PAGE);
        let editor = Editor::new(test_config(key));
        editor.drafts.clear();
        editor.bootstrap(BTreeMap::new());
        editor.set_content("headline", r#"{"type":"text","value":"Draft"}"#);
        editor.persist_draft().expect("draft written");
        root.remove();

        let root = fixture(PAGE);
        let editor = Editor::new(test_config(key));
        editor.bootstrap(BTreeMap::new());
        let h1 = root.query_selector("h1").expect("query").expect("h1");
        assert_eq!(h1.text_content().unwrap_or_default(), "Draft");
        // The drafted order replaces the freshly adopted ids; labels come along.
        assert_eq!(labels(&root), vec!["One", "Two"]);
        editor.drafts.clear();
        root.remove();
    }
}
