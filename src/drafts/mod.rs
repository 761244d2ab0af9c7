//! Local drafts: what gets captured on unclean exit, and how a captured draft
//! is replayed onto a freshly loaded page.

use crate::content;
use crate::instances;
use crate::keys::{is_order_key, parse_key};
use crate::models::OrderValue;
use crate::session::{pending_for, EditorSession, SessionEvent};
use crate::storage::{load_json_from_storage, remove_from_storage, save_json_to_storage};
use crate::util::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DraftError {
    #[error("local storage is not available")]
    StorageUnavailable,
    #[error("failed to serialize draft: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write draft: {0}")]
    Write(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DraftBlob {
    pub content: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted: Vec<String>,
    #[serde(default)]
    pub saved_ms: i64,
}

impl DraftBlob {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.deleted.is_empty()
    }
}

/// One draft slot in local storage.
#[derive(Clone, Debug)]
pub struct DraftStore {
    key: String,
}

impl DraftStore {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> Option<DraftBlob> {
        load_json_from_storage::<DraftBlob>(&self.key).filter(|d| !d.is_empty())
    }

    pub fn save(&self, draft: &DraftBlob) -> Result<(), DraftError> {
        save_json_to_storage(&self.key, draft)
    }

    pub fn clear(&self) {
        remove_from_storage(&self.key);
    }
}

/// Instance ids to add and remove to turn `live` into `target`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub to_add: Vec<String>,
    pub to_remove: Vec<String>,
}

pub fn plan_reconcile(live: &[String], target: &[String]) -> ReconcilePlan {
    let mut to_add: Vec<String> = Vec::new();
    for id in target {
        if !id.trim().is_empty() && !live.contains(id) && !to_add.contains(id) {
            to_add.push(id.clone());
        }
    }

    let mut to_remove: Vec<String> = live
        .iter()
        .filter(|id| !target.contains(id))
        .cloned()
        .collect();

    // Never plan the template down to zero instances.
    if to_add.is_empty() && to_remove.len() == live.len() && !to_remove.is_empty() {
        to_remove.remove(0);
    }

    ReconcilePlan { to_add, to_remove }
}

/// Bring live instances in line with the `_order` entries of `entries`. Must
/// run before content is applied: content addresses instances by id.
/// Returns the number of templates touched.
pub fn reconcile(session: &mut EditorSession, entries: &BTreeMap<String, String>) -> usize {
    let mut touched = 0;
    for (key, raw) in entries.iter().filter(|(k, _)| is_order_key(k)) {
        let parsed = parse_key(key);
        let Some(template_id) = parsed.template_id else {
            continue;
        };
        let Some(live) = session.template(template_id).map(|t| t.instance_ids.clone()) else {
            tracing::warn!(key = %key, "draft order for an unknown template");
            continue;
        };
        let Some(target) = OrderValue::parse(raw) else {
            tracing::warn!(key = %key, "ignoring malformed draft order");
            continue;
        };

        let plan = plan_reconcile(&live, &target);
        tracing::debug!(
            template_id = %template_id,
            add = plan.to_add.len(),
            remove = plan.to_remove.len(),
            "reconciling draft order"
        );

        // Adds first, so removals can never hit the floor while the target
        // still has instances to offer.
        for id in plan.to_add {
            instances::add_instance(session, template_id, Some(id));
        }
        for id in &plan.to_remove {
            instances::remove_instance(session, template_id, id);
        }
        instances::reorder(session, template_id, &target);
        touched += 1;
    }
    touched
}

/// Decide which keys a draft must carry: the same set a save would send,
/// split into values and deletions.
pub fn select_draft_content(
    original: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    saved_keys: &BTreeSet<String>,
    changed_templates: &BTreeMap<String, BTreeSet<String>>,
) -> DraftBlob {
    let mut draft = DraftBlob::default();
    for (key, value) in pending_for(original, current, saved_keys, changed_templates) {
        match value {
            Some(value) => {
                draft.content.insert(key, value);
            }
            None => draft.deleted.push(key),
        }
    }
    draft
}

/// Snapshot the session for local persistence. `None` when nothing is pending.
pub fn capture_draft(session: &EditorSession) -> Option<DraftBlob> {
    let mut draft = select_draft_content(
        session.original_content(),
        session.current_content(),
        session.saved_content_keys(),
        &session.changed_templates(),
    );
    if draft.is_empty() {
        return None;
    }
    draft.saved_ms = now_ms();
    Some(draft)
}

/// Replay a draft: instance orders first, then content, then deletions.
pub fn restore_draft(session: &mut EditorSession, draft: &DraftBlob) {
    let templates = reconcile(session, &draft.content);

    let mut applied = 0;
    for (key, value) in draft.content.iter().filter(|(k, _)| !is_order_key(k)) {
        content::set_content(session, key, value);
        applied += 1;
    }

    for key in &draft.deleted {
        if session.remove_current(key).is_some() {
            session.emit(SessionEvent::ContentChanged { key: key.clone() });
        }
    }

    tracing::info!(
        templates,
        keys = applied,
        deleted = draft.deleted.len(),
        "restored local draft"
    );
    session.emit(SessionEvent::DraftRestored);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_plan_adds_missing_and_removes_extra() {
        let plan = plan_reconcile(&ids(&["a", "b"]), &ids(&["b", "c"]));
        assert_eq!(plan.to_add, ids(&["c"]));
        assert_eq!(plan.to_remove, ids(&["a"]));
    }

    #[test]
    fn test_plan_keeps_one_instance_for_empty_target() {
        let plan = plan_reconcile(&ids(&["a", "b", "c"]), &[]);
        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, ids(&["b", "c"]));
    }

    #[test]
    fn test_plan_ignores_blank_and_duplicate_ids() {
        let plan = plan_reconcile(&ids(&["a"]), &ids(&["a", "", "q", "q"]));
        assert_eq!(plan.to_add, ids(&["q"]));
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_select_changed_and_deleted_keys() {
        let original = map(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let current = map(&[("a", "1"), ("b", "20"), ("d", "4")]);
        let saved: BTreeSet<String> = original.keys().cloned().collect();

        let draft = select_draft_content(&original, &current, &saved, &BTreeMap::new());
        assert_eq!(draft.content, map(&[("b", "20"), ("d", "4")]));
        assert_eq!(draft.deleted, ids(&["c"]));
    }

    #[test]
    fn test_select_unsaved_instance_content_of_reordered_template() {
        let original = map(&[("team._order", "old"), ("team.a.name", "A"), ("promo:title", "P")]);
        let current = map(&[
            ("team._order", "new"),
            ("team.a.name", "A"),
            ("team.n.name", "N"),
            ("promo:title", "P"),
            ("other.z.name", "Z"),
        ]);
        let saved = BTreeSet::from(["team._order".to_string(), "team.a.name".to_string()]);
        let mut changed = BTreeMap::new();
        changed.insert("team".to_string(), BTreeSet::from(["promo".to_string()]));

        let draft = select_draft_content(&original, &current, &saved, &changed);
        assert!(draft.content.contains_key("team._order"));
        // Unsaved instance content of the reordered template.
        assert!(draft.content.contains_key("team.n.name"));
        // Unsaved and unchanged, but nested in the reordered template.
        assert!(draft.content.contains_key("promo:title"));
        // Saved and unchanged.
        assert!(!draft.content.contains_key("team.a.name"));
        // Unrelated template: new key, so it is a change in its own right.
        assert!(draft.content.contains_key("other.z.name"));
    }

    #[test]
    fn test_select_skips_saved_unchanged_keys_of_reordered_template() {
        let original = map(&[("team.a.name", "A"), ("team.b.name", "B")]);
        let current = original.clone();
        let saved = BTreeSet::from(["team.a.name".to_string()]);
        let mut changed = BTreeMap::new();
        changed.insert("team".to_string(), BTreeSet::new());

        let draft = select_draft_content(&original, &current, &saved, &changed);
        assert_eq!(draft.content, map(&[("team.b.name", "B")]));
    }

    #[test]
    fn test_select_drops_nothing_that_was_never_saved() {
        let original = map(&[("a", "1"), ("t.x.name", "X")]);
        let current = map(&[("t._order", "[]")]);
        let saved = BTreeSet::from(["a".to_string()]);

        let draft = select_draft_content(&original, &current, &saved, &BTreeMap::new());
        assert_eq!(draft.deleted, ids(&["a"]));
    }

    #[test]
    fn test_blob_tolerates_missing_fields() {
        let blob: DraftBlob = serde_json::from_str(r#"{"content":{"a":"1"}}"#).expect("blob");
        assert_eq!(blob.content.get("a").map(String::as_str), Some("1"));
        assert!(blob.deleted.is_empty());
        assert!(!blob.is_empty());
        assert!(DraftBlob::default().is_empty());
    }

    #[test]
    fn test_capture_nothing_pending() {
        let mut session = EditorSession::new();
        session.seed_content(map(&[("a", "1")]));
        assert!(capture_draft(&session).is_none());
    }
}
