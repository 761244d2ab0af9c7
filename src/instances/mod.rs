//! Template instance lifecycle: materialize, add, remove, reorder.
//!
//! Every operation on an unknown template is a logged no-op. A template never
//! drops below one live instance.

use crate::content;
use crate::dom::{
    add_control, find_instance, html_to_element, instance_children, query_all_inclusive,
    INSTANCE_ATTR,
};
use crate::keys::key_in_instance;
use crate::session::{EditorSession, SessionEvent};
use std::collections::BTreeSet;
use web_sys::Element;

pub const INSTANCE_ID_LEN: usize = 5;
const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const MAX_ID_ATTEMPTS: usize = 16;

/// Shown in freshly added image slots until an image is chosen.
pub const PLACEHOLDER_IMAGE: &str = "data:image/svg+xml,%3Csvg%20xmlns%3D%22http%3A%2F%2Fwww.w3.org%2F2000%2Fsvg%22%20width%3D%22400%22%20height%3D%22300%22%20viewBox%3D%220%200%20400%20300%22%3E%3Crect%20width%3D%22400%22%20height%3D%22300%22%20fill%3D%22%23e5e7eb%22%2F%3E%3Cpath%20d%3D%22M160%20180l30-40%2025%2030%2020-20%2035%2050H130z%22%20fill%3D%22%239ca3af%22%2F%3E%3Ccircle%20cx%3D%22170%22%20cy%3D%22120%22%20r%3D%2215%22%20fill%3D%22%239ca3af%22%2F%3E%3C%2Fsvg%3E";

/// A random 5-character `[a-z0-9]` id from the platform CSPRNG.
pub fn generate_instance_id() -> Result<String, getrandom::Error> {
    // 252 = 7 * 36: rejecting bytes above it keeps the alphabet unbiased.
    const LIMIT: u8 = 252;
    let mut out = String::with_capacity(INSTANCE_ID_LEN);
    let mut buf = [0u8; 16];
    while out.len() < INSTANCE_ID_LEN {
        getrandom::getrandom(&mut buf)?;
        for b in buf.iter().copied().filter(|b| *b < LIMIT) {
            out.push(ID_ALPHABET[(b % 36) as usize] as char);
            if out.len() == INSTANCE_ID_LEN {
                break;
            }
        }
    }
    Ok(out)
}

/// A generated id not present in `existing`.
pub fn unique_instance_id(existing: &[String]) -> Option<String> {
    for _ in 0..MAX_ID_ATTEMPTS {
        match generate_instance_id() {
            Ok(id) if !existing.contains(&id) => return Some(id),
            Ok(id) => tracing::debug!(instance_id = %id, "instance id collision, retrying"),
            Err(e) => {
                tracing::error!(error = %e, "random source unavailable");
                return None;
            }
        }
    }
    None
}

fn instantiate(template_html: &str, container: &Element, instance_id: &str) -> Option<Element> {
    let doc = container.owner_document()?;
    let el = html_to_element(&doc, template_html)?;
    el.set_attribute(INSTANCE_ATTR, instance_id).ok()?;
    Some(el)
}

fn insert_instance(container: &Element, el: &Element) {
    let anchor = add_control(container);
    let _ = container.insert_before(el, anchor.as_deref());
}

fn fill_image_placeholders(el: &Element) {
    for img in query_all_inclusive(el, "img[data-scms-image]") {
        let unset = img
            .get_attribute("src")
            .map_or(true, |src| src.trim().is_empty());
        if unset {
            let _ = img.set_attribute("src", PLACEHOLDER_IMAGE);
        }
    }
}

/// Tag existing container children that carry no instance id yet. Used when
/// no stored order exists; the author's markup becomes the first rendition.
pub fn adopt_existing(session: &mut EditorSession, template_id: &str) -> bool {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "adopt: unknown template");
        return false;
    };
    let container = info.container.clone();

    let mut ids: Vec<String> = Vec::new();
    for child in instance_children(&container) {
        let id = match child.get_attribute(INSTANCE_ATTR).filter(|id| !ids.contains(id)) {
            Some(id) => id,
            None => {
                let Some(id) = unique_instance_id(&ids) else {
                    continue;
                };
                let _ = child.set_attribute(INSTANCE_ATTR, &id);
                id
            }
        };
        ids.push(id);
    }

    if let Some(info) = session.template_mut(template_id) {
        info.instance_ids = ids;
    }
    session.record_order(template_id);
    true
}

/// Replace the container's instances with fresh clones, one per id, in order.
/// The add control is kept. An empty list still yields one instance.
pub fn materialize(session: &mut EditorSession, template_id: &str, desired: &[String]) -> bool {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "materialize: unknown template");
        return false;
    };
    let container = info.container.clone();
    let template_html = info.template_html.clone();

    for child in instance_children(&container) {
        session.unregister_within(&child);
        child.remove();
    }

    let mut ids: Vec<String> = Vec::new();
    for id in desired {
        if id.trim().is_empty() || ids.contains(id) {
            tracing::warn!(
                template_id = %template_id,
                instance_id = %id,
                "skipping empty or duplicate instance id"
            );
            continue;
        }
        let Some(el) = instantiate(&template_html, &container, id) else {
            tracing::warn!(template_id = %template_id, "could not clone template definition");
            break;
        };
        fill_image_placeholders(&el);
        insert_instance(&container, &el);
        ids.push(id.clone());
    }

    if ids.is_empty() {
        if let Some(id) = unique_instance_id(&ids) {
            if let Some(el) = instantiate(&template_html, &container, &id) {
                fill_image_placeholders(&el);
                insert_instance(&container, &el);
                ids.push(id);
            }
        }
    }

    tracing::debug!(template_id = %template_id, instances = ids.len(), "materialized template");
    if let Some(info) = session.template_mut(template_id) {
        info.instance_ids = ids;
    }
    true
}

/// Append a new instance. Returns its id, or `None` if nothing was added.
pub fn add_instance(
    session: &mut EditorSession,
    template_id: &str,
    instance_id: Option<String>,
) -> Option<String> {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "add: unknown template");
        return None;
    };
    let container = info.container.clone();
    let template_html = info.template_html.clone();

    let id = match instance_id {
        Some(id) if info.contains_instance(&id) => {
            tracing::warn!(
                template_id = %template_id,
                instance_id = %id,
                "add: instance already exists"
            );
            return None;
        }
        Some(id) if id.trim().is_empty() => {
            tracing::warn!(template_id = %template_id, "add: empty instance id");
            return None;
        }
        Some(id) => id,
        None => unique_instance_id(&info.instance_ids)?,
    };

    let el = instantiate(&template_html, &container, &id)?;
    fill_image_placeholders(&el);
    insert_instance(&container, &el);

    if let Some(info) = session.template_mut(template_id) {
        info.instance_ids.push(id.clone());
    }

    // Shared content (groups inside the definition) must show up immediately.
    let keys = content::register_within(session, &el);
    for key in keys {
        content::refresh_key(session, &key);
    }

    session.record_order(template_id);
    session.emit(SessionEvent::InstanceAdded {
        template_id: template_id.to_string(),
        instance_id: id.clone(),
    });
    Some(id)
}

/// Remove an instance and the content it exclusively owns. Shared group keys
/// survive. No-op when it is the last instance.
pub fn remove_instance(session: &mut EditorSession, template_id: &str, instance_id: &str) -> bool {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "remove: unknown template");
        return false;
    };
    if !info.contains_instance(instance_id) {
        tracing::warn!(template_id = %template_id, instance_id = %instance_id, "remove: unknown instance");
        return false;
    }
    if info.instance_count() <= 1 {
        tracing::debug!(template_id = %template_id, "remove: keeping the last instance");
        return false;
    }
    let container = info.container.clone();

    if let Some(el) = find_instance(&container, instance_id) {
        session.unregister_within(&el);
        el.remove();
    }

    let purged = session.purge_current(|key| key_in_instance(key, template_id, instance_id));
    tracing::debug!(
        template_id = %template_id,
        instance_id = %instance_id,
        purged = purged.len(),
        "removed instance"
    );

    if let Some(info) = session.template_mut(template_id) {
        info.instance_ids.retain(|id| id != instance_id);
    }
    session.record_order(template_id);
    session.emit(SessionEvent::InstanceRemoved {
        template_id: template_id.to_string(),
        instance_id: instance_id.to_string(),
    });
    true
}

/// Final order for a reorder request: requested ids that are live, in the
/// requested order, followed by live ids the request left out.
pub fn resolve_order(live: &[String], target: &[String]) -> Vec<String> {
    let live_set: BTreeSet<&String> = live.iter().collect();
    let mut seen: BTreeSet<&String> = BTreeSet::new();
    let mut out: Vec<String> = Vec::with_capacity(live.len());
    for id in target {
        if live_set.contains(id) && seen.insert(id) {
            out.push(id.clone());
        }
    }
    for id in live {
        if seen.insert(id) {
            out.push(id.clone());
        }
    }
    out
}

/// Move existing instance nodes into `target` order. Nodes are moved, not
/// recreated, so focus and editing state survive.
pub fn reorder(session: &mut EditorSession, template_id: &str, target: &[String]) -> bool {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "reorder: unknown template");
        return false;
    };
    let container = info.container.clone();
    let order = resolve_order(&info.instance_ids, target);
    if order == info.instance_ids {
        return true;
    }

    let anchor = add_control(&container);
    for id in &order {
        if let Some(el) = find_instance(&container, id) {
            let _ = container.insert_before(&el, anchor.as_deref());
        }
    }

    if let Some(info) = session.template_mut(template_id) {
        info.instance_ids = order;
    }
    session.record_order(template_id);
    session.emit(SessionEvent::InstancesReordered {
        template_id: template_id.to_string(),
    });
    true
}

/// Move one instance to `to_index` (clamped).
pub fn move_instance(
    session: &mut EditorSession,
    template_id: &str,
    instance_id: &str,
    to_index: usize,
) -> bool {
    let Some(info) = session.template(template_id) else {
        tracing::warn!(template_id = %template_id, "move: unknown template");
        return false;
    };
    let mut order = info.instance_ids.clone();
    let Some(from) = order.iter().position(|id| id == instance_id) else {
        tracing::warn!(template_id = %template_id, instance_id = %instance_id, "move: unknown instance");
        return false;
    };
    let id = order.remove(from);
    order.insert(to_index.min(order.len()), id);
    reorder(session, template_id, &order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    pub(super) fn is_instance_id(id: &str) -> bool {
        id.len() == INSTANCE_ID_LEN && id.bytes().all(|b| ID_ALPHABET.contains(&b))
    }

    #[test]
    fn test_generated_ids_are_well_formed() {
        for _ in 0..200 {
            let id = generate_instance_id().expect("random source");
            assert!(is_instance_id(&id), "bad id {id}");
        }
    }

    #[test]
    fn test_unique_instance_id_avoids_existing() {
        let existing = ids(&["aaaaa", "bbbbb"]);
        let id = unique_instance_id(&existing).expect("id");
        assert!(!existing.contains(&id));
    }

    #[test]
    fn test_is_instance_id() {
        assert!(is_instance_id("a1b2c"));
        assert!(!is_instance_id("A1B2C"));
        assert!(!is_instance_id("abc"));
        assert!(!is_instance_id("ab-cd"));
    }

    #[test]
    fn test_resolve_order_follows_target() {
        assert_eq!(
            resolve_order(&ids(&["a", "b", "c"]), &ids(&["c", "a", "b"])),
            ids(&["c", "a", "b"])
        );
    }

    #[test]
    fn test_resolve_order_ignores_unknown_and_keeps_missing() {
        assert_eq!(
            resolve_order(&ids(&["a", "b", "c"]), &ids(&["z", "c", "c", "a"])),
            ids(&["c", "a", "b"])
        );
    }

    #[test]
    fn test_resolve_order_round_trip() {
        let live = ids(&["a", "b", "c", "d"]);
        let shuffled = resolve_order(&live, &ids(&["d", "b", "a", "c"]));
        assert_eq!(resolve_order(&shuffled, &live), live);
    }
}
