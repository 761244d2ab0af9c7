//! Keeps the DOM a projection of the session's working content.
//!
//! A storage key may be shared by several elements (a group inside a template
//! appears once per instance). Writes always fan out to every element sharing
//! the key, including edits typed into one of them.

use crate::dom::{
    attribute_names, declared_editable, query_all_inclusive, ATTR_PREFIX, EDITABLE_SELECTOR,
};
use crate::instances::PLACEHOLDER_IMAGE;
use crate::keys::{check_element_id, is_order_key, resolve_context};
use crate::models::{ContentValue, EditableKind};
use crate::session::{EditableElementInfo, EditorSession, SessionEvent};
use std::collections::BTreeMap;
use wasm_bindgen::JsCast;
use web_sys::{Element, HtmlElement};

/// Outcome of projecting a value onto one element.
#[derive(Debug)]
pub enum Applied {
    Updated,
    /// The element was swapped for a new node (images).
    Replaced(Element),
    Skipped,
}

/// Register one editable element. Already registered elements keep their key.
pub fn register_element(session: &mut EditorSession, el: &Element) -> Option<String> {
    if session.is_registered(el) {
        return session.key_for_element(el);
    }
    let (kind, element_id) = declared_editable(el)?;
    check_element_id(&element_id);
    let ctx = resolve_context(el);
    Some(session.register(EditableElementInfo::new(el.clone(), element_id, kind, ctx)))
}

/// Register the editable elements under `root` (inclusive) that are not yet
/// known. Returns their distinct keys.
pub fn register_within(session: &mut EditorSession, root: &Element) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for el in query_all_inclusive(root, EDITABLE_SELECTOR) {
        if session.is_registered(&el) {
            continue;
        }
        if let Some(key) = register_element(session, &el) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Full editable scan. Must run after templates are materialized, or cloned
/// instances are never addressed. Keys with no stored value take the content
/// the page was authored with.
pub fn scan_editables(session: &mut EditorSession, root: &Element) -> usize {
    let keys = register_within(session, root);
    let authored = capture_authored(session);
    tracing::debug!(keys = keys.len(), authored, "scanned editable elements");
    keys.len()
}

/// Read registered keys that have no working value back from the DOM into
/// the baseline. Blank clones of a template definition are skipped.
pub fn capture_authored(session: &mut EditorSession) -> usize {
    let unset: Vec<(String, Element, EditableKind)> = session
        .registered_keys()
        .filter(|key| session.current(key).is_none() && !is_order_key(key))
        .filter_map(|key| {
            let info = session.elements_for_key(key).first()?;
            Some((key.clone(), info.element.clone(), info.kind))
        })
        .collect();

    let mut captured = 0;
    for (key, el, kind) in unset {
        let value = read_element_content(&el, kind, None);
        if is_blank(&value) {
            continue;
        }
        session.record_authored(&key, value.to_json());
        captured += 1;
    }
    captured
}

fn is_blank(value: &ContentValue) -> bool {
    match value {
        ContentValue::Text { value, .. } | ContentValue::Html { value, .. } => {
            value.trim().is_empty()
        }
        ContentValue::Image { src, .. } => src.is_empty() || src == PLACEHOLDER_IMAGE,
        ContentValue::Link { href, value, .. } => href.is_empty() && value.trim().is_empty(),
    }
}

/// Store `json` under `key` and push it to every element sharing the key.
/// Returns the number of elements updated.
pub fn set_content(session: &mut EditorSession, key: &str, json: &str) -> usize {
    session.set_current(key, json.to_string());
    let updated = push_to_elements(session, key, json, None);
    if updated == 0 && !is_order_key(key) {
        tracing::debug!(key = %key, "content stored for a key with no element yet");
    }
    session.emit(SessionEvent::ContentChanged {
        key: key.to_string(),
    });
    updated
}

/// Re-project the working value of `key` onto its elements.
pub fn refresh_key(session: &mut EditorSession, key: &str) -> usize {
    let Some(raw) = session.current(key).map(str::to_string) else {
        return 0;
    };
    push_to_elements(session, key, &raw, None)
}

/// Project all working content onto the registered elements.
pub fn apply_all(session: &mut EditorSession) -> usize {
    let keys: Vec<String> = session
        .registered_keys()
        .filter(|k| session.current(k).is_some())
        .cloned()
        .collect();
    keys.iter().map(|key| refresh_key(session, key)).sum()
}

fn push_to_elements(
    session: &mut EditorSession,
    key: &str,
    raw: &str,
    skip: Option<&Element>,
) -> usize {
    let targets: Vec<(Element, EditableKind)> = session
        .elements_for_key(key)
        .iter()
        .filter(|info| skip.map_or(true, |s| info.element != *s))
        .map(|info| (info.element.clone(), info.kind))
        .collect();

    let mut updated = 0;
    for (el, kind) in targets {
        match apply_content_to_element(&el, kind, raw) {
            Applied::Updated => updated += 1,
            Applied::Replaced(new) => {
                session.replace_element(key, &el, &new);
                updated += 1;
            }
            Applied::Skipped => {}
        }
    }
    updated
}

/// Project a stored value onto one element. The JSON `type` decides how;
/// untyped values fall back to the element's declared kind.
pub fn apply_content_to_element(el: &Element, declared: EditableKind, raw: &str) -> Applied {
    let Some(value) = ContentValue::parse(raw, declared) else {
        tracing::warn!(kind = %declared, "unreadable content value; treated as absent");
        return Applied::Skipped;
    };

    match &value {
        ContentValue::Text { value: text, .. } => el.set_text_content(Some(text)),
        ContentValue::Html { value: html, .. } => el.set_inner_html(html),
        ContentValue::Link {
            href,
            target,
            value: html,
            ..
        } => {
            let _ = el.set_attribute("href", href);
            if target.trim().is_empty() {
                let _ = el.remove_attribute("target");
            } else {
                let _ = el.set_attribute("target", target);
            }
            el.set_inner_html(html);
        }
        ContentValue::Image { src, alt, attributes } => {
            return apply_image(el, src, alt.as_deref(), attributes);
        }
    }

    apply_attributes(el, value.attributes());
    Applied::Updated
}

/// `<img>` elements are replaced rather than mutated so no load state of the
/// previous `src` carries over. Other elements get a background image.
fn apply_image(
    el: &Element,
    src: &str,
    alt: Option<&str>,
    attributes: &BTreeMap<String, String>,
) -> Applied {
    if !el.tag_name().eq_ignore_ascii_case("img") {
        if let Some(html) = el.dyn_ref::<HtmlElement>() {
            let _ = html
                .style()
                .set_property("background-image", &format!("url(\"{src}\")"));
        }
        apply_attributes(el, attributes);
        return Applied::Updated;
    }

    let Some(img) = el.owner_document().and_then(|d| d.create_element("img").ok()) else {
        return Applied::Skipped;
    };
    for name in attribute_names(el) {
        if let Some(value) = el.get_attribute(&name) {
            let _ = img.set_attribute(&name, &value);
        }
    }
    let _ = img.set_attribute("src", src);
    if let Some(alt) = alt {
        let _ = img.set_attribute("alt", alt);
    }
    apply_attributes(&img, attributes);

    if el.replace_with_with_node_1(&img).is_err() {
        tracing::warn!("could not swap image element");
        return Applied::Skipped;
    }
    Applied::Replaced(img)
}

/// Attribute overrides never touch the engine's own markers.
fn apply_attributes(el: &Element, attributes: &BTreeMap<String, String>) {
    for (name, value) in attributes {
        if name.trim().is_empty() || name.to_ascii_lowercase().starts_with(ATTR_PREFIX) {
            continue;
        }
        let _ = el.set_attribute(name, value);
    }
}

/// Read the live DOM of an editable element back into a content value.
/// Attribute overrides of the previous value are kept.
pub fn read_element_content(
    el: &Element,
    kind: EditableKind,
    previous: Option<&ContentValue>,
) -> ContentValue {
    let attributes = previous.map(|p| p.attributes().clone()).unwrap_or_default();
    match kind {
        EditableKind::Text => ContentValue::Text {
            value: el.text_content().unwrap_or_default(),
            attributes,
        },
        EditableKind::Html => ContentValue::Html {
            value: el.inner_html(),
            attributes,
        },
        EditableKind::Image => ContentValue::Image {
            src: el.get_attribute("src").unwrap_or_default(),
            alt: el.get_attribute("alt"),
            attributes,
        },
        EditableKind::Link => ContentValue::Link {
            href: el.get_attribute("href").unwrap_or_default(),
            target: el.get_attribute("target").unwrap_or_default(),
            value: el.inner_html(),
            attributes,
        },
    }
}

/// Capture an edit made directly in the DOM and mirror it to every other
/// element sharing `key`. Returns `false` if nothing changed.
pub fn update_content_from_element(session: &mut EditorSession, key: &str, el: &Element) -> bool {
    let kind = session
        .elements_for_key(key)
        .iter()
        .find(|info| info.element == *el)
        .map(|info| info.kind)
        .or_else(|| declared_editable(el).map(|(kind, _)| kind));
    let Some(kind) = kind else {
        tracing::warn!(key = %key, "edited element is not editable");
        return false;
    };

    let previous = session
        .current(key)
        .and_then(|raw| ContentValue::parse(raw, kind));
    let json = read_element_content(el, kind, previous.as_ref()).to_json();
    if session.current(key) == Some(json.as_str()) {
        return false;
    }

    session.set_current(key, json.clone());
    push_to_elements(session, key, &json, Some(el));
    session.emit(SessionEvent::ContentChanged {
        key: key.to_string(),
    });
    true
}

/// Route a DOM input event target to its storage key.
pub fn handle_input(session: &mut EditorSession, target: &Element) -> bool {
    let Some(editable) = target.closest(EDITABLE_SELECTOR).ok().flatten() else {
        return false;
    };
    let Some(key) = session.key_for_element(&editable) else {
        tracing::warn!("input on an unregistered editable element");
        return false;
    };
    update_content_from_element(session, &key, &editable)
}
