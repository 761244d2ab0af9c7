//! Markup contract and small DOM helpers shared by the engine.
//!
//! Authors mark up a page with:
//! - `data-scms-text|html|image|link="elementId"` on editable leaves
//! - `data-scms-template="templateId"` on a repeating container
//! - `data-scms-group="groupId"` on a shared-content scope
//!
//! `data-scms-instance="id"` on instance roots is written by the engine.

use crate::models::EditableKind;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlTemplateElement, Node, NodeList};

pub const TEMPLATE_ATTR: &str = "data-scms-template";
pub const GROUP_ATTR: &str = "data-scms-group";
pub const INSTANCE_ATTR: &str = "data-scms-instance";
pub const STRUCTURE_MISMATCH_ATTR: &str = "data-scms-structure-mismatch";
pub const TEMPLATE_HTML_ATTR: &str = "data-scms-template-html";
/// Marks the UI's "add item" control inside a template container.
pub const ADD_CONTROL_ATTR: &str = "data-scms-add";
pub const ATTR_PREFIX: &str = "data-scms-";

pub const EDITABLE_SELECTOR: &str =
    "[data-scms-text],[data-scms-html],[data-scms-image],[data-scms-link]";
pub const TEMPLATE_SELECTOR: &str = "[data-scms-template]";
pub const GROUP_SELECTOR: &str = "[data-scms-group]";
pub const INSTANCE_SELECTOR: &str = "[data-scms-instance]";

pub(crate) fn document() -> Option<Document> {
    web_sys::window().and_then(|w| w.document())
}

pub(crate) fn node_list_elements(list: &NodeList) -> Vec<Element> {
    (0..list.length())
        .filter_map(|i| list.get(i))
        .filter_map(|n| n.dyn_into::<Element>().ok())
        .collect()
}

/// Descendants of `root` matching `selector` (not `root` itself).
pub(crate) fn query_all(root: &Element, selector: &str) -> Vec<Element> {
    root.query_selector_all(selector)
        .map(|list| node_list_elements(&list))
        .unwrap_or_default()
}

/// Like [`query_all`] but includes `root` when it matches.
pub(crate) fn query_all_inclusive(root: &Element, selector: &str) -> Vec<Element> {
    let mut out = Vec::new();
    if root.matches(selector).unwrap_or(false) {
        out.push(root.clone());
    }
    out.extend(query_all(root, selector));
    out
}

pub(crate) fn element_children(el: &Element) -> Vec<Element> {
    let children = el.children();
    (0..children.length())
        .filter_map(|i| children.item(i))
        .collect()
}

pub(crate) fn is_add_control(el: &Element) -> bool {
    el.has_attribute(ADD_CONTROL_ATTR)
}

/// Element children of a template container, minus the add control.
pub(crate) fn instance_children(container: &Element) -> Vec<Element> {
    element_children(container)
        .into_iter()
        .filter(|c| !is_add_control(c))
        .collect()
}

pub(crate) fn add_control(container: &Element) -> Option<Element> {
    element_children(container)
        .into_iter()
        .find(is_add_control)
}

pub(crate) fn find_instance(container: &Element, instance_id: &str) -> Option<Element> {
    instance_children(container)
        .into_iter()
        .find(|c| c.get_attribute(INSTANCE_ATTR).as_deref() == Some(instance_id))
}

/// Declared editable kind and element id of `el`, if it is an editable leaf.
pub(crate) fn declared_editable(el: &Element) -> Option<(EditableKind, String)> {
    EditableKind::all().find_map(|kind| {
        el.get_attribute(kind.attribute())
            .filter(|id| !id.trim().is_empty())
            .map(|id| (kind, id))
    })
}

pub(crate) fn attribute_names(el: &Element) -> Vec<String> {
    el.get_attribute_names()
        .iter()
        .filter_map(|v| v.as_string())
        .collect()
}

/// Attributes that identify an element rather than describe its content.
pub fn is_identity_attribute(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "id" || name == "class" || name.starts_with(ATTR_PREFIX)
}

/// Blank every text node under `node`.
pub(crate) fn clear_text_nodes(node: &Node) {
    let children = node.child_nodes();
    for i in 0..children.length() {
        let Some(child) = children.get(i) else {
            continue;
        };
        if child.node_type() == Node::TEXT_NODE {
            child.set_node_value(Some(""));
        } else {
            clear_text_nodes(&child);
        }
    }
}

/// Shape of an element subtree: tag names only, attributes and text ignored.
pub(crate) fn structure_signature(el: &Element) -> String {
    let children = element_children(el);
    let tag = el.tag_name().to_ascii_lowercase();
    if children.is_empty() {
        return tag;
    }
    let inner = children
        .iter()
        .map(structure_signature)
        .collect::<Vec<_>>()
        .join(",");
    format!("{tag}({inner})")
}

/// Parse `html` into a detached element. A `<template>` is used so
/// fragments such as `<tr>` or `<li>` survive parsing.
pub(crate) fn html_to_element(doc: &Document, html: &str) -> Option<Element> {
    let template = doc
        .create_element("template")
        .ok()?
        .dyn_into::<HtmlTemplateElement>()
        .ok()?;
    template.set_inner_html(html);
    let first = template.content().first_element_child()?;
    doc.import_node_with_deep(&first, true)
        .ok()?
        .dyn_into::<Element>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_attributes() {
        assert!(is_identity_attribute("id"));
        assert!(is_identity_attribute("class"));
        assert!(is_identity_attribute("data-scms-text"));
        assert!(is_identity_attribute("DATA-SCMS-GROUP"));
        assert!(!is_identity_attribute("src"));
        assert!(!is_identity_attribute("href"));
        assert!(!is_identity_attribute("data-other"));
        assert!(!is_identity_attribute("style"));
    }
}
