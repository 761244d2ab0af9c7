//! Template discovery.
//!
//! A template is a container marked `data-scms-template` whose first element
//! child is the structural definition of one repeating item. At scan time the
//! definition is cloned and stripped of content so new instances never inherit
//! the first instance's text, `src`, `href` or custom attributes.

use crate::dom::{
    attribute_names, clear_text_nodes, instance_children, is_identity_attribute,
    query_all_inclusive, structure_signature, EDITABLE_SELECTOR, GROUP_ATTR, GROUP_SELECTOR,
    INSTANCE_ATTR, INSTANCE_SELECTOR, STRUCTURE_MISMATCH_ATTR, TEMPLATE_ATTR, TEMPLATE_HTML_ATTR,
    TEMPLATE_SELECTOR,
};
use crate::keys::{build_order_key, resolve_context};
use crate::session::EditorSession;
use std::collections::BTreeSet;
use wasm_bindgen::JsCast;
use web_sys::Element;

#[derive(Clone, Debug)]
pub struct TemplateInfo {
    pub template_id: String,
    pub container: Element,
    /// Canonical structural definition: the container's first child as it was
    /// at scan time. Materializing replaces the container's children, after
    /// which this node is detached and only describes the definition. Clone
    /// from `template_html`, never from this node.
    pub template_element: Element,
    /// Content-stripped outer HTML used for cloning.
    pub template_html: String,
    /// Group enclosing the container, if any.
    pub group_id: Option<String>,
    /// Live instance ids in display order.
    pub instance_ids: Vec<String>,
    /// Groups declared inside the definition; their content is shared by every instance.
    pub nested_groups: BTreeSet<String>,
}

impl TemplateInfo {
    pub fn instance_count(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn order_key(&self) -> String {
        build_order_key(self.group_id.as_deref(), &self.template_id)
    }

    pub fn contains_instance(&self, instance_id: &str) -> bool {
        self.instance_ids.iter().any(|id| id == instance_id)
    }
}

/// Register every template container under `root`. Returns the number of
/// templates newly registered.
pub fn scan(session: &mut EditorSession, root: &Element) -> usize {
    let mut registered = 0;

    for container in query_all_inclusive(root, TEMPLATE_SELECTOR) {
        let Some(template_id) = container
            .get_attribute(TEMPLATE_ATTR)
            .filter(|id| !id.trim().is_empty())
        else {
            continue;
        };

        if is_nested_template(&container) {
            tracing::warn!(
                template_id = %template_id,
                "nested template ignored; only the outermost template applies"
            );
            continue;
        }

        if session.template(&template_id).is_some() {
            tracing::warn!(template_id = %template_id, "duplicate template id ignored");
            continue;
        }

        let Some(info) = inspect(&container, &template_id) else {
            continue;
        };

        tracing::debug!(
            template_id = %template_id,
            instances = info.instance_count(),
            "registered template"
        );
        session.insert_template(info);
        registered += 1;
    }

    registered
}

fn inspect(container: &Element, template_id: &str) -> Option<TemplateInfo> {
    let raw = instance_children(container);
    let Some(first) = raw.first().cloned() else {
        tracing::warn!(template_id = %template_id, "template container has no child; ignored");
        return None;
    };

    let mismatched = mark_structure_mismatches(&raw);
    if mismatched > 0 {
        tracing::warn!(
            template_id = %template_id,
            mismatched,
            "template children differ in structure from the first child"
        );
    }

    // Reuse a definition persisted by an earlier scan.
    let template_html = match container
        .get_attribute(TEMPLATE_HTML_ATTR)
        .filter(|h| !h.trim().is_empty())
    {
        Some(html) => html,
        None => {
            let html = strip_definition(&first)?;
            let _ = container.set_attribute(TEMPLATE_HTML_ATTR, &html);
            html
        }
    };

    let nested_groups = query_all_inclusive(&first, GROUP_SELECTOR)
        .iter()
        .filter_map(|el| el.get_attribute(GROUP_ATTR))
        .collect();

    let instance_ids = raw
        .iter()
        .filter_map(|el| el.get_attribute(INSTANCE_ATTR))
        .filter(|id| !id.trim().is_empty())
        .collect();

    Some(TemplateInfo {
        template_id: template_id.to_string(),
        container: container.clone(),
        template_element: first,
        template_html,
        group_id: resolve_context(container).group_id,
        instance_ids,
        nested_groups,
    })
}

fn is_nested_template(container: &Element) -> bool {
    container
        .parent_element()
        .and_then(|p| p.closest(TEMPLATE_SELECTOR).ok().flatten())
        .is_some()
}

/// Content-stripped outer HTML of a template definition.
///
/// Instance markers and diagnostics are removed, editable descendants keep
/// only identity attributes (`id`, `class`, `data-scms-*`), and every text
/// node is blanked.
pub fn strip_definition(definition: &Element) -> Option<String> {
    let clone = definition
        .clone_node_with_deep(true)
        .ok()?
        .dyn_into::<Element>()
        .ok()?;

    for el in query_all_inclusive(&clone, INSTANCE_SELECTOR) {
        let _ = el.remove_attribute(INSTANCE_ATTR);
    }
    for el in query_all_inclusive(&clone, &format!("[{STRUCTURE_MISMATCH_ATTR}]")) {
        let _ = el.remove_attribute(STRUCTURE_MISMATCH_ATTR);
    }

    for el in query_all_inclusive(&clone, EDITABLE_SELECTOR) {
        for name in attribute_names(&el) {
            if !is_identity_attribute(&name) {
                let _ = el.remove_attribute(&name);
            }
        }
    }

    clear_text_nodes(&clone);
    Some(clone.outer_html())
}

/// Flag children whose DOM shape differs from the first. Diagnostic only.
pub(crate) fn mark_structure_mismatches(children: &[Element]) -> usize {
    let Some(first) = children.first() else {
        return 0;
    };
    let expected = structure_signature(first);
    let mut mismatched = 0;
    for child in children.iter().skip(1) {
        if structure_signature(child) != expected {
            let _ = child.set_attribute(STRUCTURE_MISMATCH_ATTR, "true");
            mismatched += 1;
        } else {
            let _ = child.remove_attribute(STRUCTURE_MISMATCH_ATTR);
        }
    }
    mismatched
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::*;
    use crate::dom::query_all;
    use crate::dom::test_support::fixture;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_scan_strips_content_and_foreign_attributes() {
        let root = fixture(
            r#"<ul data-scms-template="team">
                 <li class="card"><img data-scms-image="photo" src="/a.png" alt="A" class="round">
                   <span data-scms-text="name" title="x">Alice</span></li>
               </ul>"#,
        );
        let mut session = EditorSession::new();
        assert_eq!(scan(&mut session, &root), 1);

        let info = session.template("team").expect("registered");
        assert!(!info.template_html.contains("Alice"));
        assert!(!info.template_html.contains("src="));
        assert!(!info.template_html.contains("alt="));
        assert!(!info.template_html.contains("title="));
        assert!(info.template_html.contains(r#"class="round""#));
        assert!(info.template_html.contains(r#"data-scms-text="name""#));
        assert_eq!(
            info.container.get_attribute(TEMPLATE_HTML_ATTR).as_deref(),
            Some(info.template_html.as_str())
        );
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_nested_template_is_ignored() {
        let root = fixture(
            r#"<div data-scms-template="outer"><div>
                 <ul data-scms-template="inner"><li><span data-scms-text="x">x</span></li></ul>
               </div></div>"#,
        );
        let mut session = EditorSession::new();
        assert_eq!(scan(&mut session, &root), 1);
        assert!(session.template("outer").is_some());
        assert!(session.template("inner").is_none());
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_empty_container_is_ignored() {
        let root = fixture(r#"<div data-scms-template="empty"></div>"#);
        let mut session = EditorSession::new();
        assert_eq!(scan(&mut session, &root), 0);
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_structure_mismatch_is_marked() {
        let root = fixture(
            r#"<div data-scms-template="cards">
                 <div><h3 data-scms-text="t">A</h3><p data-scms-text="b">a</p></div>
                 <div><h3 data-scms-text="t">B</h3><p data-scms-text="b">b</p></div>
                 <div><h3 data-scms-text="t">C</h3></div>
               </div>"#,
        );
        let mut session = EditorSession::new();
        scan(&mut session, &root);
        let children = instance_children(&query_all(&root, TEMPLATE_SELECTOR)[0]);
        assert!(!children[1].has_attribute(STRUCTURE_MISMATCH_ATTR));
        assert!(children[2].has_attribute(STRUCTURE_MISMATCH_ATTR));
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_template_records_enclosing_and_nested_groups() {
        let root = fixture(
            r#"<section data-scms-group="shop">
                 <div data-scms-template="products">
                   <div><span data-scms-text="price">1</span>
                     <div data-scms-group="company"><span data-scms-text="name">Acme</span></div>
                   </div>
                 </div>
               </section>"#,
        );
        let mut session = EditorSession::new();
        scan(&mut session, &root);
        let info = session.template("products").expect("registered");
        assert_eq!(info.group_id.as_deref(), Some("shop"));
        assert_eq!(info.order_key(), "shop:products._order");
        assert!(info.nested_groups.contains("company"));
        root.remove();
    }

    #[wasm_bindgen_test]
    fn test_definition_is_the_scan_time_first_child() {
        let root = fixture(
            r#"<ul data-scms-template="steps">
                 <li class="step"><span data-scms-text="label">One</span></li>
                 <li class="step"><span data-scms-text="label">Two</span></li>
               </ul>"#,
        );
        let mut session = EditorSession::new();
        scan(&mut session, &root);
        let first = instance_children(&query_all(&root, TEMPLATE_SELECTOR)[0])[0].clone();
        let info = session.template("steps").expect("registered");
        assert!(info.template_element == first);
        assert!(info.template_html.contains(r#"class="step""#));
        assert!(!info.template_html.contains("One"));

        crate::instances::materialize(&mut session, "steps", &["a".to_string()]);
        let info = session.template("steps").expect("registered");
        assert!(!info.template_element.is_connected());
        assert_eq!(info.template_element.get_attribute("class").as_deref(), Some("step"));
        root.remove();
    }
}
