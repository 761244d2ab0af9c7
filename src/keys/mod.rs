//! Storage-key derivation.
//!
//! Every editable element is addressed by one of four key shapes:
//!
//! | context                    | key                                   |
//! |----------------------------|---------------------------------------|
//! | none                       | `elementId`                           |
//! | group                      | `groupId:elementId`                   |
//! | template instance          | `templateId.instanceId.elementId`     |
//! | template inside a group    | `groupId:templateId.instanceId.elementId` |
//!
//! The shape depends on the order in which markers are met while walking up
//! from the element: a group met before any template puts the element in
//! shared mode, and all template context is dropped. Shared group content is
//! identical in every instance, so it must not be addressed per instance.

use crate::dom::{GROUP_ATTR, INSTANCE_ATTR, TEMPLATE_ATTR};
use web_sys::Element;

pub const GROUP_SEPARATOR: char = ':';
pub const TEMPLATE_SEPARATOR: char = '.';
pub const ORDER_ELEMENT: &str = "_order";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StorageContext {
    pub group_id: Option<String>,
    pub template_id: Option<String>,
    pub instance_id: Option<String>,
}

/// The `data-scms-*` markers carried by a single element.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MarkerFrame {
    pub group: Option<String>,
    pub template: Option<String>,
    pub instance: Option<String>,
}

impl MarkerFrame {
    pub fn of(el: &Element) -> Self {
        let attr = |name: &str| el.get_attribute(name).filter(|v| !v.trim().is_empty());
        Self {
            group: attr(GROUP_ATTR),
            template: attr(TEMPLATE_ATTR),
            instance: attr(INSTANCE_ATTR),
        }
    }
}

/// Resolve the storage context of an element from its own markers and those
/// of its ancestors, closest first.
pub fn resolve_from_frames(
    own: &MarkerFrame,
    ancestors: impl IntoIterator<Item = MarkerFrame>,
) -> StorageContext {
    let mut ctx = StorageContext::default();
    let mut found_group_before_template = false;
    let mut template_found = false;

    // An inline group forces shared mode.
    if let Some(group) = &own.group {
        ctx.group_id = Some(group.clone());
        found_group_before_template = true;
    } else if let Some(instance) = &own.instance {
        ctx.instance_id = Some(instance.clone());
    }

    if !found_group_before_template {
        for frame in ancestors {
            if ctx.group_id.is_none() {
                if let Some(group) = frame.group {
                    ctx.group_id = Some(group);
                    if !template_found {
                        found_group_before_template = true;
                    }
                }
            }

            // Closest group and closest template both win; once a group is
            // known nothing further up can change the result.
            if found_group_before_template || (template_found && ctx.group_id.is_some()) {
                break;
            }
            if template_found {
                continue;
            }

            if ctx.instance_id.is_none() {
                ctx.instance_id = frame.instance;
            }
            if let Some(template) = frame.template {
                ctx.template_id = Some(template);
                template_found = true;
            }
        }
    }

    if found_group_before_template {
        ctx.template_id = None;
        ctx.instance_id = None;
    }

    ctx
}

/// Resolve the storage context of a live element.
pub fn resolve_context(el: &Element) -> StorageContext {
    let own = MarkerFrame::of(el);
    let ancestors = std::iter::successors(el.parent_element(), |e| e.parent_element())
        .map(|e| MarkerFrame::of(&e));
    resolve_from_frames(&own, ancestors)
}

/// Canonical key for `element_id` under `ctx`.
///
/// Template context only applies when both the template and the instance are
/// known; an element inside a container but outside any instance root falls
/// back to the group or plain shape.
pub fn build_key(ctx: &StorageContext, element_id: &str) -> String {
    let mut key = String::new();
    if let Some(group) = &ctx.group_id {
        key.push_str(group);
        key.push(GROUP_SEPARATOR);
    }
    if let (Some(template), Some(instance)) = (&ctx.template_id, &ctx.instance_id) {
        key.push_str(template);
        key.push(TEMPLATE_SEPARATOR);
        key.push_str(instance);
        key.push(TEMPLATE_SEPARATOR);
    }
    key.push_str(element_id);
    key
}

/// `templateId._order`, prefixed by the enclosing group if any.
pub fn build_order_key(group_id: Option<&str>, template_id: &str) -> String {
    match group_id {
        Some(group) => {
            format!("{group}{GROUP_SEPARATOR}{template_id}{TEMPLATE_SEPARATOR}{ORDER_ELEMENT}")
        }
        None => format!("{template_id}{TEMPLATE_SEPARATOR}{ORDER_ELEMENT}"),
    }
}

/// `.` separates template segments, so ids containing it cannot be parsed
/// back unambiguously.
pub fn is_ambiguous_element_id(element_id: &str) -> bool {
    element_id.contains(TEMPLATE_SEPARATOR)
}

pub(crate) fn check_element_id(element_id: &str) {
    if is_ambiguous_element_id(element_id) {
        tracing::warn!(
            element_id = %element_id,
            "editable element id contains '.', which is reserved as the template key separator"
        );
    }
}

/// A storage key split into its parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedKey<'a> {
    pub group_id: Option<&'a str>,
    pub template_id: Option<&'a str>,
    pub instance_id: Option<&'a str>,
    pub element_id: &'a str,
}

impl ParsedKey<'_> {
    pub fn is_order(&self) -> bool {
        self.template_id.is_some() && self.instance_id.is_none() && self.element_id == ORDER_ELEMENT
    }
}

pub fn parse_key(key: &str) -> ParsedKey<'_> {
    let (group_id, rest) = match key.split_once(GROUP_SEPARATOR) {
        Some((group, rest)) => (Some(group), rest),
        None => (None, key),
    };

    let parts: Vec<&str> = rest.splitn(3, TEMPLATE_SEPARATOR).collect();
    match parts[..] {
        [template, order] if order == ORDER_ELEMENT => ParsedKey {
            group_id,
            template_id: Some(template),
            instance_id: None,
            element_id: order,
        },
        [template, instance, element] => ParsedKey {
            group_id,
            template_id: Some(template),
            instance_id: Some(instance),
            element_id: element,
        },
        _ => ParsedKey {
            group_id,
            template_id: None,
            instance_id: None,
            element_id: rest,
        },
    }
}

pub fn is_order_key(key: &str) -> bool {
    parse_key(key).is_order()
}

/// True if `key` is addressed to one specific instance of `template_id`.
pub fn key_in_instance(key: &str, template_id: &str, instance_id: &str) -> bool {
    let parsed = parse_key(key);
    parsed.template_id == Some(template_id) && parsed.instance_id == Some(instance_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str) -> MarkerFrame {
        MarkerFrame {
            group: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn template(id: &str) -> MarkerFrame {
        MarkerFrame {
            template: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn instance(id: &str) -> MarkerFrame {
        MarkerFrame {
            instance: Some(id.to_string()),
            ..Default::default()
        }
    }

    fn plain() -> MarkerFrame {
        MarkerFrame::default()
    }

    #[test]
    fn test_plain_element() {
        let ctx = resolve_from_frames(&plain(), vec![plain(), plain()]);
        assert_eq!(ctx, StorageContext::default());
        assert_eq!(build_key(&ctx, "title"), "title");
    }

    #[test]
    fn test_grouped_element() {
        let ctx = resolve_from_frames(&plain(), vec![plain(), group("footer")]);
        assert_eq!(ctx.group_id.as_deref(), Some("footer"));
        assert_eq!(build_key(&ctx, "copyright"), "footer:copyright");
    }

    #[test]
    fn test_template_element() {
        let ctx = resolve_from_frames(&plain(), vec![plain(), instance("a1b2c"), template("team")]);
        assert_eq!(build_key(&ctx, "name"), "team.a1b2c.name");
    }

    #[test]
    fn test_template_inside_group() {
        let ctx = resolve_from_frames(
            &plain(),
            vec![instance("x"), template("products"), plain(), group("shop")],
        );
        assert_eq!(ctx.group_id.as_deref(), Some("shop"));
        assert_eq!(ctx.template_id.as_deref(), Some("products"));
        assert_eq!(build_key(&ctx, "price"), "shop:products.x.price");
    }

    #[test]
    fn test_group_before_template_discards_template_context() {
        // Walking up: group g1 is met first, then instance i1 of template t1.
        let ctx = resolve_from_frames(&plain(), vec![group("g1"), instance("i1"), template("t1")]);
        assert_eq!(
            ctx,
            StorageContext {
                group_id: Some("g1".to_string()),
                template_id: None,
                instance_id: None,
            }
        );
        assert_eq!(build_key(&ctx, "elementName"), "g1:elementName");
    }

    #[test]
    fn test_inline_group_forces_shared_mode() {
        let own = MarkerFrame {
            group: Some("company".to_string()),
            instance: Some("x".to_string()),
            ..Default::default()
        };
        let ctx = resolve_from_frames(&own, vec![template("products"), group("outer")]);
        assert_eq!(ctx.group_id.as_deref(), Some("company"));
        assert!(ctx.template_id.is_none());
        assert!(ctx.instance_id.is_none());
    }

    #[test]
    fn test_element_is_instance_root() {
        let ctx = resolve_from_frames(&instance("r00t1"), vec![template("cards")]);
        assert_eq!(build_key(&ctx, "caption"), "cards.r00t1.caption");
    }

    #[test]
    fn test_closest_template_wins() {
        let ctx = resolve_from_frames(
            &plain(),
            vec![instance("in"), template("inner"), instance("out"), template("outer")],
        );
        assert_eq!(ctx.template_id.as_deref(), Some("inner"));
        assert_eq!(ctx.instance_id.as_deref(), Some("in"));
    }

    #[test]
    fn test_closest_group_wins() {
        let ctx = resolve_from_frames(&plain(), vec![group("near"), group("far")]);
        assert_eq!(ctx.group_id.as_deref(), Some("near"));
    }

    #[test]
    fn test_template_without_instance_degrades_to_plain_key() {
        let ctx = resolve_from_frames(&plain(), vec![template("team")]);
        assert_eq!(build_key(&ctx, "name"), "name");
    }

    #[test]
    fn test_order_keys() {
        assert_eq!(build_order_key(None, "team"), "team._order");
        assert_eq!(build_order_key(Some("shop"), "products"), "shop:products._order");
        assert!(is_order_key("team._order"));
        assert!(is_order_key("shop:products._order"));
        assert!(!is_order_key("team.a1b2c.name"));
        assert!(!is_order_key("_order"));
    }

    #[test]
    fn test_parse_key_shapes() {
        assert_eq!(
            parse_key("shop:products.x.price"),
            ParsedKey {
                group_id: Some("shop"),
                template_id: Some("products"),
                instance_id: Some("x"),
                element_id: "price",
            }
        );
        let grouped = parse_key("footer:copyright");
        assert_eq!(grouped.group_id, Some("footer"));
        assert_eq!(grouped.template_id, None);
        assert_eq!(grouped.element_id, "copyright");

        let order = parse_key("team._order");
        assert!(order.is_order());
        assert_eq!(order.template_id, Some("team"));
    }

    #[test]
    fn test_key_in_instance() {
        assert!(key_in_instance("team.b.name", "team", "b"));
        assert!(key_in_instance("g:team.b.name", "team", "b"));
        assert!(!key_in_instance("team.a.name", "team", "b"));
        assert!(!key_in_instance("team._order", "team", "b"));
        assert!(!key_in_instance("company:name", "team", "b"));
    }

    #[test]
    fn test_dotted_element_ids_are_flagged() {
        assert!(is_ambiguous_element_id("hero.title"));
        assert!(!is_ambiguous_element_id("hero-title"));
    }
}
