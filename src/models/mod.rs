use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumIter, IntoEnumIterator};

/// Editable leaf type, as declared by the `data-scms-<kind>` attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum EditableKind {
    Text,
    Html,
    Image,
    Link,
}

impl EditableKind {
    /// Markup attribute carrying the element id, e.g. `data-scms-text`.
    pub fn attribute(self) -> &'static str {
        match self {
            EditableKind::Text => "data-scms-text",
            EditableKind::Html => "data-scms-html",
            EditableKind::Image => "data-scms-image",
            EditableKind::Link => "data-scms-link",
        }
    }

    pub fn all() -> impl Iterator<Item = EditableKind> {
        Self::iter()
    }
}

/// A stored content value.
///
/// Serialized as `{"type": "...", ...}`. Values written before the `type`
/// discriminator existed are read through [`ContentValue::parse`], which falls
/// back to the element's declared kind.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentValue {
    Text {
        value: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },
    Html {
        value: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },
    Image {
        src: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },
    Link {
        href: String,
        #[serde(default)]
        target: String,
        #[serde(default)]
        value: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
    },
}

impl ContentValue {
    /// Parse a stored JSON string. Malformed input yields `None`.
    pub fn parse(raw: &str, declared: EditableKind) -> Option<Self> {
        let json: serde_json::Value = serde_json::from_str(raw).ok()?;
        let obj = json.as_object()?;

        if obj.contains_key("type") {
            return serde_json::from_value(json).ok();
        }

        // Legacy untyped value: the declared kind picks the fields.
        let get_s = |k: &str| {
            obj.get(k)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let attributes = obj
            .get("attributes")
            .and_then(|v| serde_json::from_value::<BTreeMap<String, String>>(v.clone()).ok())
            .unwrap_or_default();

        Some(match declared {
            EditableKind::Text => ContentValue::Text {
                value: get_s("value"),
                attributes,
            },
            EditableKind::Html => ContentValue::Html {
                value: get_s("value"),
                attributes,
            },
            EditableKind::Image => ContentValue::Image {
                src: get_s("src"),
                alt: obj.get("alt").and_then(|v| v.as_str()).map(str::to_string),
                attributes,
            },
            EditableKind::Link => ContentValue::Link {
                href: get_s("href"),
                target: get_s("target"),
                value: get_s("value"),
                attributes,
            },
        })
    }

    pub fn kind(&self) -> EditableKind {
        match self {
            ContentValue::Text { .. } => EditableKind::Text,
            ContentValue::Html { .. } => EditableKind::Html,
            ContentValue::Image { .. } => EditableKind::Image,
            ContentValue::Link { .. } => EditableKind::Link,
        }
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        match self {
            ContentValue::Text { attributes, .. }
            | ContentValue::Html { attributes, .. }
            | ContentValue::Image { attributes, .. }
            | ContentValue::Link { attributes, .. } => attributes,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OrderTag {
    #[default]
    #[serde(rename = "order")]
    Order,
}

/// `{"type": "order", "value": [instanceId, ...]}` stored under `<template>._order`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderValue {
    #[serde(rename = "type")]
    pub tag: OrderTag,
    pub value: Vec<String>,
}

impl OrderValue {
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            tag: OrderTag::Order,
            value: ids,
        }
    }

    /// Instance ids of a stored order value; `None` if the JSON is malformed.
    pub fn parse(raw: &str) -> Option<Vec<String>> {
        serde_json::from_str::<OrderValue>(raw).ok().map(|o| o.value)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ElementEntry {
    pub content: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupEntry {
    #[serde(default)]
    pub elements: BTreeMap<String, ElementEntry>,
}

/// Content fetch response from the content service.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchResponse {
    #[serde(default)]
    pub elements: BTreeMap<String, ElementEntry>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupEntry>,
}

impl FetchResponse {
    /// Flatten into storage keys; group entries are prefixed `groupId:`.
    pub fn flatten(self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (key, entry) in self.elements {
            out.insert(key, entry.content);
        }
        for (group_id, group) in self.groups {
            for (key, entry) in group.elements {
                out.insert(format!("{group_id}:{key}"), entry.content);
            }
        }
        out
    }
}

/// Batch update body. `None` deletes the key.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchUpdate {
    pub page: String,
    pub content: BTreeMap<String, Option<String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchUpdateResponse {
    #[serde(default)]
    pub saved: BTreeMap<String, String>,
    #[serde(default)]
    pub deleted: Vec<String>,
}
