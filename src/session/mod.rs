use crate::keys::{build_key, parse_key, StorageContext};
use crate::models::{BatchUpdateResponse, EditableKind, OrderValue};
use crate::templates::TemplateInfo;
use std::collections::{BTreeMap, BTreeSet};
use wasm_bindgen::JsValue;
use web_sys::Element;

/// One registered editable element. Several records may share a storage key
/// (a group inside a template appears once per instance).
#[derive(Clone, Debug)]
pub struct EditableElementInfo {
    /// Owned by the DOM; replaced in place when the node is swapped.
    pub element: Element,
    pub element_id: String,
    pub kind: EditableKind,
    pub group_id: Option<String>,
    pub template_id: Option<String>,
    pub instance_id: Option<String>,
}

impl EditableElementInfo {
    pub fn new(element: Element, element_id: String, kind: EditableKind, ctx: StorageContext) -> Self {
        Self {
            element,
            element_id,
            kind,
            group_id: ctx.group_id,
            template_id: ctx.template_id,
            instance_id: ctx.instance_id,
        }
    }

    pub fn context(&self) -> StorageContext {
        StorageContext {
            group_id: self.group_id.clone(),
            template_id: self.template_id.clone(),
            instance_id: self.instance_id.clone(),
        }
    }

    pub fn key(&self) -> String {
        build_key(&self.context(), &self.element_id)
    }
}

/// Notifications emitted synchronously after each session mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    ContentChanged { key: String },
    InstanceAdded { template_id: String, instance_id: String },
    InstanceRemoved { template_id: String, instance_id: String },
    InstancesReordered { template_id: String },
    DraftRestored,
    Saved { keys: usize },
}

/// Receives each event together with the session that emitted it, so a
/// listener can read state without borrowing the session again.
pub type Listener = Box<dyn FnMut(&SessionEvent, &EditorSession)>;

/// An in-flight save. Stale once the save is cancelled or superseded.
#[derive(Clone, Debug)]
pub struct SaveTicket {
    generation: u64,
    /// `None` deletes the key.
    pub changes: BTreeMap<String, Option<String>>,
}

/// All editing state for one page load.
#[derive(Default)]
pub struct EditorSession {
    templates: BTreeMap<String, TemplateInfo>,
    elements: BTreeMap<String, Vec<EditableElementInfo>>,
    /// element -> storage key. Weak: entries never keep removed nodes alive.
    node_keys: Option<js_sys::WeakMap>,

    /// Last saved or fetched baseline.
    original_content: BTreeMap<String, String>,
    /// Working state including unsaved edits. The DOM is a projection of this.
    current_content: BTreeMap<String, String>,
    /// Keys known to be persisted server-side.
    saved_content_keys: BTreeSet<String>,

    listeners: Vec<Listener>,
    save_generation: u64,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install fetched content as both baseline and working state.
    pub fn seed_content(&mut self, content: BTreeMap<String, String>) {
        self.saved_content_keys = content.keys().cloned().collect();
        self.original_content = content.clone();
        self.current_content = content;
    }

    pub fn original_content(&self) -> &BTreeMap<String, String> {
        &self.original_content
    }

    pub fn current_content(&self) -> &BTreeMap<String, String> {
        &self.current_content
    }

    /// Record content the page was authored with. It becomes part of the
    /// baseline but is not marked as saved.
    pub(crate) fn record_authored(&mut self, key: &str, value: String) {
        self.original_content.insert(key.to_string(), value.clone());
        self.current_content.insert(key.to_string(), value);
    }

    pub fn saved_content_keys(&self) -> &BTreeSet<String> {
        &self.saved_content_keys
    }

    pub fn current(&self, key: &str) -> Option<&str> {
        self.current_content.get(key).map(String::as_str)
    }

    pub(crate) fn set_current(&mut self, key: &str, value: String) {
        self.current_content.insert(key.to_string(), value);
    }

    pub(crate) fn remove_current(&mut self, key: &str) -> Option<String> {
        self.current_content.remove(key)
    }

    /// Drop every working-state key matching `pred`. Returns the removed keys.
    pub(crate) fn purge_current(&mut self, pred: impl Fn(&str) -> bool) -> Vec<String> {
        let doomed: Vec<String> = self
            .current_content
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();
        for key in &doomed {
            self.current_content.remove(key);
        }
        doomed
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&SessionEvent, &EditorSession) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub(crate) fn emit(&mut self, event: SessionEvent) {
        // Listeners are taken out while they run so they can be handed `&self`.
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in listeners.iter_mut() {
            listener(&event, self);
        }
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
    }

    // ---- templates ----

    pub fn templates(&self) -> impl Iterator<Item = &TemplateInfo> {
        self.templates.values()
    }

    pub fn template(&self, template_id: &str) -> Option<&TemplateInfo> {
        self.templates.get(template_id)
    }

    pub(crate) fn template_mut(&mut self, template_id: &str) -> Option<&mut TemplateInfo> {
        self.templates.get_mut(template_id)
    }

    pub(crate) fn insert_template(&mut self, info: TemplateInfo) {
        self.templates.insert(info.template_id.clone(), info);
    }

    /// 1-based position and instance count, for "item 2 of 5" indicators.
    pub fn instance_position(&self, template_id: &str, instance_id: &str) -> Option<(usize, usize)> {
        let info = self.templates.get(template_id)?;
        let idx = info.instance_ids.iter().position(|id| id == instance_id)?;
        Some((idx + 1, info.instance_count()))
    }

    /// Write the template's live instance order into the working state.
    pub(crate) fn record_order(&mut self, template_id: &str) {
        let Some(info) = self.templates.get(template_id) else {
            return;
        };
        let key = info.order_key();
        let value = OrderValue::new(info.instance_ids.clone()).to_json();
        self.current_content.insert(key, value);
    }

    pub fn order_changed(&self, template_id: &str) -> bool {
        self.templates
            .get(template_id)
            .is_some_and(|info| self.order_key_changed(&info.order_key()))
    }

    /// Templates whose order changed, each with the groups nested in its
    /// definition.
    pub fn changed_templates(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.templates
            .values()
            .filter(|info| self.order_key_changed(&info.order_key()))
            .map(|info| (info.template_id.clone(), info.nested_groups.clone()))
            .collect()
    }

    /// Compares parsed id lists, so formatting differences do not count.
    pub(crate) fn order_key_changed(&self, order_key: &str) -> bool {
        let parse = |v: Option<&String>| v.and_then(|raw| OrderValue::parse(raw));
        parse(self.current_content.get(order_key)) != parse(self.original_content.get(order_key))
    }

    // ---- element registry ----

    fn node_keys(&mut self) -> &js_sys::WeakMap {
        self.node_keys.get_or_insert_with(js_sys::WeakMap::new)
    }

    pub fn key_for_element(&self, el: &Element) -> Option<String> {
        self.node_keys.as_ref()?.get(el.as_ref()).as_string()
    }

    pub fn is_registered(&self, el: &Element) -> bool {
        self.node_keys
            .as_ref()
            .is_some_and(|m| m.has(el.as_ref()))
    }

    /// Register an element. Returns its storage key.
    pub(crate) fn register(&mut self, info: EditableElementInfo) -> String {
        let key = info.key();
        self.node_keys()
            .set(info.element.as_ref(), &JsValue::from_str(&key));
        self.elements.entry(key.clone()).or_default().push(info);
        key
    }

    pub fn elements_for_key(&self, key: &str) -> &[EditableElementInfo] {
        self.elements.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn registered_keys(&self) -> impl Iterator<Item = &String> {
        self.elements.keys()
    }

    fn forget_node(&mut self, el: &Element) {
        if let Some(map) = &self.node_keys {
            map.delete(el.as_ref());
        }
    }

    fn retain_elements(&mut self, keep: impl Fn(&EditableElementInfo) -> bool) -> usize {
        let mut dropped = Vec::new();
        for infos in self.elements.values_mut() {
            infos.retain(|info| {
                let k = keep(info);
                if !k {
                    dropped.push(info.element.clone());
                }
                k
            });
        }
        self.elements.retain(|_, infos| !infos.is_empty());
        for el in &dropped {
            self.forget_node(el);
        }
        dropped.len()
    }

    /// Unregister every element inside `root` (inclusive).
    pub(crate) fn unregister_within(&mut self, root: &Element) -> usize {
        self.retain_elements(|info| !root.contains(Some(&*info.element)))
    }

    /// Drop registry entries whose nodes are no longer in the document.
    pub fn prune_detached(&mut self) -> usize {
        self.retain_elements(|info| info.element.is_connected())
    }

    /// Point the registry at `new` wherever it referenced `old`.
    pub(crate) fn replace_element(&mut self, key: &str, old: &Element, new: &Element) {
        if let Some(infos) = self.elements.get_mut(key) {
            for info in infos.iter_mut().filter(|i| i.element == *old) {
                info.element = new.clone();
            }
        }
        self.forget_node(old);
        self.node_keys().set(new.as_ref(), &JsValue::from_str(key));
    }

    // ---- saving ----

    /// What a save must send; deletions map to `None`. See [`pending_for`].
    pub fn pending_changes(&self) -> BTreeMap<String, Option<String>> {
        pending_for(
            &self.original_content,
            &self.current_content,
            &self.saved_content_keys,
            &self.changed_templates(),
        )
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending_changes().is_empty()
    }

    /// Start a save. Any earlier in-flight save becomes stale.
    pub fn begin_save(&mut self) -> Option<SaveTicket> {
        let changes = self.pending_changes();
        if changes.is_empty() {
            return None;
        }
        self.save_generation += 1;
        Some(SaveTicket {
            generation: self.save_generation,
            changes,
        })
    }

    /// Abandon the in-flight save; its response will be ignored.
    pub fn cancel_save(&mut self) {
        self.save_generation += 1;
    }

    /// Apply a confirmed save. Returns `false` (and changes nothing) for a
    /// stale ticket.
    pub fn complete_save(&mut self, ticket: &SaveTicket, response: BatchUpdateResponse) -> bool {
        if ticket.generation != self.save_generation {
            tracing::debug!("ignoring response of an abandoned save");
            return false;
        }

        let keys = response.saved.len() + response.deleted.len();
        for (key, value) in response.saved {
            self.saved_content_keys.insert(key.clone());
            self.original_content.insert(key, value);
        }
        for key in response.deleted {
            self.saved_content_keys.remove(&key);
            self.original_content.remove(&key);
        }

        self.emit(SessionEvent::Saved { keys });
        true
    }
}

/// Changes between the baseline and the working state.
///
/// A key is sent when its working value differs from the baseline. A key that
/// was never saved is also sent when it belongs to an instance of a template
/// whose order changed, or to a group nested inside such a template: the new
/// order references those instances, and without their content a reload
/// would rebuild them empty. Only saved keys can be deleted.
///
/// `changed_templates` maps each template with a changed order to the groups
/// nested in its definition.
pub fn pending_for(
    original: &BTreeMap<String, String>,
    current: &BTreeMap<String, String>,
    saved_keys: &BTreeSet<String>,
    changed_templates: &BTreeMap<String, BTreeSet<String>>,
) -> BTreeMap<String, Option<String>> {
    let owned_by_changed_template = |key: &str| {
        let parsed = parse_key(key);
        let in_instance = matches!(
            (parsed.template_id, parsed.instance_id),
            (Some(t), Some(_)) if changed_templates.contains_key(t)
        );
        let in_nested_group = parsed
            .group_id
            .is_some_and(|g| changed_templates.values().any(|groups| groups.contains(g)));
        in_instance || in_nested_group
    };

    let mut out = BTreeMap::new();
    for (key, value) in current {
        if original.get(key) != Some(value)
            || (!saved_keys.contains(key) && owned_by_changed_template(key))
        {
            out.insert(key.clone(), Some(value.clone()));
        }
    }
    for key in original.keys() {
        if saved_keys.contains(key) && !current.contains_key(key) {
            out.insert(key.clone(), None);
        }
    }
    out
}
