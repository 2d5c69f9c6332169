//! Immutable snapshot templates and the registry that owns them.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::collections::map::HashMap;
use crate::error::{Result, SnapshotError};
use crate::native::{ElementHandle, ElementKind, NativeApi};
use crate::updaters::SlotUpdate;
use crate::value::SlotValue;

pub const ROOT_TEMPLATE: &str = "root";
pub const MTC_PLACEHOLDER_TEMPLATE: &str = "__mtc_placeholder";
pub const MTC_SLOT_TEMPLATE: &str = "__mtc_slot";

/// Registry key, already scoped with its bundle entry (`entry:id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(String);

impl TemplateId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn scoped(entry: Option<&str>, id: &str) -> Self {
        match entry {
            Some(entry) => Self(format!("{entry}:{id}")),
            None => Self(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Where children of an instance attach, by element index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotPart {
    /// Every child attaches under this element.
    Children(usize),
    /// Child `i` attaches under slot `i`.
    Slot(usize),
    /// Children are list items, rendered when the engine asks for them.
    List(usize),
}

impl SlotPart {
    pub fn element_index(self) -> usize {
        match self {
            SlotPart::Children(index) | SlotPart::Slot(index) | SlotPart::List(index) => index,
        }
    }
}

pub type CreateFn = Arc<dyn Fn(&mut dyn NativeApi) -> Vec<ElementHandle> + Send + Sync>;
pub type ApplyFn = Arc<dyn Fn(&mut SlotUpdate<'_>) -> Result<()> + Send + Sync>;

/// Updater for one dynamic expression.
#[derive(Clone)]
pub struct SlotUpdater {
    pub element_index: usize,
    pub name: String,
    accepts: fn(&SlotValue) -> bool,
    apply: ApplyFn,
}

impl SlotUpdater {
    pub fn new(
        element_index: usize,
        name: impl Into<String>,
        accepts: fn(&SlotValue) -> bool,
        apply: impl Fn(&mut SlotUpdate<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            element_index,
            name: name.into(),
            accepts,
            apply: Arc::new(apply),
        }
    }

    pub fn accepts(&self, value: &SlotValue) -> bool {
        (self.accepts)(value)
    }

    pub(crate) fn apply(&self, update: &mut SlotUpdate<'_>) -> Result<()> {
        (self.apply)(update)
    }
}

impl fmt::Debug for SlotUpdater {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotUpdater")
            .field("element_index", &self.element_index)
            .field("name", &self.name)
            .finish()
    }
}

pub struct SnapshotTemplate {
    id: String,
    entry: Option<String>,
    create: CreateFn,
    updaters: Vec<SlotUpdater>,
    slots: Vec<SlotPart>,
    css_id: Option<u32>,
    element_count: Option<usize>,
}

impl SnapshotTemplate {
    pub fn builder(id: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            id: id.into(),
            entry: None,
            create: None,
            updaters: Vec::new(),
            slots: Vec::new(),
            css_id: None,
            element_count: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn scoped_id(&self) -> TemplateId {
        TemplateId::scoped(self.entry(), &self.id)
    }

    pub fn updaters(&self) -> &[SlotUpdater] {
        &self.updaters
    }

    pub fn updater(&self, index: usize) -> Option<&SlotUpdater> {
        self.updaters.get(index)
    }

    pub fn slots(&self) -> &[SlotPart] {
        &self.slots
    }

    pub fn css_id(&self) -> Option<u32> {
        self.css_id
    }

    pub fn expression_count(&self) -> usize {
        self.updaters.len()
    }

    /// Element index that child `position` attaches under.
    pub fn slot_element(&self, position: usize) -> Option<usize> {
        match self.slots.first() {
            Some(SlotPart::Children(index)) => Some(*index),
            Some(SlotPart::Slot(_)) => self.slots.get(position).map(|p| p.element_index()),
            Some(SlotPart::List(_)) | None => None,
        }
    }

    /// Runs the factory and checks it produced the declared element count.
    pub fn create_elements(&self, native: &mut dyn NativeApi) -> Result<Vec<ElementHandle>> {
        let elements = (self.create)(native);
        if elements.is_empty() {
            return Err(SnapshotError::shape(self.scoped_id().as_str(), "factory produced no elements"));
        }
        if let Some(expected) = self.element_count {
            if elements.len() != expected {
                return Err(SnapshotError::shape(
                    self.scoped_id().as_str(),
                    format!("factory produced {} elements, expected {expected}", elements.len()),
                ));
            }
        }
        let referenced = self
            .updaters
            .iter()
            .map(|updater| updater.element_index)
            .chain(self.slots.iter().map(|part| part.element_index()))
            .max();
        if let Some(highest) = referenced {
            if highest >= elements.len() {
                return Err(SnapshotError::shape(
                    self.scoped_id().as_str(),
                    format!("factory produced {} elements, element {highest} is referenced", elements.len()),
                ));
            }
        }
        Ok(elements)
    }
}

impl fmt::Debug for SnapshotTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotTemplate")
            .field("id", &self.scoped_id())
            .field("updaters", &self.updaters)
            .field("slots", &self.slots)
            .field("css_id", &self.css_id)
            .finish()
    }
}

pub struct TemplateBuilder {
    id: String,
    entry: Option<String>,
    create: Option<CreateFn>,
    updaters: Vec<SlotUpdater>,
    slots: Vec<SlotPart>,
    css_id: Option<u32>,
    element_count: Option<usize>,
}

impl TemplateBuilder {
    pub fn create(
        mut self,
        create: impl Fn(&mut dyn NativeApi) -> Vec<ElementHandle> + Send + Sync + 'static,
    ) -> Self {
        self.create = Some(Arc::new(create));
        self
    }

    pub fn updater(mut self, updater: SlotUpdater) -> Self {
        self.updaters.push(updater);
        self
    }

    pub fn children(mut self, element_index: usize) -> Self {
        self.slots.push(SlotPart::Children(element_index));
        self
    }

    pub fn slot(mut self, element_index: usize) -> Self {
        self.slots.push(SlotPart::Slot(element_index));
        self
    }

    pub fn list(mut self, element_index: usize) -> Self {
        self.slots.push(SlotPart::List(element_index));
        self
    }

    pub fn css_id(mut self, css_id: u32) -> Self {
        self.css_id = Some(css_id);
        self
    }

    pub fn entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = Some(entry.into());
        self
    }

    pub fn element_count(mut self, count: usize) -> Self {
        self.element_count = Some(count);
        self
    }

    pub fn build(self) -> Result<SnapshotTemplate> {
        let scoped = TemplateId::scoped(self.entry.as_deref(), &self.id);
        let Some(create) = self.create else {
            return Err(SnapshotError::shape(scoped.as_str(), "no element factory"));
        };
        let has_exclusive_part = self
            .slots
            .iter()
            .any(|p| matches!(p, SlotPart::Children(_) | SlotPart::List(_)));
        if has_exclusive_part && self.slots.len() > 1 {
            return Err(SnapshotError::shape(
                scoped.as_str(),
                "a children or list part cannot be combined with other slot parts",
            ));
        }
        if let Some(count) = self.element_count {
            for updater in &self.updaters {
                if updater.element_index >= count {
                    return Err(SnapshotError::shape(
                        scoped.as_str(),
                        format!(
                            "updater `{}` targets element {} of {count}",
                            updater.name, updater.element_index
                        ),
                    ));
                }
            }
            for part in &self.slots {
                if part.element_index() >= count {
                    return Err(SnapshotError::shape(
                        scoped.as_str(),
                        format!("slot part targets element {} of {count}", part.element_index()),
                    ));
                }
            }
        }
        Ok(SnapshotTemplate {
            id: self.id,
            entry: self.entry,
            create,
            updaters: self.updaters,
            slots: self.slots,
            css_id: self.css_id,
            element_count: self.element_count,
        })
    }
}

/// Append-only template table shared between threads.
pub struct TemplateRegistry {
    templates: RwLock<HashMap<TemplateId, Arc<SnapshotTemplate>>>,
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRegistry {
    /// A registry holding the built-in page root and MTC templates.
    pub fn new() -> Self {
        let registry = Self::empty();
        for template in builtin::templates() {
            registry.register(template);
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            templates: RwLock::new(HashMap::default()),
        }
    }

    /// Registers under the template's scoped id. The first registration wins.
    pub fn register(&self, template: SnapshotTemplate) -> Arc<SnapshotTemplate> {
        let id = template.scoped_id();
        let mut templates = self.templates.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = templates.get(&id) {
            log::debug!("template `{id}` already registered; keeping the first definition");
            return Arc::clone(existing);
        }
        let template = Arc::new(template);
        templates.insert(id, Arc::clone(&template));
        template
    }

    pub fn lookup(&self, id: &TemplateId) -> Result<Arc<SnapshotTemplate>> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| SnapshotError::TemplateNotFound {
                id: id.to_string(),
            })
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.templates.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids_for_entry(&self, entry: Option<&str>) -> Vec<TemplateId> {
        let templates = self.templates.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<TemplateId> = templates
            .values()
            .filter(|t| t.entry() == entry)
            .map(|t| t.scoped_id())
            .collect();
        ids.sort();
        ids
    }

    /// View that registers and resolves ids under one bundle entry.
    pub fn scope<'a>(&'a self, entry: &'a str) -> ScopedRegistry<'a> {
        ScopedRegistry {
            registry: self,
            entry,
        }
    }
}

pub struct ScopedRegistry<'a> {
    registry: &'a TemplateRegistry,
    entry: &'a str,
}

impl ScopedRegistry<'_> {
    pub fn entry(&self) -> &str {
        self.entry
    }

    pub fn id(&self, id: &str) -> TemplateId {
        TemplateId::scoped(Some(self.entry), id)
    }

    pub fn register(&self, mut template: SnapshotTemplate) -> Arc<SnapshotTemplate> {
        template.entry = Some(self.entry.to_string());
        self.registry.register(template)
    }

    /// Never falls back to the unscoped or another entry's template.
    pub fn lookup(&self, id: &str) -> Result<Arc<SnapshotTemplate>> {
        self.registry.lookup(&self.id(id))
    }
}

pub(crate) mod builtin {
    use super::*;

    pub(crate) fn templates() -> Vec<SnapshotTemplate> {
        let root = SnapshotTemplate {
            id: ROOT_TEMPLATE.to_string(),
            entry: None,
            create: Arc::new(|native: &mut dyn NativeApi| vec![native.create_page()]),
            updaters: Vec::new(),
            slots: vec![SlotPart::Children(0)],
            css_id: None,
            element_count: Some(1),
        };
        let wrapper = |id: &str| SnapshotTemplate {
            id: id.to_string(),
            entry: None,
            create: Arc::new(|native: &mut dyn NativeApi| {
                vec![native.create_element(&ElementKind::Wrapper)]
            }),
            updaters: Vec::new(),
            slots: vec![SlotPart::Children(0)],
            css_id: None,
            element_count: Some(1),
        };
        vec![root, wrapper(MTC_PLACEHOLDER_TEMPLATE), wrapper(MTC_SLOT_TEMPLATE)]
    }
}
