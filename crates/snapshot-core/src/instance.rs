//! Snapshot instances and the arena that owns them.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collections::map::HashMap;
use crate::error::{Result, SnapshotError};
use crate::native::ElementHandle;
use crate::template::{SnapshotTemplate, TemplateId};
use crate::value::SlotValue;
use crate::worklet::WorkletRefDescriptor;
use crate::{InstanceId, Key};

/// One mounted occurrence of a template.
#[derive(Debug)]
pub struct SnapshotInstance {
    pub(crate) id: InstanceId,
    pub(crate) template: Arc<SnapshotTemplate>,
    pub(crate) key: Option<Key>,
    /// Values already pushed to the engine (or to be bound on materialization).
    pub(crate) values: Vec<SlotValue>,
    /// Values set since the last commit, applied in ascending index order.
    pub(crate) pending: BTreeMap<usize, SlotValue>,
    pub(crate) children: Vec<InstanceId>,
    /// Children as currently attached in the engine.
    pub(crate) attached: Vec<InstanceId>,
    pub(crate) parent: Option<InstanceId>,
    pub(crate) elements: Option<Vec<ElementHandle>>,
    pub(crate) worklet_refs: Vec<WorkletRefDescriptor>,
}

impl SnapshotInstance {
    pub(crate) fn new(id: InstanceId, template: Arc<SnapshotTemplate>) -> Self {
        let values = vec![SlotValue::Empty; template.expression_count()];
        Self {
            id,
            template,
            key: None,
            values,
            pending: BTreeMap::new(),
            children: Vec::new(),
            attached: Vec::new(),
            parent: None,
            elements: None,
            worklet_refs: Vec::new(),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn template(&self) -> &Arc<SnapshotTemplate> {
        &self.template
    }

    pub fn key(&self) -> Option<Key> {
        self.key
    }

    /// Current value of a slot, including changes not yet committed.
    pub fn value(&self, index: usize) -> Option<&SlotValue> {
        self.pending.get(&index).or_else(|| self.values.get(index))
    }

    pub fn values(&self) -> Vec<SlotValue> {
        (0..self.values.len())
            .filter_map(|index| self.value(index).cloned())
            .collect()
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    pub fn parent(&self) -> Option<InstanceId> {
        self.parent
    }

    pub fn elements(&self) -> Option<&[ElementHandle]> {
        self.elements.as_deref()
    }

    pub fn is_materialized(&self) -> bool {
        self.elements.is_some()
    }

    pub fn root_element(&self) -> Option<ElementHandle> {
        self.elements.as_ref().and_then(|e| e.first().copied())
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty() || self.children != self.attached
    }
}

/// Serialized instance tree, shipped from the main thread for hydration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: InstanceId,
    pub template: TemplateId,
    #[serde(default)]
    pub values: Vec<SlotValue>,
    #[serde(default)]
    pub children: Vec<InstanceSnapshot>,
}

impl InstanceSnapshot {
    /// Number of instances in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(InstanceSnapshot::count).sum::<usize>()
    }
}

/// Slot storage for instances, indexed by id.
#[derive(Debug, Default)]
pub struct InstanceArena {
    slots: Vec<Option<SnapshotInstance>>,
    index: HashMap<InstanceId, usize>,
    free: Vec<usize>,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: SnapshotInstance) -> Result<()> {
        let id = instance.id;
        if self.index.contains_key(&id) {
            return Err(SnapshotError::DuplicateInstance { id });
        }
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(instance);
                slot
            }
            None => {
                self.slots.push(Some(instance));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        Ok(())
    }

    pub fn get(&self, id: InstanceId) -> Option<&SnapshotInstance> {
        let slot = *self.index.get(&id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut SnapshotInstance> {
        let slot = *self.index.get(&id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn try_get(&self, id: InstanceId) -> Result<&SnapshotInstance> {
        self.get(id).ok_or(SnapshotError::InstanceMissing { id })
    }

    pub fn try_get_mut(&mut self, id: InstanceId) -> Result<&mut SnapshotInstance> {
        self.get_mut(id).ok_or(SnapshotError::InstanceMissing { id })
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<SnapshotInstance> {
        let slot = self.index.remove(&id)?;
        let instance = self.slots.get_mut(slot)?.take();
        self.free.push(slot);
        instance
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.index.keys().copied().collect();
        ids.sort();
        ids
    }
}
