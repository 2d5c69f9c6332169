//! The background copy of the instance tree.
//!
//! Components render here. Every structural or value change is recorded as a
//! [`SnapshotPatch`] once hydration has happened; before that the main thread
//! renders the first screen on its own and nothing is recorded.

use std::fmt;
use std::sync::Arc;

use snapshot_core::collections::map::HashMap;
use snapshot_core::diff::event_token;
use snapshot_core::template::ROOT_TEMPLATE;
use snapshot_core::{
    EventBinding, HandlerId, IdGenerator, InstanceId, InstanceSnapshot, PropValue, Result, SlotValue,
    SnapshotError, TemplateId, TemplateRegistry, WorkletDescriptor, WorkletValue,
};

use crate::patch::SnapshotPatch;

/// A background event callback.
pub type EventHandler = Arc<dyn Fn(&PropValue) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct BackgroundInstance {
    pub template: TemplateId,
    pub values: Vec<SlotValue>,
    pub children: Vec<InstanceId>,
    pub parent: Option<InstanceId>,
}

pub struct BackgroundTree {
    registry: Arc<TemplateRegistry>,
    instances: HashMap<InstanceId, BackgroundInstance>,
    ids: IdGenerator,
    root: InstanceId,
    handlers: HashMap<HandlerId, EventHandler>,
    next_handler: u64,
    next_exec_id: u64,
    patches: Vec<SnapshotPatch>,
    recording: bool,
}

impl BackgroundTree {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        let mut ids = IdGenerator::background();
        let root = ids.next_id();
        let mut instances = HashMap::default();
        instances.insert(
            root,
            BackgroundInstance {
                template: TemplateId::new(ROOT_TEMPLATE),
                values: Vec::new(),
                children: Vec::new(),
                parent: None,
            },
        );
        Self {
            registry,
            instances,
            ids,
            root,
            handlers: HashMap::default(),
            next_handler: 1,
            next_exec_id: 1,
            patches: Vec::new(),
            recording: false,
        }
    }

    pub fn root(&self) -> InstanceId {
        self.root
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn instance(&self, id: InstanceId) -> Option<&BackgroundInstance> {
        self.instances.get(&id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn children(&self, id: InstanceId) -> &[InstanceId] {
        self.instances
            .get(&id)
            .map(|i| i.children.as_slice())
            .unwrap_or_default()
    }

    fn try_get(&self, id: InstanceId) -> Result<&BackgroundInstance> {
        self.instances
            .get(&id)
            .ok_or(SnapshotError::InstanceMissing { id })
    }

    fn try_get_mut(&mut self, id: InstanceId) -> Result<&mut BackgroundInstance> {
        self.instances
            .get_mut(&id)
            .ok_or(SnapshotError::InstanceMissing { id })
    }

    /// Starts recording patches. Called once hydration is done.
    pub fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    fn record(&mut self, patch: SnapshotPatch) {
        if self.recording {
            log::trace!("patch: {patch}");
            self.patches.push(patch);
        }
    }

    pub fn take_patches(&mut self) -> Vec<SnapshotPatch> {
        std::mem::take(&mut self.patches)
    }

    pub fn has_patches(&self) -> bool {
        !self.patches.is_empty()
    }

    pub fn create_instance(&mut self, template: &TemplateId) -> Result<InstanceId> {
        let resolved = self.registry.lookup(template)?;
        let id = self.ids.next_id();
        self.instances.insert(
            id,
            BackgroundInstance {
                template: template.clone(),
                values: vec![SlotValue::Empty; resolved.expression_count()],
                children: Vec::new(),
                parent: None,
            },
        );
        self.record(SnapshotPatch::CreateElement {
            template: template.clone(),
            id,
        });
        Ok(id)
    }

    pub fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: Option<InstanceId>) -> Result<()> {
        let mut ancestor = Some(parent);
        while let Some(id) = ancestor {
            if id == child {
                return Err(SnapshotError::CyclicInsert { parent, child });
            }
            ancestor = self.try_get(id)?.parent;
        }
        let siblings = &self.try_get(parent)?.children;
        if let Some(before) = before {
            if before == child || !siblings.contains(&before) {
                return Err(SnapshotError::InstanceMissing { id: before });
            }
        }
        if let Some(previous) = self.try_get(child)?.parent {
            if let Some(previous) = self.instances.get_mut(&previous) {
                previous.children.retain(|c| *c != child);
            }
        }
        let parent_instance = self.try_get_mut(parent)?;
        let position = before
            .and_then(|before| parent_instance.children.iter().position(|c| *c == before))
            .unwrap_or(parent_instance.children.len());
        parent_instance.children.insert(position, child);
        self.try_get_mut(child)?.parent = Some(parent);
        self.record(SnapshotPatch::InsertBefore { parent, child, before });
        Ok(())
    }

    /// Removes `child` and destroys its subtree. Returns the destroyed ids.
    pub fn remove_child(&mut self, parent: InstanceId, child: InstanceId) -> Result<Vec<InstanceId>> {
        let parent_instance = self.try_get_mut(parent)?;
        let before = parent_instance.children.len();
        parent_instance.children.retain(|c| *c != child);
        if parent_instance.children.len() == before {
            return Err(SnapshotError::InstanceMissing { id: child });
        }
        self.record(SnapshotPatch::RemoveChild { parent, child });
        let mut destroyed = Vec::new();
        self.destroy(child, &mut destroyed);
        Ok(destroyed)
    }

    fn destroy(&mut self, id: InstanceId, destroyed: &mut Vec<InstanceId>) {
        let Some(instance) = self.instances.remove(&id) else {
            return;
        };
        for value in &instance.values {
            self.release_handlers(value);
        }
        destroyed.push(id);
        for child in instance.children {
            self.destroy(child, destroyed);
        }
    }

    fn release_handlers(&mut self, value: &SlotValue) {
        let mut handlers = Vec::new();
        collect_handlers(value, &mut handlers);
        for handler in handlers {
            self.handlers.remove(&handler);
        }
    }

    /// Drops handlers bound in `old` that `new` no longer references.
    fn release_replaced(&mut self, old: &SlotValue, new: &SlotValue) {
        let mut kept = Vec::new();
        collect_handlers(new, &mut kept);
        let mut released = Vec::new();
        collect_handlers(old, &mut released);
        for handler in released {
            if !kept.contains(&handler) {
                self.handlers.remove(&handler);
            }
        }
    }

    pub fn value(&self, id: InstanceId, index: usize) -> Option<&SlotValue> {
        self.instances.get(&id)?.values.get(index)
    }

    /// Stores a value and records it. Equal values record nothing.
    pub fn set_value(&mut self, id: InstanceId, index: usize, mut value: SlotValue) -> Result<()> {
        let instance = self.try_get(id)?;
        let Some(old) = instance.values.get(index) else {
            return Err(SnapshotError::TemplateShapeMismatch {
                template: instance.template.to_string(),
                detail: format!("expression {index} out of range ({})", instance.values.len()),
            });
        };
        if *old == value {
            return Ok(());
        }
        let old = old.clone();
        self.stamp_exec_ids(&mut value);
        self.release_replaced(&old, &value);
        self.try_get_mut(id)?.values[index] = value;
        if self.recording {
            let value = self.wire_value(id, index);
            self.record(SnapshotPatch::SetAttribute { id, index, value });
        }
        Ok(())
    }

    /// Replaces every value of `id`, recorded as one operation.
    pub fn set_values(&mut self, id: InstanceId, values: Vec<SlotValue>) -> Result<()> {
        let instance = self.try_get(id)?;
        if values.len() != instance.values.len() {
            return Err(SnapshotError::TemplateShapeMismatch {
                template: instance.template.to_string(),
                detail: format!("expected {} values, got {}", instance.values.len(), values.len()),
            });
        }
        if instance.values == values {
            return Ok(());
        }
        let old = std::mem::take(&mut self.try_get_mut(id)?.values);
        let mut values = values;
        for (old, new) in old.iter().zip(values.iter_mut()) {
            self.stamp_exec_ids(new);
            self.release_replaced(old, new);
        }
        self.try_get_mut(id)?.values = values;
        if self.recording {
            let values = self.wire_values(id);
            self.record(SnapshotPatch::SetAttributes { id, values });
        }
        Ok(())
    }

    /// Registers `handler` and binds it to expression `index` of `id`.
    pub fn on(
        &mut self,
        id: InstanceId,
        index: usize,
        handler: impl Fn(&PropValue) + Send + Sync + 'static,
    ) -> Result<HandlerId> {
        let handler_id = self.add_handler(handler);
        self.set_value(id, index, SlotValue::event(handler_id))?;
        Ok(handler_id)
    }

    /// Registers a handler without binding it, for use inside spreads.
    pub fn add_handler(&mut self, handler: impl Fn(&PropValue) + Send + Sync + 'static) -> HandlerId {
        let handler_id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.insert(handler_id, Arc::new(handler));
        handler_id
    }

    /// The handler currently bound at `(id, index, spread_key)`.
    pub fn handler_at(&self, id: InstanceId, index: usize, spread_key: &str) -> Option<EventHandler> {
        let value = self.value(id, index)?;
        let value = if spread_key.is_empty() {
            value
        } else {
            match value {
                SlotValue::Spread(map) => map.get(spread_key)?,
                _ => return None,
            }
        };
        match value {
            SlotValue::Event(EventBinding::Handler(handler)) => self.handlers.get(handler).cloned(),
            _ => None,
        }
    }

    fn stamp_exec_ids(&mut self, value: &mut SlotValue) {
        let next = &mut self.next_exec_id;
        let mut stamp = |worklet: &mut WorkletDescriptor| {
            if worklet.exec_id.is_none() {
                worklet.exec_id = Some(*next);
                *next += 1;
            }
        };
        match value {
            SlotValue::Worklet(WorkletValue::Function(worklet)) => stamp(worklet),
            SlotValue::Gesture(gesture) => gesture.for_each_worklet_mut(&mut stamp),
            SlotValue::Spread(map) => {
                for value in map.values_mut() {
                    self.stamp_exec_ids(value);
                }
            }
            _ => {}
        }
    }

    /// The value as the main thread sees it: handlers become tokens.
    pub fn wire_value(&self, id: InstanceId, index: usize) -> SlotValue {
        self.value(id, index)
            .map(|value| to_wire(value, id, index, ""))
            .unwrap_or_default()
    }

    pub fn wire_values(&self, id: InstanceId) -> Vec<SlotValue> {
        let count = self.instances.get(&id).map_or(0, |i| i.values.len());
        (0..count).map(|index| self.wire_value(id, index)).collect()
    }

    /// Serializes the subtree at `id` in wire form.
    pub fn serialize(&self, id: InstanceId) -> Result<InstanceSnapshot> {
        let instance = self.try_get(id)?;
        Ok(InstanceSnapshot {
            id,
            template: instance.template.clone(),
            values: self.wire_values(id),
            children: instance
                .children
                .iter()
                .map(|child| self.serialize(*child))
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

fn collect_handlers(value: &SlotValue, out: &mut Vec<HandlerId>) {
    match value {
        SlotValue::Event(EventBinding::Handler(handler)) => out.push(*handler),
        SlotValue::Spread(map) => map.values().for_each(|value| collect_handlers(value, out)),
        _ => {}
    }
}

fn to_wire(value: &SlotValue, id: InstanceId, index: usize, spread_key: &str) -> SlotValue {
    match value {
        SlotValue::Event(EventBinding::Handler(_)) => {
            SlotValue::Event(EventBinding::Token(event_token(id, index, spread_key)))
        }
        SlotValue::Spread(map) => SlotValue::Spread(
            map.iter()
                .map(|(key, value)| (key.clone(), to_wire(value, id, index, key)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl fmt::Debug for BackgroundTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTree")
            .field("root", &self.root)
            .field("instances", &self.instances.len())
            .field("handlers", &self.handlers.len())
            .field("recording", &self.recording)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
