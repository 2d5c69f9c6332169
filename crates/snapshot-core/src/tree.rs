//! The instance tree owned by the main thread.

use std::fmt::Write as _;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::collections::map::HashMap;
use crate::diff::{match_children, ChildSignature, ElementSpec};
use crate::error::{Result, SnapshotError};
use crate::instance::{InstanceArena, InstanceSnapshot, SnapshotInstance};
use crate::list::ListRegistry;
use crate::mtc::MtcRegistry;
use crate::native::{ElementHandle, NativeApi};
use crate::options::RuntimeOptions;
use crate::platform::RuntimeScheduler;
use crate::template::{SlotPart, SnapshotTemplate, TemplateId, TemplateRegistry, ROOT_TEMPLATE};
use crate::updaters::UpdateEffects;
use crate::value::SlotValue;
use crate::worklet::{RecordingWorkletRuntime, WorkletRuntime};
use crate::{IdGenerator, InstanceId};

pub struct SnapshotTree<N: NativeApi> {
    pub(crate) registry: Arc<TemplateRegistry>,
    pub(crate) arena: InstanceArena,
    pub(crate) native: N,
    pub(crate) worklets: Box<dyn WorkletRuntime + Send>,
    pub(crate) options: RuntimeOptions,
    pub(crate) effects: UpdateEffects,
    /// Removed from their parent since the last commit.
    pub(crate) detached: IndexSet<InstanceId>,
    /// Factory output waiting for its instance to be materialized.
    pub(crate) prepared: HashMap<InstanceId, Vec<ElementHandle>>,
    pub(crate) mtc: MtcRegistry,
    pub(crate) lists: ListRegistry,
    pub(crate) lifetime_ended: bool,
    pub(crate) operation_id: u64,
    ids: IdGenerator,
    scheduler: Option<Arc<dyn RuntimeScheduler>>,
    commit_requested: bool,
    page: ElementHandle,
}

impl<N: NativeApi> SnapshotTree<N> {
    pub fn new(registry: Arc<TemplateRegistry>, native: N) -> Result<Self> {
        Self::with_options(registry, native, RuntimeOptions::default())
    }

    /// Creates the page root (`-1`) and registers for engine signals.
    pub fn with_options(registry: Arc<TemplateRegistry>, mut native: N, options: RuntimeOptions) -> Result<Self> {
        let root_template = registry.lookup(&TemplateId::new(ROOT_TEMPLATE))?;
        let mut root = SnapshotInstance::new(InstanceId::ROOT, Arc::clone(&root_template));
        let elements = root_template.create_elements(&mut native)?;
        let page = elements[0];
        root.elements = Some(elements);
        let mut arena = InstanceArena::new();
        arena.insert(root)?;
        native.add_lifecycle_listener();
        Ok(Self {
            registry,
            arena,
            native,
            worklets: Box::new(RecordingWorkletRuntime::new()),
            options,
            effects: UpdateEffects::default(),
            detached: IndexSet::new(),
            prepared: HashMap::default(),
            mtc: MtcRegistry::default(),
            lists: ListRegistry::default(),
            lifetime_ended: false,
            operation_id: 0,
            ids: IdGenerator::main_thread(),
            scheduler: None,
            commit_requested: false,
            page,
        })
    }

    pub fn set_scheduler(&mut self, scheduler: Arc<dyn RuntimeScheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn set_worklet_runtime(&mut self, worklets: Box<dyn WorkletRuntime + Send>) {
        self.worklets = worklets;
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    pub fn root(&self) -> InstanceId {
        InstanceId::ROOT
    }

    pub fn page(&self) -> ElementHandle {
        self.page
    }

    pub fn instance(&self, id: InstanceId) -> Option<&SnapshotInstance> {
        self.arena.get(id)
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.arena.contains(id)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.arena.ids()
    }

    pub fn children(&self, id: InstanceId) -> Result<&[InstanceId]> {
        Ok(self.arena.try_get(id)?.children())
    }

    pub fn is_lifetime_ended(&self) -> bool {
        self.lifetime_ended
    }

    /// Whether the next commit has anything to apply. Instances not mounted
    /// under the root are ignored until they are.
    pub fn is_dirty(&self) -> bool {
        !self.detached.is_empty()
            || self.lists.has_pending()
            || self
                .preorder()
                .into_iter()
                .filter_map(|id| self.arena.get(id))
                .any(|instance| instance.is_dirty() || !instance.is_materialized())
    }

    /// New instance with a main-thread id, every value `Empty`.
    pub fn create_instance(&mut self, template: &TemplateId) -> Result<InstanceId> {
        let template = self.registry.lookup(template)?;
        let id = self.ids.next_id();
        self.arena.insert(SnapshotInstance::new(id, template))?;
        Ok(id)
    }

    /// New instance under an id chosen elsewhere (the background thread).
    pub fn create_instance_with_id(&mut self, template: &TemplateId, id: InstanceId) -> Result<InstanceId> {
        let template = self.registry.lookup(template)?;
        self.arena.insert(SnapshotInstance::new(id, template))?;
        Ok(id)
    }

    /// Creates elements for `id` and its children if needed.
    pub fn ensure_elements(&mut self, id: InstanceId) -> Result<&[ElementHandle]> {
        self.materialize(id)?;
        let instance = self.arena.try_get(id)?;
        Ok(instance.elements.as_deref().unwrap_or_default())
    }

    pub(crate) fn materialize(&mut self, id: InstanceId) -> Result<bool> {
        let instance = self.arena.try_get_mut(id)?;
        if instance.is_materialized() {
            return Ok(false);
        }
        let template = Arc::clone(&instance.template);
        for (index, value) in std::mem::take(&mut instance.pending) {
            instance.values[index] = value;
        }
        let values = instance.values.clone();
        let children = instance.children.clone();
        check_slot_parts(&template, children.len())?;

        let elements = match self.prepared.remove(&id) {
            Some(elements) => elements,
            None => template.create_elements(&mut self.native)?,
        };
        if let Some(css_id) = template.css_id() {
            self.native.set_css_id(&elements, css_id, template.entry());
        }
        self.arena.try_get_mut(id)?.elements = Some(elements.clone());

        for (index, value) in values.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            self.run_updater(id, index, &SlotValue::Empty, value, true)?;
        }
        if let Some(SlotPart::List(index)) = template.slots().first() {
            if let Some(list) = elements.get(*index) {
                self.lists.open(id, *list);
            }
            return Ok(true);
        }
        for (position, child) in children.iter().enumerate() {
            self.materialize(*child)?;
            let Some(slot) = template.slot_element(position).and_then(|i| elements.get(i).copied()) else {
                continue;
            };
            if let Some(root) = self.arena.get(*child).and_then(SnapshotInstance::root_element) {
                self.native.append_element(slot, root);
            }
        }
        self.arena.try_get_mut(id)?.attached = children;
        Ok(true)
    }

    /// Inserts `child` before `before` (or last). A child attached elsewhere
    /// is moved and kept alive.
    pub fn insert_before(&mut self, parent: InstanceId, child: InstanceId, before: Option<InstanceId>) -> Result<()> {
        let mut ancestor = Some(parent);
        while let Some(id) = ancestor {
            if id == child {
                return Err(SnapshotError::CyclicInsert { parent, child });
            }
            ancestor = self.arena.try_get(id)?.parent;
        }
        let siblings = &self.arena.try_get(parent)?.children;
        if let Some(before) = before {
            if before == child || !siblings.contains(&before) {
                return Err(SnapshotError::InstanceMissing { id: before });
            }
        }
        if let Some(previous) = self.arena.try_get(child)?.parent {
            if let Some(previous) = self.arena.get_mut(previous) {
                previous.children.retain(|c| *c != child);
            }
        }
        let parent_instance = self.arena.try_get_mut(parent)?;
        let position = before
            .and_then(|before| parent_instance.children.iter().position(|c| *c == before))
            .unwrap_or(parent_instance.children.len());
        parent_instance.children.insert(position, child);
        self.arena.try_get_mut(child)?.parent = Some(parent);
        self.detached.shift_remove(&child);
        self.request_commit();
        Ok(())
    }

    /// Detaches `child`; it is destroyed at the end of the next commit unless
    /// re-parented before then.
    pub fn remove_child(&mut self, parent: InstanceId, child: InstanceId) -> Result<()> {
        self.unlink(parent, child)?;
        self.detached.insert(child);
        self.request_commit();
        Ok(())
    }

    /// Detaches `child` without scheduling its destruction.
    pub fn remove_child_keep_subtree(&mut self, parent: InstanceId, child: InstanceId) -> Result<()> {
        self.unlink(parent, child)?;
        self.request_commit();
        Ok(())
    }

    fn unlink(&mut self, parent: InstanceId, child: InstanceId) -> Result<()> {
        let parent_instance = self.arena.try_get_mut(parent)?;
        let before = parent_instance.children.len();
        parent_instance.children.retain(|c| *c != child);
        if parent_instance.children.len() == before {
            return Err(SnapshotError::InstanceMissing { id: child });
        }
        if let Some(child) = self.arena.get_mut(child) {
            child.parent = None;
        }
        Ok(())
    }

    /// Stages a slot value. Materialized instances apply it at the next commit.
    pub fn set_value(&mut self, id: InstanceId, index: usize, value: SlotValue) -> Result<()> {
        let instance = self.arena.try_get_mut(id)?;
        if index >= instance.values.len() {
            return Err(SnapshotError::shape(
                instance.template.scoped_id().as_str(),
                format!("expression {index} out of range ({})", instance.values.len()),
            ));
        }
        if !instance.is_materialized() {
            instance.values[index] = value;
            return Ok(());
        }
        if instance.values[index] == value {
            instance.pending.remove(&index);
        } else {
            instance.pending.insert(index, value);
            self.request_commit();
        }
        Ok(())
    }

    pub fn set_values(&mut self, id: InstanceId, values: Vec<SlotValue>) -> Result<()> {
        let instance = self.arena.try_get(id)?;
        if values.len() != instance.values.len() {
            return Err(SnapshotError::shape(
                instance.template.scoped_id().as_str(),
                format!("expected {} values, got {}", instance.values.len(), values.len()),
            ));
        }
        for (index, value) in values.into_iter().enumerate() {
            self.set_value(id, index, value)?;
        }
        Ok(())
    }

    /// Brings the children of `parent` in line with `specs`, reusing matched
    /// instances and creating the rest.
    pub fn reconcile_children(&mut self, parent: InstanceId, specs: Vec<ElementSpec>) -> Result<Vec<InstanceId>> {
        self.arena.try_get(parent)?;
        self.check_specs(&specs)?;
        self.reconcile_checked(parent, specs)
    }

    fn check_specs(&self, specs: &[ElementSpec]) -> Result<()> {
        for spec in specs {
            let template = self.registry.lookup(&spec.template)?;
            if !spec.values.is_empty() && spec.values.len() != template.expression_count() {
                return Err(SnapshotError::shape(
                    spec.template.as_str(),
                    format!("expected {} values, got {}", template.expression_count(), spec.values.len()),
                ));
            }
            self.check_specs(&spec.children)?;
        }
        Ok(())
    }

    fn reconcile_checked(&mut self, parent: InstanceId, specs: Vec<ElementSpec>) -> Result<Vec<InstanceId>> {
        let old: Vec<ChildSignature> = self
            .arena
            .try_get(parent)?
            .children
            .iter()
            .filter_map(|id| self.arena.get(*id))
            .map(|child| ChildSignature {
                id: child.id,
                key: child.key,
                template: child.template.scoped_id(),
            })
            .collect();
        let matched = match_children(&old, &specs);

        let mut next = Vec::with_capacity(specs.len());
        for (spec, reuse) in specs.into_iter().zip(matched) {
            let id = match reuse {
                Some(id) => id,
                None => {
                    let id = self.create_instance(&spec.template)?;
                    self.arena.try_get_mut(id)?.key = spec.key;
                    id
                }
            };
            if !spec.values.is_empty() {
                self.set_values(id, spec.values)?;
            }
            self.reconcile_checked(id, spec.children)?;
            next.push(id);
        }

        for child in &old {
            if !next.contains(&child.id) {
                self.remove_child(parent, child.id)?;
            }
        }
        for id in &next {
            if let Some(child) = self.arena.get_mut(*id) {
                child.parent = Some(parent);
            }
            self.detached.shift_remove(id);
        }
        let parent_instance = self.arena.try_get_mut(parent)?;
        if parent_instance.children != next {
            parent_instance.children = next.clone();
            self.request_commit();
        }
        Ok(next)
    }

    /// Serializes the subtree rooted at `id` with its current values.
    pub fn serialize(&self, id: InstanceId) -> Result<InstanceSnapshot> {
        let instance = self.arena.try_get(id)?;
        let children = instance
            .children
            .iter()
            .map(|child| self.serialize(*child))
            .collect::<Result<Vec<_>>>()?;
        Ok(InstanceSnapshot {
            id,
            template: instance.template.scoped_id(),
            values: instance.values(),
            children,
        })
    }

    pub fn dump(&self) -> String {
        let mut output = String::new();
        self.dump_instance(&mut output, InstanceId::ROOT, 0);
        output
    }

    fn dump_instance(&self, output: &mut String, id: InstanceId, depth: usize) {
        let indent = "  ".repeat(depth);
        let Some(instance) = self.arena.get(id) else {
            let _ = writeln!(output, "{indent}[{id}] (missing)");
            return;
        };
        let _ = write!(output, "{indent}[{id}] {}", instance.template.scoped_id());
        for (index, value) in instance.values().iter().enumerate() {
            if let Some(prop) = value.as_prop() {
                let _ = write!(output, " ${index}={prop}");
            } else if !value.is_empty() {
                let _ = write!(output, " ${index}=<{}>", value.kind_name());
            }
        }
        if !instance.is_materialized() {
            output.push_str(" (unmaterialized)");
        }
        output.push('\n');
        for child in &instance.children {
            self.dump_instance(output, *child, depth + 1);
        }
    }

    pub(crate) fn request_commit(&mut self) {
        if self.commit_requested {
            return;
        }
        self.commit_requested = true;
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule_commit();
        }
    }

    pub(crate) fn clear_commit_request(&mut self) {
        self.commit_requested = false;
    }
}

pub(crate) fn check_slot_parts(template: &SnapshotTemplate, children: usize) -> Result<()> {
    if children == 0 {
        return Ok(());
    }
    match template.slots().first() {
        None => Err(SnapshotError::shape(
            template.scoped_id().as_str(),
            format!("{children} children but no slot part"),
        )),
        Some(SlotPart::Slot(_)) if children > template.slots().len() => Err(SnapshotError::shape(
            template.scoped_id().as_str(),
            format!("{children} children for {} slots", template.slots().len()),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "tests/tree_tests.rs"]
mod tests;
