//! The commit phase: validate, patch the element tree, flush once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::diff::{diff_children, ChildOp};
use crate::error::{Result, SnapshotError};
use crate::instance::SnapshotInstance;
use crate::list::is_list;
use crate::native::{ElementHandle, EngineSignal, FlushOptions, NativeApi};
use crate::template::{SlotPart, SnapshotTemplate};
use crate::tree::{check_slot_parts, SnapshotTree};
use crate::value::SlotValue;
use crate::InstanceId;

/// What one commit did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub operation_id: u64,
    /// Instances destroyed at the end of the commit, subtrees included.
    pub destroyed: Vec<InstanceId>,
    pub exposure_changed: Vec<ElementHandle>,
    pub materialized: usize,
    pub slot_updates: usize,
    pub structural_ops: usize,
    /// Lists whose element received new `update-list-info`.
    #[serde(default)]
    pub list_updates: usize,
}

impl CommitReport {
    pub fn is_noop(&self) -> bool {
        self.destroyed.is_empty()
            && self.materialized == 0
            && self.slot_updates == 0
            && self.structural_ops == 0
            && self.list_updates == 0
    }
}

/// Element-level edit for one slot element, derived from a child list diff.
enum Edit {
    Remove {
        slot: ElementHandle,
        child: InstanceId,
    },
    Place {
        slot: ElementHandle,
        child: InstanceId,
        before: Option<InstanceId>,
    },
}

impl<N: NativeApi> SnapshotTree<N> {
    /// Applies every staged change to the engine.
    ///
    /// Nothing reaches the engine when validation fails. A commit after the
    /// lifetime ended is an empty report.
    pub fn commit(&mut self) -> Result<CommitReport> {
        self.clear_commit_request();
        if self.lifetime_ended {
            log::debug!("commit after DestroyLifetime ignored");
            return Ok(CommitReport::default());
        }
        let order = self.preorder();
        self.validate(&order)?;
        self.prepare_elements(&order)?;
        let mut edits = Vec::new();
        let mut lists = Vec::new();
        for id in &order {
            let Some(instance) = self.arena.get(*id) else {
                continue;
            };
            if is_list(instance) {
                lists.push(*id);
            } else if instance.is_materialized() && instance.children != instance.attached {
                edits.push((*id, structural_edits(instance)?));
            }
        }

        let mut report = CommitReport::default();
        for list in &lists {
            if self.arena.get(*list).is_some_and(SnapshotInstance::is_materialized) {
                report.structural_ops += self.detach_list_items(*list)?;
            }
        }
        let mut placements = Vec::with_capacity(edits.len());
        for (id, edits) in edits {
            let (removals, places): (Vec<_>, Vec<_>) =
                edits.into_iter().partition(|edit| matches!(edit, Edit::Remove { .. }));
            for edit in removals {
                if let Edit::Remove { slot, child } = edit {
                    if let Some(root) = self.arena.get(child).and_then(SnapshotInstance::root_element) {
                        self.native.remove_element(slot, root);
                        self.mark_exposure(root);
                        report.structural_ops += 1;
                    }
                }
            }
            placements.push((id, places));
        }

        let mut placements = placements.into_iter().peekable();
        for id in &order {
            if !self.arena.contains(*id) {
                continue;
            }
            if self.materialize(*id)? {
                report.materialized += 1;
            }
            if placements.peek().is_some_and(|(parent, _)| parent == id) {
                if let Some((_, places)) = placements.next() {
                    self.place_children(*id, places, &mut report)?;
                }
            }
            if lists.contains(id) && self.update_list(*id)? {
                report.list_updates += 1;
            }
            report.slot_updates += self.flush_pending(*id)?;
        }

        self.destroy_detached(&mut report);
        self.effects.refs.apply(self.worklets.as_mut());
        self.flush(&mut report);
        if self.options.debug_tree {
            log::debug!("tree after commit {}:\n{}", report.operation_id, self.dump());
        }
        log::trace!("commit {report:?}");
        Ok(report)
    }

    /// Every instance reachable from the root, parents before children.
    /// List items only count once the engine has rendered them.
    pub(crate) fn preorder(&self) -> Vec<InstanceId> {
        let mut order = Vec::with_capacity(self.arena.len());
        let mut stack = vec![InstanceId::ROOT];
        while let Some(id) = stack.pop() {
            let Some(instance) = self.arena.get(id) else {
                continue;
            };
            order.push(id);
            if is_list(instance) {
                let rendered = instance
                    .children
                    .iter()
                    .rev()
                    .filter(|child| self.arena.get(**child).is_some_and(SnapshotInstance::is_materialized));
                stack.extend(rendered.copied());
            } else {
                stack.extend(instance.children.iter().rev().copied());
            }
        }
        order
    }

    /// Checks everything the patch needs before the first native call.
    fn validate(&self, order: &[InstanceId]) -> Result<()> {
        for id in order {
            let instance = self.arena.try_get(*id)?;
            let template = &instance.template;
            if !self.registry.contains(&template.scoped_id()) {
                return Err(SnapshotError::TemplateNotFound {
                    id: template.scoped_id().to_string(),
                });
            }
            check_slot_parts(template, instance.children.len())?;
            if instance.is_materialized() {
                for (index, value) in &instance.pending {
                    check_value(template, *index, value)?;
                }
            } else {
                for index in 0..instance.values.len() {
                    if let Some(value) = instance.value(index) {
                        if !value.is_empty() {
                            check_value(template, index, value)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Runs the factory of every instance about to be materialized.
    ///
    /// The new elements stay off-tree until placed, so a factory that breaks
    /// its template's shape fails the commit before the live tree changes.
    fn prepare_elements(&mut self, order: &[InstanceId]) -> Result<()> {
        for id in order {
            if self.prepared.contains_key(id) {
                continue;
            }
            let template = match self.arena.get(*id) {
                Some(instance) if !instance.is_materialized() => Arc::clone(&instance.template),
                _ => continue,
            };
            let elements = template.create_elements(&mut self.native)?;
            self.prepared.insert(*id, elements);
        }
        Ok(())
    }

    fn place_children(&mut self, parent: InstanceId, places: Vec<Edit>, report: &mut CommitReport) -> Result<()> {
        for edit in places {
            let Edit::Place { slot, child, before } = edit else {
                continue;
            };
            if self.materialize(child)? {
                report.materialized += 1;
            }
            let root = self.root_element(child)?;
            let before = match before {
                Some(before) => Some(self.root_element(before)?),
                None => None,
            };
            self.native.insert_element_before(slot, root, before);
            self.mark_exposure(root);
            report.structural_ops += 1;
        }
        let instance = self.arena.try_get_mut(parent)?;
        instance.attached = instance.children.clone();
        Ok(())
    }

    fn root_element(&self, id: InstanceId) -> Result<ElementHandle> {
        let instance = self.arena.try_get(id)?;
        instance.root_element().ok_or_else(|| {
            SnapshotError::shape(instance.template.scoped_id().as_str(), "instance has no elements")
        })
    }

    /// Applies staged values in ascending expression order.
    fn flush_pending(&mut self, id: InstanceId) -> Result<usize> {
        let pending = match self.arena.get_mut(id) {
            Some(instance) if instance.is_materialized() => std::mem::take(&mut instance.pending),
            _ => return Ok(0),
        };
        let mut applied = 0;
        for (index, value) in pending {
            if self.apply_update(id, index, value)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn destroy_detached(&mut self, report: &mut CommitReport) {
        let detached: Vec<InstanceId> = self.detached.drain(..).collect();
        for id in detached {
            match self.arena.get(id) {
                Some(instance) if instance.parent.is_none() => self.destroy_subtree(id, &mut report.destroyed),
                Some(_) => log::trace!("instance {id} re-parented before commit end"),
                None => {}
            }
        }
    }

    /// Releases and forgets `id` and all of its descendants.
    pub(crate) fn destroy_subtree(&mut self, id: InstanceId, destroyed: &mut Vec<InstanceId>) {
        let Some(instance) = self.arena.remove(id) else {
            return;
        };
        self.prepared.remove(&id);
        self.lists.forget(id);
        for wref in &instance.worklet_refs {
            self.worklets.release(wref);
        }
        self.mtc.forget(id);
        destroyed.push(id);
        for child in instance.children {
            // A child moved elsewhere during this cycle belongs to its new parent.
            if self.arena.get(child).is_some_and(|c| c.parent == Some(id)) {
                self.destroy_subtree(child, destroyed);
            }
        }
    }

    fn mark_exposure(&mut self, element: ElementHandle) {
        if self.options.track_exposure {
            self.effects.mark_exposure(element);
        }
    }

    fn flush(&mut self, report: &mut CommitReport) {
        self.operation_id += 1;
        let exposure_changed = std::mem::take(&mut self.effects.exposure_changed);
        let exposure_changed = if self.options.track_exposure {
            exposure_changed
        } else {
            Vec::new()
        };
        let options = FlushOptions {
            trigger_layout: self.options.trigger_layout,
            operation_id: Some(self.operation_id),
            pipeline: self.options.pipeline.clone(),
            exposure_changed: exposure_changed.clone(),
        };
        self.native.flush_element_tree(self.page(), &options);
        report.operation_id = self.operation_id;
        report.exposure_changed = exposure_changed;
    }

    /// Reacts to an engine notification.
    ///
    /// `DestroyLifetime` tears the whole tree down without diffing; a second
    /// one is a no-op. Other signals are informational.
    pub fn on_engine_signal(&mut self, signal: &EngineSignal) -> Option<CommitReport> {
        match signal {
            EngineSignal::DestroyLifetime => {
                if self.lifetime_ended {
                    log::debug!("DestroyLifetime delivered twice");
                    return None;
                }
                self.lifetime_ended = true;
                Some(self.teardown())
            }
            EngineSignal::Exposure { elements } => {
                log::trace!("exposure changed for {} elements", elements.len());
                None
            }
            EngineSignal::Layout { operation_id } => {
                log::trace!("layout finished for operation {operation_id:?}");
                None
            }
        }
    }

    fn teardown(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        let page = self.page();
        let children = match self.arena.get_mut(InstanceId::ROOT) {
            Some(root) => {
                root.attached.clear();
                std::mem::take(&mut root.children)
            }
            None => Vec::new(),
        };
        for child in children {
            if let Some(element) = self.arena.get(child).and_then(SnapshotInstance::root_element) {
                self.native.remove_element(page, element);
                report.structural_ops += 1;
            }
            if let Some(instance) = self.arena.get_mut(child) {
                instance.parent = None;
            }
            self.destroy_subtree(child, &mut report.destroyed);
        }
        let floating: Vec<InstanceId> = self.detached.drain(..).collect();
        for id in floating {
            self.destroy_subtree(id, &mut report.destroyed);
        }
        self.effects = Default::default();
        self.lists.clear();
        self.native.remove_lifecycle_listener();
        self.operation_id += 1;
        self.native.flush_element_tree(
            page,
            &FlushOptions {
                trigger_layout: self.options.trigger_layout,
                operation_id: Some(self.operation_id),
                ..FlushOptions::default()
            },
        );
        report.operation_id = self.operation_id;
        report
    }
}

fn check_value(template: &Arc<SnapshotTemplate>, index: usize, value: &SlotValue) -> Result<()> {
    match template.updater(index) {
        Some(updater) if updater.accepts(value) => Ok(()),
        Some(updater) => Err(SnapshotError::shape(
            template.scoped_id().as_str(),
            format!("updater `{}` cannot take a {} value", updater.name, value.kind_name()),
        )),
        None => Err(SnapshotError::shape(
            template.scoped_id().as_str(),
            format!("no updater for expression {index}"),
        )),
    }
}

/// Element edits that bring the attached children of `instance` in line with
/// its logical children.
fn structural_edits(instance: &SnapshotInstance) -> Result<Vec<Edit>> {
    let template = &instance.template;
    let elements = instance.elements.as_deref().unwrap_or_default();
    let element = |index: usize| {
        elements.get(index).copied().ok_or_else(|| {
            SnapshotError::shape(template.scoped_id().as_str(), format!("slot element {index} missing"))
        })
    };
    let mut edits = Vec::new();
    match template.slots().first() {
        Some(SlotPart::Children(index)) => {
            let slot = element(*index)?;
            for op in diff_children(&instance.attached, &instance.children) {
                edits.push(match op {
                    ChildOp::Remove { id } => Edit::Remove { slot, child: id },
                    ChildOp::Insert { id, before } | ChildOp::Move { id, before } => Edit::Place {
                        slot,
                        child: id,
                        before,
                    },
                });
            }
        }
        Some(SlotPart::Slot(_)) => {
            let len = instance.attached.len().max(instance.children.len());
            for position in 0..len {
                let old = instance.attached.get(position).copied();
                let new = instance.children.get(position).copied();
                if old == new {
                    continue;
                }
                let Some(index) = template.slot_element(position) else {
                    continue;
                };
                let slot = element(index)?;
                if let Some(child) = old {
                    edits.push(Edit::Remove { slot, child });
                }
                if let Some(child) = new {
                    edits.push(Edit::Place {
                        slot,
                        child,
                        before: None,
                    });
                }
            }
        }
        Some(SlotPart::List(_)) | None => {}
    }
    Ok(edits)
}

#[cfg(test)]
#[path = "tests/commit_tests.rs"]
mod tests;
