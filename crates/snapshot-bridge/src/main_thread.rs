//! The main-thread side: applies background patches to the snapshot tree.

use std::collections::VecDeque;
use std::sync::Arc;

use snapshot_core::{
    CommitReport, ElementHandle, EngineSignal, InstanceId, NativeApi, PropValue, RuntimeOptions, SnapshotError, SnapshotTree,
    TemplateId, TemplateRegistry,
};

use crate::error::Result;
use crate::hydration::HydrationMap;
use crate::lifecycle::LifecycleEvent;
use crate::patch::{PatchPayload, RunOnMainThread, SnapshotPatch};
use crate::ui_ops::{parse_ref_selector, RecordingUiSink, UiOp, UiOpSink};

/// Runs a `RunOnMainThread` worklet and produces its result.
pub type MainThreadTask = Box<dyn FnMut(&RunOnMainThread) -> PropValue + Send>;

/// What applying one payload did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// The payload predates the current reload and was dropped.
    pub stale: bool,
    pub applied: usize,
    /// Operations naming unknown instances, or inserts that would form a cycle.
    pub skipped: usize,
    pub commit: Option<CommitReport>,
    /// `(resolve id, result)` of every run-on-main-thread task.
    pub task_results: Vec<(u64, PropValue)>,
}

pub struct MainThreadRuntime<N: NativeApi> {
    tree: SnapshotTree<N>,
    map: HydrationMap,
    reload_version: u32,
    tasks: MainThreadTask,
    ui_sink: Box<dyn UiOpSink + Send>,
    /// Payloads waiting for a template bundle, in arrival order.
    deferred: VecDeque<PatchPayload>,
}

impl<N: NativeApi> MainThreadRuntime<N> {
    pub fn new(registry: Arc<TemplateRegistry>, native: N) -> Result<Self> {
        Self::with_options(registry, native, RuntimeOptions::default())
    }

    pub fn with_options(registry: Arc<TemplateRegistry>, native: N, options: RuntimeOptions) -> Result<Self> {
        Ok(Self {
            tree: SnapshotTree::with_options(registry, native, options)?,
            map: HydrationMap::new(),
            reload_version: 0,
            tasks: Box::new(|task| {
                log::debug!("no worklet runner for `{}`", task.worklet.id);
                PropValue::Null
            }),
            ui_sink: Box::new(RecordingUiSink::new()),
            deferred: VecDeque::new(),
        })
    }

    pub fn set_task_runner(&mut self, tasks: impl FnMut(&RunOnMainThread) -> PropValue + Send + 'static) {
        self.tasks = Box::new(tasks);
    }

    pub fn set_ui_sink(&mut self, sink: Box<dyn UiOpSink + Send>) {
        self.ui_sink = sink;
    }

    pub fn tree(&self) -> &SnapshotTree<N> {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SnapshotTree<N> {
        &mut self.tree
    }

    pub fn hydration_map(&self) -> &HydrationMap {
        &self.map
    }

    pub fn reload_version(&self) -> u32 {
        self.reload_version
    }

    /// Commits the first screen and serializes it for hydration.
    pub fn first_screen(&mut self) -> Result<LifecycleEvent> {
        self.tree.commit()?;
        let root = self.tree.serialize(self.tree.root())?;
        log::debug!("first screen has {} instances", root.count());
        Ok(LifecycleEvent::FirstScreen { root })
    }

    /// Applies a payload, commits once, then runs the delivered tasks.
    ///
    /// Operations naming instances the tree does not know are logged and
    /// skipped. Template shape errors abort. A payload creating an instance
    /// of an unregistered template changes nothing: it is kept, along with
    /// every later payload, and the recoverable `TemplateNotFound` is
    /// returned. [`MainThreadRuntime::retry_deferred`] applies them once the
    /// bundle registered the template.
    pub fn apply_payload(&mut self, payload: PatchPayload) -> Result<ApplyReport> {
        if self.deferred.is_empty() && self.missing_template(&payload).is_none() {
            return self.apply_now(payload);
        }
        self.deferred.push_back(payload);
        let mut reports = self.retry_deferred()?;
        match self.deferred.front().and_then(|waiting| self.missing_template(waiting)) {
            Some(template) => Err(SnapshotError::TemplateNotFound {
                id: template.to_string(),
            }
            .into()),
            None => Ok(reports.pop().unwrap_or_default()),
        }
    }

    /// Applies deferred payloads, oldest first, until one still names an
    /// unregistered template.
    pub fn retry_deferred(&mut self) -> Result<Vec<ApplyReport>> {
        let mut reports = Vec::new();
        while let Some(waiting) = self.deferred.front() {
            if let Some(template) = self.missing_template(waiting) {
                log::debug!(
                    "{} payloads wait for template `{template}`",
                    self.deferred.len()
                );
                break;
            }
            if let Some(payload) = self.deferred.pop_front() {
                reports.push(self.apply_now(payload)?);
            }
        }
        Ok(reports)
    }

    pub fn deferred_payloads(&self) -> usize {
        self.deferred.len()
    }

    fn missing_template<'a>(&self, payload: &'a PatchPayload) -> Option<&'a TemplateId> {
        payload.patches.iter().find_map(|patch| match patch {
            SnapshotPatch::CreateElement { template, .. } if !self.tree.registry().contains(template) => {
                Some(template)
            }
            _ => None,
        })
    }

    fn apply_now(&mut self, payload: PatchPayload) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        if payload.options.reload_version < self.reload_version {
            log::debug!(
                "dropping patch for reload {}, now at {}",
                payload.options.reload_version,
                self.reload_version
            );
            report.stale = true;
            return Ok(report);
        }
        if payload.options.is_hydration {
            self.map.reset();
        }
        for (main, background) in &payload.hydration {
            self.map.insert(*main, *background);
        }
        for patch in &payload.patches {
            match self.apply_patch(patch) {
                Ok(()) => report.applied += 1,
                Err(err @ (SnapshotError::InstanceMissing { .. } | SnapshotError::CyclicInsert { .. })) => {
                    log::error!("snapshot patch `{patch}` failed: {err}");
                    report.skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
        let commit = self.tree.commit()?;
        for id in &commit.destroyed {
            self.map.remove(*id);
        }
        report.commit = Some(commit);
        for task in &payload.run_on_main_thread {
            let result = (self.tasks)(task);
            report.task_results.push((task.resolve_id, result));
        }
        Ok(report)
    }

    fn apply_patch(&mut self, patch: &SnapshotPatch) -> snapshot_core::Result<()> {
        let map = &self.map;
        match patch {
            SnapshotPatch::CreateElement { template, id } => {
                self.tree.create_instance_with_id(template, map.to_main(*id))?;
            }
            SnapshotPatch::InsertBefore { parent, child, before } => {
                self.tree
                    .insert_before(map.to_main(*parent), map.to_main(*child), before.map(|b| map.to_main(b)))?;
            }
            SnapshotPatch::RemoveChild { parent, child } => {
                self.tree.remove_child(map.to_main(*parent), map.to_main(*child))?;
            }
            SnapshotPatch::SetAttribute { id, index, value } => {
                self.tree.set_value(map.to_main(*id), *index, value.clone())?;
            }
            SnapshotPatch::SetAttributes { id, values } => {
                self.tree.set_values(map.to_main(*id), values.clone())?;
            }
        }
        Ok(())
    }

    /// Runs an element operation the background issued through a ref.
    ///
    /// `SetNativeProps` writes straight to the element behind the selector.
    /// Every op also reaches the UI sink.
    pub fn apply_ui_op(&mut self, selector: &str, op: &UiOp) {
        if let UiOp::SetNativeProps { props, .. } = op {
            match (self.ref_element(selector), props.as_object()) {
                (Some(element), Some(props)) => {
                    let native = self.tree.native_mut();
                    for (name, value) in props {
                        native.set_attribute(element, name, value);
                    }
                }
                (None, _) => log::debug!("no element behind {selector}"),
                (_, None) => log::debug!("native props for {selector} are not an object: {props}"),
            }
        }
        self.ui_sink.apply(selector, op);
    }

    /// Element bound to a ref selector, once materialized.
    pub fn ref_element(&self, selector: &str) -> Option<ElementHandle> {
        let (id, index) = parse_ref_selector(selector)?;
        let instance = self.tree.instance(id)?;
        let updater = instance.template().updater(index)?;
        instance.elements()?.get(updater.element_index).copied()
    }

    /// Forwards an engine signal; teardown also clears the hydration map.
    pub fn on_engine_signal(&mut self, signal: &EngineSignal) -> Option<CommitReport> {
        let report = self.tree.on_engine_signal(signal)?;
        for id in &report.destroyed {
            self.map.remove(*id);
        }
        Some(report)
    }

    /// Starts a reload: later patches from older versions are dropped.
    pub fn reload(&mut self) -> LifecycleEvent {
        self.reload_version += 1;
        if !self.deferred.is_empty() {
            log::debug!("reload drops {} deferred payloads", self.deferred.len());
            self.deferred.clear();
        }
        log::debug!("reload {}", self.reload_version);
        LifecycleEvent::Reload {
            version: self.reload_version,
        }
    }

    /// Background id of a first-screen instance, for events that cross over.
    pub fn to_background(&self, id: InstanceId) -> Result<InstanceId> {
        Ok(self.map.to_background(id)?)
    }
}

#[cfg(test)]
#[path = "tests/main_thread_tests.rs"]
mod tests;
