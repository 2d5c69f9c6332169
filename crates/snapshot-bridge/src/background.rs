//! The background side: owns the component tree and produces patches.

use std::sync::Arc;

use snapshot_core::{InstanceId, PropValue, TemplateRegistry, WorkletDescriptor};

use crate::actions::{BgActionHandle, BgActionTable};
use crate::error::Result;
use crate::events::{dispatch_event, DelayedEventQueue};
use crate::hydration::{hydrate, HydrationMap};
use crate::lifecycle::LifecycleEvent;
use crate::patch::{PatchOptions, PatchPayload, RunOnMainThread};
use crate::tree::BackgroundTree;
use crate::ui_ops::{RecordingUiSink, UiOp, UiOpQueue, UiOpSink};

/// Drives one background tree through hydration, events and commits.
///
/// Lifecycle events that arrive before the first render of the root are kept
/// and replayed by [`BackgroundRuntime::mark_root_rendered`].
pub struct BackgroundRuntime {
    tree: BackgroundTree,
    map: HydrationMap,
    events: DelayedEventQueue,
    actions: BgActionTable,
    ui_ops: UiOpQueue,
    ui_sink: Box<dyn UiOpSink + Send>,
    delayed_lifecycle: Vec<LifecycleEvent>,
    run_on_main_thread: Vec<RunOnMainThread>,
    flow_ids: Vec<u64>,
    root_rendered: bool,
    hydrated: bool,
    reload_version: u32,
    next_resolve_id: u64,
}

impl BackgroundRuntime {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self {
            tree: BackgroundTree::new(registry),
            map: HydrationMap::new(),
            events: DelayedEventQueue::new(),
            actions: BgActionTable::new(),
            ui_ops: UiOpQueue::new(),
            ui_sink: Box::new(RecordingUiSink::new()),
            delayed_lifecycle: Vec::new(),
            run_on_main_thread: Vec::new(),
            flow_ids: Vec::new(),
            root_rendered: false,
            hydrated: false,
            reload_version: 0,
            next_resolve_id: 1,
        }
    }

    pub fn set_ui_sink(&mut self, sink: Box<dyn UiOpSink + Send>) {
        self.ui_sink = sink;
    }

    pub fn tree(&self) -> &BackgroundTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut BackgroundTree {
        &mut self.tree
    }

    pub fn hydration_map(&self) -> &HydrationMap {
        &self.map
    }

    pub fn actions_mut(&mut self) -> &mut BgActionTable {
        &mut self.actions
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }

    pub fn reload_version(&self) -> u32 {
        self.reload_version
    }

    pub fn register_bg_action(
        &mut self,
        action: impl Fn(&[PropValue]) -> PropValue + Send + Sync + 'static,
    ) -> BgActionHandle {
        self.actions.register_bg_action(action)
    }

    /// Removes `child` and forgets the destroyed instances' hydration entries.
    pub fn remove_child(&mut self, parent: InstanceId, child: InstanceId) -> Result<Vec<InstanceId>> {
        let destroyed = self.tree.remove_child(parent, child)?;
        for id in &destroyed {
            self.map.remove(*id);
        }
        Ok(destroyed)
    }

    /// Queues a worklet for the main thread; it runs after the next patch.
    pub fn run_on_main_thread(&mut self, worklet: WorkletDescriptor, params: Vec<PropValue>) -> u64 {
        let resolve_id = self.next_resolve_id;
        self.next_resolve_id += 1;
        self.run_on_main_thread.push(RunOnMainThread {
            worklet,
            params,
            resolve_id,
        });
        resolve_id
    }

    /// Attaches a trace flow id to the next patch.
    pub fn add_flow_id(&mut self, flow_id: u64) {
        self.flow_ids.push(flow_id);
    }

    pub fn run_ui_op(&mut self, op: UiOp) {
        self.ui_ops.run_or_delay(op, &self.map, self.ui_sink.as_mut());
    }

    /// Handles one lifecycle event, returning a payload when it produced one.
    pub fn on_lifecycle_event(&mut self, event: LifecycleEvent) -> Result<Option<PatchPayload>> {
        if !self.root_rendered {
            log::debug!("{} delayed until the root renders", event.name());
            self.delayed_lifecycle.push(event);
            return Ok(None);
        }
        match event {
            LifecycleEvent::FirstScreen { root } => self.hydrate(&root).map(Some),
            LifecycleEvent::PublishEvent { token, data } => {
                if !self.hydrated {
                    self.events.delayed_publish_event(token, data);
                } else {
                    dispatch_event(&self.tree, &self.map, &token, &data);
                }
                Ok(None)
            }
            LifecycleEvent::RunOnBackground { handle, args } => {
                if let Some(result) = self.actions.run_on_background(handle, &args) {
                    log::trace!("background action {} returned {result}", handle.id);
                }
                Ok(None)
            }
            LifecycleEvent::Reload { version } => {
                self.reload(version)?;
                Ok(None)
            }
        }
    }

    /// Marks the root as rendered and replays delayed lifecycle events.
    pub fn mark_root_rendered(&mut self) -> Result<Vec<PatchPayload>> {
        if self.root_rendered {
            return Ok(Vec::new());
        }
        self.root_rendered = true;
        let mut payloads = Vec::new();
        for event in std::mem::take(&mut self.delayed_lifecycle) {
            if let Some(payload) = self.on_lifecycle_event(event)? {
                payloads.push(payload);
            }
        }
        Ok(payloads)
    }

    fn hydrate(&mut self, first_screen: &snapshot_core::InstanceSnapshot) -> Result<PatchPayload> {
        let hydration = hydrate(first_screen, &self.tree)?;
        log::debug!(
            "hydrated {} instances with {} patches",
            hydration.map.len(),
            hydration.patches.len()
        );
        self.map = hydration.map;
        self.tree.set_recording(true);
        self.tree.take_patches();
        self.hydrated = true;

        let mut payload = PatchPayload::new(hydration.patches, self.options(true));
        payload.hydration = self.map.pairs();
        payload.run_on_main_thread = std::mem::take(&mut self.run_on_main_thread);

        for event in self.events.flush_delayed_events() {
            dispatch_event(&self.tree, &self.map, &event.token, &event.data);
        }
        self.ui_ops.run_delayed(&self.map, self.ui_sink.as_mut());
        Ok(payload)
    }

    fn options(&mut self, is_hydration: bool) -> PatchOptions {
        PatchOptions {
            reload_version: self.reload_version,
            is_hydration,
            flow_ids: std::mem::take(&mut self.flow_ids),
            pipeline: None,
        }
    }

    /// Collects the recorded patches. `None` before hydration or when idle.
    pub fn commit(&mut self) -> Option<PatchPayload> {
        if !self.hydrated {
            return None;
        }
        let patches = self.tree.take_patches();
        if patches.is_empty() && self.run_on_main_thread.is_empty() {
            return None;
        }
        let mut payload = PatchPayload::new(patches, self.options(false));
        payload.run_on_main_thread = std::mem::take(&mut self.run_on_main_thread);
        log::trace!("commit:\n{}", payload.describe());
        Some(payload)
    }

    /// Drops the rendered page. The removals are recorded so the next commit
    /// clears the main thread too.
    fn reload(&mut self, version: u32) -> Result<()> {
        if version <= self.reload_version {
            log::debug!("reload {version} ignored, already at {}", self.reload_version);
            return Ok(());
        }
        self.reload_version = version;
        while self.actions.reload_version() < version {
            self.actions.reload();
        }
        let root = self.tree.root();
        for child in self.tree.children(root).to_vec() {
            self.remove_child(root, child)?;
        }
        self.run_on_main_thread.clear();
        Ok(())
    }
}

impl std::fmt::Debug for BackgroundRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRuntime")
            .field("tree", &self.tree)
            .field("hydrated", &self.hydrated)
            .field("root_rendered", &self.root_rendered)
            .field("reload_version", &self.reload_version)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/background_tests.rs"]
mod tests;
