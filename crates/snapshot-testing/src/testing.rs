use std::sync::Arc;

use snapshot_bridge::{ApplyReport, BackgroundRuntime, LifecycleEvent, MainThreadRuntime, PatchPayload, Result};
use snapshot_core::{
    EventPayload, EventType, InstanceId, MemoryNative, NativeOp, PropValue, SnapshotTree, TemplateRegistry,
};

/// Headless harness running both sides of a page on the test thread.
///
/// Every message between the two runtimes goes through its JSON form, so a
/// test sees exactly what a real thread boundary would carry.
pub struct SnapshotTestRule {
    main: MainThreadRuntime<MemoryNative>,
    background: BackgroundRuntime,
}

impl SnapshotTestRule {
    pub fn new(registry: Arc<TemplateRegistry>) -> Result<Self> {
        let mut main = MainThreadRuntime::new(Arc::clone(&registry), MemoryNative::new())?;
        main.tree_mut().native_mut().clear_ops();
        Ok(Self {
            main,
            background: BackgroundRuntime::new(registry),
        })
    }

    pub fn main(&self) -> &MainThreadRuntime<MemoryNative> {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut MainThreadRuntime<MemoryNative> {
        &mut self.main
    }

    pub fn background(&self) -> &BackgroundRuntime {
        &self.background
    }

    pub fn background_mut(&mut self) -> &mut BackgroundRuntime {
        &mut self.background
    }

    pub fn main_tree(&mut self) -> &mut SnapshotTree<MemoryNative> {
        self.main.tree_mut()
    }

    pub fn native(&self) -> &MemoryNative {
        self.main.tree().native()
    }

    pub fn take_ops(&mut self) -> Vec<NativeOp> {
        self.main.tree_mut().native_mut().take_ops()
    }

    /// Text of every raw-text element on the page, in tree order.
    pub fn page_text(&self) -> String {
        let tree = self.main.tree();
        tree.native().text_content(tree.page())
    }

    /// Sends the main thread's first screen over and applies the hydration
    /// patch. The background root counts as rendered from here on.
    pub fn hydrate(&mut self) -> Result<ApplyReport> {
        let first_screen = self.main.first_screen()?;
        let mut payloads = self.background.mark_root_rendered()?;
        payloads.extend(self.background.on_lifecycle_event(ship_event(&first_screen)?)?);
        let mut report = ApplyReport::default();
        for payload in payloads {
            report = self.main.apply_payload(ship(&payload)?)?;
        }
        Ok(report)
    }

    /// Delivers a lifecycle event to the background and applies what it
    /// commits in response.
    pub fn send(&mut self, event: &LifecycleEvent) -> Result<Option<ApplyReport>> {
        if let Some(payload) = self.background.on_lifecycle_event(ship_event(event)?)? {
            self.main.apply_payload(ship(&payload)?)?;
        }
        self.flush()
    }

    /// Fires the listener bound under `name` on the root element of `id`.
    pub fn fire(&mut self, id: InstanceId, event_type: EventType, name: &str, data: PropValue) -> Result<Option<ApplyReport>> {
        let Some(token) = self.listener_token(id, event_type, name) else {
            return Ok(None);
        };
        self.send(&LifecycleEvent::PublishEvent { token, data })
    }

    /// Commits the background and applies the patch, if there is one.
    pub fn flush(&mut self) -> Result<Option<ApplyReport>> {
        match self.background.commit() {
            Some(payload) => self.main.apply_payload(ship(&payload)?).map(Some),
            None => Ok(None),
        }
    }

    /// Token bound on the root element of main-thread instance `id`.
    pub fn listener_token(&self, id: InstanceId, event_type: EventType, name: &str) -> Option<String> {
        let tree = self.main.tree();
        let element = tree.instance(id)?.root_element()?;
        match tree.native().event(element, event_type, name)? {
            EventPayload::Token(token) => Some(token.clone()),
            EventPayload::Worklet(_) => None,
        }
    }
}

fn ship(payload: &PatchPayload) -> Result<PatchPayload> {
    PatchPayload::from_json(&payload.to_json()?)
}

fn ship_event(event: &LifecycleEvent) -> Result<LifecycleEvent> {
    LifecycleEvent::from_json(&event.to_json()?)
}
