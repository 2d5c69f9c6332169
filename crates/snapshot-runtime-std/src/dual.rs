use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use snapshot_bridge::{
    ApplyReport, BackgroundRuntime, BgActionHandle, BridgeError, LifecycleEvent, MainThreadRuntime, PatchPayload,
    Result, UiOp, UiOpSink,
};
use snapshot_core::{CommitReport, EngineSignal, NativeApi, PropValue, TemplateRegistry};

use crate::StdScheduler;

/// Component logic living on the background thread.
pub trait BackgroundApp: Send + 'static {
    /// First render of the root, before any lifecycle event is handled.
    fn render(&mut self, runtime: &mut BackgroundRuntime) -> Result<()>;

    /// Re-render after a lifecycle event; state changed by handlers shows up here.
    fn update(&mut self, runtime: &mut BackgroundRuntime) -> Result<()> {
        let _ = runtime;
        Ok(())
    }
}

/// Main thread to background thread.
#[derive(Debug)]
pub enum ToBackground {
    /// A JSON encoded [`LifecycleEvent`].
    Lifecycle(String),
    Shutdown,
}

/// Background thread to main thread.
#[derive(Debug)]
pub enum ToMain {
    /// A JSON encoded [`PatchPayload`].
    Patch(String),
    UiOp { selector: String, op: UiOp },
}

struct ChannelUiSink {
    to_main: Sender<ToMain>,
}

impl UiOpSink for ChannelUiSink {
    fn apply(&mut self, selector: &str, op: &UiOp) {
        let message = ToMain::UiOp {
            selector: selector.to_string(),
            op: op.clone(),
        };
        if self.to_main.send(message).is_err() {
            log::debug!("ui op for {selector} dropped, main thread gone");
        }
    }
}

fn send_payload(to_main: &Sender<ToMain>, payload: &PatchPayload) -> Result<()> {
    let json = payload.to_json()?;
    to_main
        .send(ToMain::Patch(json))
        .map_err(|_| BridgeError::Disconnected("main"))
}

fn background_loop(
    mut runtime: BackgroundRuntime,
    mut app: Box<dyn BackgroundApp>,
    inbox: Receiver<ToBackground>,
    to_main: Sender<ToMain>,
) -> Result<()> {
    app.render(&mut runtime)?;
    for payload in runtime.mark_root_rendered()? {
        send_payload(&to_main, &payload)?;
    }
    while let Ok(message) = inbox.recv() {
        let json = match message {
            ToBackground::Lifecycle(json) => json,
            ToBackground::Shutdown => break,
        };
        let event = match LifecycleEvent::from_json(&json) {
            Ok(event) => event,
            Err(err) => {
                log::error!("dropping lifecycle event: {err}");
                continue;
            }
        };
        log::trace!("background received {}", event.name());
        if let Some(payload) = runtime.on_lifecycle_event(event)? {
            send_payload(&to_main, &payload)?;
        }
        app.update(&mut runtime)?;
        if let Some(payload) = runtime.commit() {
            send_payload(&to_main, &payload)?;
        }
    }
    log::debug!("background thread stopped");
    Ok(())
}

/// Main-thread handle of a running dual-thread page.
///
/// The caller's thread is the main thread: it owns the snapshot tree and the
/// engine. The background thread owns the component tree.
pub struct DualThreadRuntime<N: NativeApi> {
    main: MainThreadRuntime<N>,
    scheduler: Arc<StdScheduler>,
    to_background: Sender<ToBackground>,
    from_background: Receiver<ToMain>,
    background: Option<JoinHandle<Result<()>>>,
}

impl<N: NativeApi> DualThreadRuntime<N> {
    pub fn spawn(registry: Arc<TemplateRegistry>, native: N, app: impl BackgroundApp) -> Result<Self> {
        let mut main = MainThreadRuntime::new(Arc::clone(&registry), native)?;
        let scheduler = Arc::new(StdScheduler::new());
        main.tree_mut().set_scheduler(scheduler.clone());

        let (to_background, inbox) = mpsc::channel();
        let (to_main, from_background) = mpsc::channel();
        let mut runtime = BackgroundRuntime::new(registry);
        runtime.set_ui_sink(Box::new(ChannelUiSink {
            to_main: to_main.clone(),
        }));
        let background = thread::Builder::new()
            .name("snapshot-background".into())
            .spawn(move || {
                let result = background_loop(runtime, Box::new(app), inbox, to_main);
                if let Err(err) = &result {
                    log::error!("background thread failed: {err}");
                }
                result
            })
            .map_err(|_| BridgeError::Disconnected("background"))?;

        Ok(Self {
            main,
            scheduler,
            to_background,
            from_background,
            background: Some(background),
        })
    }

    pub fn main(&self) -> &MainThreadRuntime<N> {
        &self.main
    }

    pub fn main_mut(&mut self) -> &mut MainThreadRuntime<N> {
        &mut self.main
    }

    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    fn send(&self, event: &LifecycleEvent) -> Result<()> {
        self.to_background
            .send(ToBackground::Lifecycle(event.to_json()?))
            .map_err(|_| BridgeError::Disconnected("background"))
    }

    /// Commits the main thread's first screen and sends it for hydration.
    pub fn send_first_screen(&mut self) -> Result<()> {
        let event = self.main.first_screen()?;
        self.send(&event)
    }

    /// Forwards a native event fired on an element bound under `token`.
    pub fn publish_event(&self, token: impl Into<String>, data: PropValue) -> Result<()> {
        self.send(&LifecycleEvent::PublishEvent {
            token: token.into(),
            data,
        })
    }

    pub fn run_on_background(&self, handle: BgActionHandle, args: Vec<PropValue>) -> Result<()> {
        self.send(&LifecycleEvent::RunOnBackground { handle, args })
    }

    pub fn reload(&mut self) -> Result<()> {
        let event = self.main.reload();
        self.send(&event)
    }

    pub fn on_engine_signal(&mut self, signal: &EngineSignal) -> Option<CommitReport> {
        self.main.on_engine_signal(signal)
    }

    fn handle(&mut self, message: ToMain) -> Result<Option<ApplyReport>> {
        match message {
            ToMain::Patch(json) => {
                let payload = PatchPayload::from_json(&json)?;
                log::trace!("main thread applying:\n{}", payload.describe());
                match self.main.apply_payload(payload) {
                    Ok(report) => Ok(Some(report)),
                    Err(err) if err.is_recoverable() => {
                        log::debug!("patch deferred: {err}");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
            ToMain::UiOp { selector, op } => {
                self.main.apply_ui_op(&selector, &op);
                Ok(None)
            }
        }
    }

    /// Runs queued main-thread tasks and a requested commit.
    fn run_scheduled(&mut self) -> Result<()> {
        self.scheduler.drain_tasks();
        if self.scheduler.take_commit_request() && self.main.tree().is_dirty() {
            self.main.tree_mut().commit()?;
        }
        Ok(())
    }

    /// Handles every message already received. Returns the patch reports.
    ///
    /// Patches deferred for an unregistered template are retried first, so
    /// pumping after a bundle registers its templates catches up.
    pub fn pump(&mut self) -> Result<Vec<ApplyReport>> {
        let mut reports = self.main.retry_deferred()?;
        while let Ok(message) = self.from_background.try_recv() {
            if let Some(report) = self.handle(message)? {
                reports.push(report);
            }
        }
        self.run_scheduled()?;
        Ok(reports)
    }

    /// Blocks until a patch arrives and is applied, or `timeout` passes.
    pub fn wait_for_patch(&mut self, timeout: Duration) -> Result<Option<ApplyReport>> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.from_background.recv_timeout(remaining) {
                Ok(message) => {
                    if let Some(report) = self.handle(message)? {
                        self.run_scheduled()?;
                        return Ok(Some(report));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(BridgeError::Disconnected("background")),
            }
        }
    }

    /// Stops the background thread and waits for it.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        let Some(handle) = self.background.take() else {
            return Ok(());
        };
        let _ = self.to_background.send(ToBackground::Shutdown);
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Disconnected("background")),
        }
    }
}

impl<N: NativeApi> Drop for DualThreadRuntime<N> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::debug!("background thread ended with {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;

    impl BackgroundApp for Idle {
        fn render(&mut self, _runtime: &mut BackgroundRuntime) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn empty_page_hydrates_without_patches() {
        let registry = Arc::new(TemplateRegistry::new());
        let mut runtime = DualThreadRuntime::spawn(registry, snapshot_core::MemoryNative::new(), Idle).unwrap();
        runtime.send_first_screen().unwrap();
        let report = runtime.wait_for_patch(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(report.applied, 0);
        assert!(!report.stale);
        assert_eq!(runtime.main().hydration_map().len(), 1);
        runtime.shutdown().unwrap();
    }

    #[test]
    fn dropping_the_runtime_stops_the_thread() {
        let registry = Arc::new(TemplateRegistry::new());
        let runtime = DualThreadRuntime::spawn(registry, snapshot_core::MemoryNative::new(), Idle).unwrap();
        drop(runtime);
    }
}
