use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use snapshot_bridge::{BackgroundRuntime, BgActionHandle, RecordingUiSink, RefProxy, Result, UiOp};
use snapshot_core::{
    EventPayload, EventType, InstanceId, MemoryNative, PropValue, RefBinding, SlotValue, TemplateId,
    TemplateRegistry,
};
use snapshot_macros::snapshot;
use snapshot_runtime_std::{BackgroundApp, DualThreadRuntime};

const WAIT: Duration = Duration::from_secs(5);

fn registry() -> Arc<TemplateRegistry> {
    let registry = TemplateRegistry::new();
    let counter = snapshot! { "counter", view(bindtap = dyn, ref = dyn) { text { dyn } } }
        .build()
        .expect("counter");
    registry.register(counter);
    Arc::new(registry)
}

#[derive(Default)]
struct Counter {
    count: Arc<AtomicI64>,
    id: Option<InstanceId>,
    reset: Arc<Mutex<Option<BgActionHandle>>>,
}

impl BackgroundApp for Counter {
    fn render(&mut self, runtime: &mut BackgroundRuntime) -> Result<()> {
        let count = Arc::clone(&self.count);
        let reset = Arc::clone(&self.count);
        *self.reset.lock().unwrap() = Some(runtime.register_bg_action(move |_| {
            reset.store(0, Ordering::SeqCst);
            PropValue::Null
        }));
        let tree = runtime.tree_mut();
        let id = tree.create_instance(&TemplateId::new("counter"))?;
        tree.on(id, 0, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })?;
        tree.set_value(id, 1, SlotValue::Ref(RefBinding::Handle(snapshot_core::HandlerId(1))))?;
        tree.set_value(id, 2, "0".into())?;
        let root = tree.root();
        tree.insert_before(root, id, None)?;
        self.id = Some(id);
        Ok(())
    }

    fn update(&mut self, runtime: &mut BackgroundRuntime) -> Result<()> {
        let Some(id) = self.id.filter(|id| runtime.tree().contains(*id)) else {
            return Ok(());
        };
        let label = self.count.load(Ordering::SeqCst).to_string();
        if runtime.tree().value(id, 2) != Some(&SlotValue::from(label.as_str())) {
            runtime.run_ui_op(UiOp::Invoke {
                target: RefProxy::new(id, 1),
                method: "scrollIntoView".into(),
                params: PropValue::Null,
            });
        }
        runtime.tree_mut().set_value(id, 2, label.into())?;
        Ok(())
    }
}

fn first_screen(runtime: &mut DualThreadRuntime<MemoryNative>) -> InstanceId {
    let tree = runtime.main_mut().tree_mut();
    let id = tree.create_instance(&TemplateId::new("counter")).expect("counter");
    tree.set_value(id, 0, SlotValue::token(format!("{id}:0:"))).expect("tap");
    tree.set_value(id, 1, SlotValue::Ref(RefBinding::Handle(snapshot_core::HandlerId(1))))
        .expect("ref");
    tree.set_value(id, 2, "0".into()).expect("label");
    tree.insert_before(InstanceId::ROOT, id, None).expect("insert");
    runtime.send_first_screen().expect("first screen");
    id
}

fn tap_token(runtime: &DualThreadRuntime<MemoryNative>, id: InstanceId) -> String {
    let tree = runtime.main().tree();
    let element = tree.instance(id).and_then(|i| i.root_element()).expect("element");
    match tree.native().event(element, EventType::Bind, "tap") {
        Some(EventPayload::Token(token)) => token.clone(),
        other => panic!("tap listener expected, got {other:?}"),
    }
}

fn text(runtime: &DualThreadRuntime<MemoryNative>) -> String {
    let tree = runtime.main().tree();
    tree.native().text_content(tree.page())
}

#[test]
fn taps_round_trip_through_the_background() {
    let app = Counter::default();
    let reset = Arc::clone(&app.reset);
    let mut runtime = DualThreadRuntime::spawn(registry(), MemoryNative::new(), app).expect("spawn");
    let ui = RecordingUiSink::new();
    runtime.main_mut().set_ui_sink(Box::new(ui.clone()));

    let id = first_screen(&mut runtime);
    let hydration = runtime.wait_for_patch(WAIT).expect("hydration").expect("payload");
    assert_eq!(hydration.applied, 0);
    assert_eq!(text(&runtime), "0");

    let token = tap_token(&runtime, id);
    runtime.publish_event(token.clone(), PropValue::Null).expect("tap");
    runtime.wait_for_patch(WAIT).expect("update").expect("payload");
    assert_eq!(text(&runtime), "1");
    let selectors: Vec<String> = ui.applied().into_iter().map(|(selector, _)| selector).collect();
    assert_eq!(selectors, [format!("[react-ref-{id}-1]")]);

    runtime.publish_event(token, PropValue::Null).expect("tap");
    runtime.wait_for_patch(WAIT).expect("update").expect("payload");
    assert_eq!(text(&runtime), "2");

    let handle = (*reset.lock().unwrap()).expect("reset action");
    runtime.run_on_background(handle, Vec::new()).expect("reset");
    runtime.wait_for_patch(WAIT).expect("reset").expect("payload");
    assert_eq!(text(&runtime), "0");

    runtime.shutdown().expect("shutdown");
}

#[test]
fn reload_drops_in_flight_patches_and_clears_the_page() {
    let mut runtime = DualThreadRuntime::spawn(registry(), MemoryNative::new(), Counter::default()).expect("spawn");
    first_screen(&mut runtime);
    runtime.wait_for_patch(WAIT).expect("hydration").expect("payload");

    runtime.reload().expect("reload");
    let report = runtime.wait_for_patch(WAIT).expect("reload patch").expect("payload");
    assert!(!report.stale);
    assert_eq!(report.commit.expect("commit").destroyed.len(), 1);
    assert!(runtime.main().tree().children(InstanceId::ROOT).expect("root").is_empty());
    assert_eq!(runtime.pump().expect("pump"), Vec::new());
}
