use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use snapshot_bridge::{BackgroundRuntime, LifecycleEvent, MainThreadRuntime, PatchPayload};
use snapshot_core::{EventPayload, EventType, InstanceId, MemoryNative, PropValue, SlotValue, TemplateId, TemplateRegistry};
use snapshot_macros::snapshot;

fn registry() -> Arc<TemplateRegistry> {
    let registry = TemplateRegistry::new();
    for template in [
        snapshot! { "counter", view(bindtap = dyn) { text { dyn } } },
        snapshot! { "badge", text { "new" } },
    ] {
        registry.register(template.build().expect("template"));
    }
    Arc::new(registry)
}

fn ship(payload: &PatchPayload) -> PatchPayload {
    PatchPayload::from_json(&payload.to_json().expect("encode")).expect("decode")
}

fn ship_event(event: &LifecycleEvent) -> LifecycleEvent {
    LifecycleEvent::from_json(&event.to_json().expect("encode")).expect("decode")
}

fn tap_token(main: &MainThreadRuntime<MemoryNative>, id: InstanceId) -> String {
    let element = main
        .tree()
        .instance(id)
        .and_then(|instance| instance.root_element())
        .expect("counter element");
    match main.tree().native().event(element, EventType::Bind, "tap") {
        Some(EventPayload::Token(token)) => token.clone(),
        other => panic!("tap listener expected, got {other:?}"),
    }
}

#[test]
fn counter_survives_hydration_and_updates() {
    let registry = registry();

    let mut main = MainThreadRuntime::new(Arc::clone(&registry), MemoryNative::new()).expect("main");
    let first = {
        let tree = main.tree_mut();
        let counter = tree.create_instance(&TemplateId::new("counter")).expect("counter");
        tree.set_value(counter, 0, SlotValue::token(format!("{counter}:0:"))).expect("tap");
        tree.set_value(counter, 1, "0".into()).expect("label");
        tree.insert_before(InstanceId::ROOT, counter, None).expect("insert");
        counter
    };
    let first_screen = main.first_screen().expect("first screen");

    let count = Arc::new(AtomicI64::new(0));
    let mut background = BackgroundRuntime::new(Arc::clone(&registry));
    let counter = {
        let tree = background.tree_mut();
        let counter = tree.create_instance(&TemplateId::new("counter")).expect("counter");
        let clicks = Arc::clone(&count);
        tree.on(counter, 0, move |_| {
            clicks.fetch_add(1, Ordering::SeqCst);
        })
        .expect("handler");
        tree.set_value(counter, 1, "0".into()).expect("label");
        let root = tree.root();
        tree.insert_before(root, counter, None).expect("insert");
        counter
    };
    background.mark_root_rendered().expect("root");

    let hydration = background
        .on_lifecycle_event(ship_event(&first_screen))
        .expect("hydrate")
        .expect("hydration payload");
    assert!(hydration.patches.is_empty());
    main.apply_payload(ship(&hydration)).expect("apply hydration");
    assert_eq!(main.to_background(first).expect("mapped"), counter);

    let tap = LifecycleEvent::PublishEvent {
        token: tap_token(&main, first),
        data: PropValue::Null,
    };
    background.on_lifecycle_event(ship_event(&tap)).expect("tap");
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let label = count.load(Ordering::SeqCst).to_string();
    background
        .tree_mut()
        .set_value(counter, 1, label.into())
        .expect("label");
    let badge = background
        .tree_mut()
        .create_instance(&TemplateId::new("badge"))
        .expect("badge");
    let root = background.tree().root();
    background.tree_mut().insert_before(root, badge, None).expect("badge");

    let update = background.commit().expect("update payload");
    let report = main.apply_payload(ship(&update)).expect("apply update");
    assert_eq!(report.skipped, 0);

    let page = main.tree().page();
    assert_eq!(main.tree().native().text_content(page), "1new");
    assert_eq!(main.tree().children(InstanceId::ROOT).expect("root"), &[first, badge]);
}
