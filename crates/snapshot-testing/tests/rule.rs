use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use snapshot_core::{EventType, InstanceId, NativeOp, PropValue, SlotValue, TemplateId, TemplateRegistry};
use snapshot_macros::snapshot;
use snapshot_testing::prelude::*;

fn registry() -> Arc<TemplateRegistry> {
    let registry = TemplateRegistry::new();
    registry.register(
        snapshot! { "button", view(class = dyn, bindtap = dyn) { text { dyn } } }
            .build()
            .expect("button"),
    );
    Arc::new(registry)
}

/// Same button on both sides; returns (main id, background id, taps).
fn mounted(rule: &mut SnapshotTestRule) -> (InstanceId, InstanceId, Arc<AtomicUsize>) {
    let main = {
        let tree = rule.main_tree();
        let id = tree.create_instance(&TemplateId::new("button")).expect("button");
        tree.set_value(id, 0, "idle".into()).expect("class");
        tree.set_value(id, 1, SlotValue::token(format!("{id}:1:"))).expect("tap");
        tree.set_value(id, 2, "Tap".into()).expect("label");
        tree.insert_before(InstanceId::ROOT, id, None).expect("insert");
        id
    };
    let taps = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&taps);
    let tree = rule.background_mut().tree_mut();
    let background = tree.create_instance(&TemplateId::new("button")).expect("button");
    tree.set_value(background, 0, "idle".into()).expect("class");
    tree.on(background, 1, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .expect("tap");
    tree.set_value(background, 2, "Tap".into()).expect("label");
    let root = tree.root();
    tree.insert_before(root, background, None).expect("insert");
    (main, background, taps)
}

#[test]
fn matching_first_screen_hydrates_without_native_writes() {
    let mut rule = SnapshotTestRule::new(registry()).expect("rule");
    mounted(&mut rule);
    rule.hydrate().expect("hydrate");
    let ops = rule.take_ops();
    let first_screen = ops
        .iter()
        .position(|op| matches!(op, NativeOp::Flush { .. }))
        .expect("first screen flush");
    let hydration = &ops[first_screen + 1..];
    assert!(attribute_writes(hydration).is_empty());
    assert_eq!(flush_count(hydration), 1);
    assert_eq!(rule.page_text(), "Tap");
}

#[test]
fn events_reach_the_background_and_updates_come_back() {
    let mut rule = SnapshotTestRule::new(registry()).expect("rule");
    let (main, background, taps) = mounted(&mut rule);
    rule.hydrate().expect("hydrate");
    rule.take_ops();

    rule.fire(main, EventType::Bind, "tap", PropValue::Null).expect("tap");
    assert_eq!(taps.load(Ordering::SeqCst), 1);

    rule.background_mut()
        .tree_mut()
        .set_value(background, 0, "pressed".into())
        .expect("class");
    let report = rule.flush().expect("flush").expect("patch");
    assert_eq!(report.applied, 1);

    let ops = rule.take_ops();
    assert_no_structural_ops(&ops);
    assert_single_flush(&ops);
    let writes = attribute_writes(&ops);
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].1, "class");
    assert_eq!(writes[0].2, &PropValue::from("pressed"));
}

#[test]
fn unbound_listener_fires_nothing() {
    let mut rule = SnapshotTestRule::new(registry()).expect("rule");
    let (main, _, taps) = mounted(&mut rule);
    rule.hydrate().expect("hydrate");
    assert_eq!(rule.listener_token(main, EventType::Catch, "tap"), None);
    assert_eq!(rule.fire(main, EventType::Catch, "tap", PropValue::Null).expect("fire"), None);
    assert_eq!(taps.load(Ordering::SeqCst), 0);
}
