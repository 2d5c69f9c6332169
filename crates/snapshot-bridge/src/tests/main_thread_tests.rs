use super::*;
use crate::patch::PatchOptions;
use crate::test_support::registry;
use crate::ui_ops::RefProxy;
use serde_json::json;
use snapshot_core::{MemoryNative, NativeOp, SlotValue, TemplateId, WorkletDescriptor};
use snapshot_macros::snapshot;

fn runtime() -> MainThreadRuntime<MemoryNative> {
    let mut runtime = MainThreadRuntime::new(registry(), MemoryNative::new()).unwrap();
    runtime.tree_mut().native_mut().clear_ops();
    runtime
}

/// Renders one label under the root and hydrates it as background id 2.
fn hydrated() -> (MainThreadRuntime<MemoryNative>, InstanceId) {
    let mut runtime = runtime();
    let tree = runtime.tree_mut();
    let label = tree.create_instance(&TemplateId::new("label")).unwrap();
    tree.set_value(label, 0, "first".into()).unwrap();
    tree.insert_before(InstanceId::ROOT, label, None).unwrap();
    runtime.first_screen().unwrap();

    let mut payload = PatchPayload::new(
        Vec::new(),
        PatchOptions {
            is_hydration: true,
            ..Default::default()
        },
    );
    payload.hydration = vec![(InstanceId::ROOT, InstanceId(1)), (label, InstanceId(2))];
    runtime.apply_payload(payload).unwrap();
    runtime.tree_mut().native_mut().clear_ops();
    (runtime, label)
}

fn payload(patches: Vec<SnapshotPatch>) -> PatchPayload {
    PatchPayload::new(patches, PatchOptions::default())
}

fn text_of(runtime: &MainThreadRuntime<MemoryNative>, id: InstanceId) -> String {
    let element = runtime
        .tree()
        .instance(id)
        .and_then(|instance| instance.root_element())
        .unwrap();
    runtime.tree().native().text_content(element)
}

#[test]
fn first_screen_serializes_the_committed_tree() {
    let mut runtime = runtime();
    let label = {
        let tree = runtime.tree_mut();
        let label = tree.create_instance(&TemplateId::new("label")).unwrap();
        tree.set_value(label, 0, "hello".into()).unwrap();
        tree.insert_before(InstanceId::ROOT, label, None).unwrap();
        label
    };
    let LifecycleEvent::FirstScreen { root } = runtime.first_screen().unwrap() else {
        panic!("first screen expected");
    };
    assert_eq!(root.count(), 2);
    assert_eq!(root.children[0].id, label);
    assert_eq!(root.children[0].values, vec![SlotValue::from("hello")]);
    assert_eq!(runtime.tree().native().flush_count(), 1);
    assert_eq!(text_of(&runtime, label), "hello");
}

#[test]
fn background_ids_reach_hydrated_instances() {
    let (mut runtime, label) = hydrated();
    let flushes = runtime.tree().native().flush_count();
    let report = runtime
        .apply_payload(payload(vec![SnapshotPatch::SetAttribute {
            id: InstanceId(2),
            index: 0,
            value: "second".into(),
        }]))
        .unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(text_of(&runtime, label), "second");
    assert_eq!(runtime.tree().native().flush_count(), flushes + 1);
}

#[test]
fn created_instances_keep_their_background_id() {
    let (mut runtime, label) = hydrated();
    runtime
        .apply_payload(payload(vec![
            SnapshotPatch::CreateElement {
                template: TemplateId::new("label"),
                id: InstanceId(3),
            },
            SnapshotPatch::SetAttributes {
                id: InstanceId(3),
                values: vec!["before".into()],
            },
            SnapshotPatch::InsertBefore {
                parent: InstanceId(1),
                child: InstanceId(3),
                before: Some(InstanceId(2)),
            },
        ]))
        .unwrap();
    assert_eq!(
        runtime.tree().children(InstanceId::ROOT).unwrap(),
        &[InstanceId(3), label]
    );
    assert_eq!(text_of(&runtime, InstanceId(3)), "before");
    let page = runtime.tree().page();
    assert_eq!(runtime.tree().native().text_content(page), "beforefirst");
}

#[test]
fn stale_payloads_are_dropped() {
    let (mut runtime, label) = hydrated();
    assert_eq!(runtime.reload(), LifecycleEvent::Reload { version: 1 });
    let report = runtime
        .apply_payload(payload(vec![SnapshotPatch::SetAttribute {
            id: InstanceId(2),
            index: 0,
            value: "late".into(),
        }]))
        .unwrap();
    assert!(report.stale);
    assert!(runtime.tree().native().ops().is_empty());
    assert_eq!(text_of(&runtime, label), "first");
}

#[test]
fn unknown_instances_are_skipped() {
    let (mut runtime, label) = hydrated();
    let report = runtime
        .apply_payload(payload(vec![
            SnapshotPatch::SetAttribute {
                id: InstanceId(99),
                index: 0,
                value: "ghost".into(),
            },
            SnapshotPatch::SetAttribute {
                id: InstanceId(2),
                index: 0,
                value: "kept".into(),
            },
        ]))
        .unwrap();
    assert_eq!((report.applied, report.skipped), (1, 1));
    assert_eq!(text_of(&runtime, label), "kept");
}

fn lazy_card_patches(value: &str) -> Vec<SnapshotPatch> {
    vec![
        SnapshotPatch::CreateElement {
            template: TemplateId::new("lazy:card"),
            id: InstanceId(9),
        },
        SnapshotPatch::InsertBefore {
            parent: InstanceId(1),
            child: InstanceId(9),
            before: None,
        },
        SnapshotPatch::SetAttribute {
            id: InstanceId(2),
            index: 0,
            value: value.into(),
        },
    ]
}

fn register_lazy_card(runtime: &MainThreadRuntime<MemoryNative>) {
    let card = snapshot! { "card", view(class = "card") }.entry("lazy").build().unwrap();
    runtime.tree().registry().register(card);
}

#[test]
fn unregistered_templates_defer_the_whole_payload() {
    let (mut runtime, label) = hydrated();
    let err = runtime.apply_payload(payload(lazy_card_patches("second"))).unwrap_err();

    assert!(err.is_recoverable());
    assert!(matches!(
        err,
        crate::BridgeError::Snapshot(SnapshotError::TemplateNotFound { ref id }) if id == "lazy:card"
    ));
    assert_eq!(runtime.deferred_payloads(), 1);
    assert!(runtime.tree().native().ops().is_empty());
    assert_eq!(text_of(&runtime, label), "first");
    assert_eq!(runtime.tree().children(InstanceId::ROOT).unwrap(), &[label]);
}

#[test]
fn deferred_payloads_apply_in_order_once_the_bundle_loads() {
    let (mut runtime, label) = hydrated();
    assert!(runtime.apply_payload(payload(lazy_card_patches("second"))).is_err());
    let later = payload(vec![SnapshotPatch::SetAttribute {
        id: InstanceId(2),
        index: 0,
        value: "third".into(),
    }]);
    assert!(runtime.apply_payload(later).unwrap_err().is_recoverable());
    assert_eq!(runtime.deferred_payloads(), 2);
    assert!(runtime.retry_deferred().unwrap().is_empty());

    register_lazy_card(&runtime);
    let reports = runtime.retry_deferred().unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!((reports[0].applied, reports[0].skipped), (3, 0));
    assert_eq!(runtime.deferred_payloads(), 0);
    assert_eq!(
        runtime.tree().children(InstanceId::ROOT).unwrap(),
        &[label, InstanceId(9)]
    );
    assert_eq!(text_of(&runtime, label), "third");
}

#[test]
fn reload_drops_deferred_payloads() {
    let (mut runtime, label) = hydrated();
    assert!(runtime.apply_payload(payload(lazy_card_patches("second"))).is_err());
    runtime.reload();
    register_lazy_card(&runtime);

    assert!(runtime.retry_deferred().unwrap().is_empty());
    assert_eq!(runtime.deferred_payloads(), 0);
    assert_eq!(text_of(&runtime, label), "first");
}

#[test]
fn cyclic_inserts_are_skipped() {
    let (mut runtime, label) = hydrated();
    let report = runtime
        .apply_payload(payload(vec![SnapshotPatch::InsertBefore {
            parent: InstanceId(2),
            child: InstanceId(1),
            before: None,
        }]))
        .unwrap();
    assert_eq!((report.applied, report.skipped), (0, 1));
    assert_eq!(runtime.tree().instance(InstanceId::ROOT).unwrap().parent(), None);
    assert_eq!(runtime.tree().children(InstanceId::ROOT).unwrap(), &[label]);
}

#[test]
fn shape_errors_abort_the_payload() {
    let (mut runtime, _) = hydrated();
    let err = runtime
        .apply_payload(payload(vec![SnapshotPatch::SetAttribute {
            id: InstanceId(2),
            index: 5,
            value: "x".into(),
        }]))
        .unwrap_err();
    assert!(!err.is_recoverable());
    assert!(!runtime
        .tree()
        .native()
        .ops()
        .iter()
        .any(|op| matches!(op, NativeOp::Flush { .. })));
}

#[test]
fn removal_forgets_hydration_entries() {
    let (mut runtime, label) = hydrated();
    let report = runtime
        .apply_payload(payload(vec![SnapshotPatch::RemoveChild {
            parent: InstanceId(1),
            child: InstanceId(2),
        }]))
        .unwrap();
    assert_eq!(report.commit.unwrap().destroyed, vec![label]);
    assert!(runtime.to_background(label).is_err());
    assert_eq!(runtime.to_background(InstanceId::ROOT).unwrap(), InstanceId(1));
}

#[test]
fn tasks_run_after_the_commit() {
    let (mut runtime, _) = hydrated();
    runtime.set_task_runner(|task| PropValue::from(task.worklet.id.clone()));
    let mut payload = payload(Vec::new());
    payload.run_on_main_thread = vec![
        RunOnMainThread {
            worklet: WorkletDescriptor::new("measure"),
            params: Vec::new(),
            resolve_id: 4,
        },
        RunOnMainThread {
            worklet: WorkletDescriptor::new("scroll"),
            params: vec![PropValue::from(1)],
            resolve_id: 5,
        },
    ];
    let report = runtime.apply_payload(payload).unwrap();
    assert_eq!(
        report.task_results,
        vec![(4, PropValue::from("measure")), (5, PropValue::from("scroll"))]
    );
    assert!(report.commit.is_some());
}

#[test]
fn destroy_lifetime_clears_the_map() {
    let (mut runtime, label) = hydrated();
    let report = runtime.on_engine_signal(&EngineSignal::DestroyLifetime).unwrap();
    assert_eq!(report.destroyed, vec![label]);
    assert!(runtime.to_background(label).is_err());
    assert!(runtime.on_engine_signal(&EngineSignal::DestroyLifetime).is_none());
}

#[test]
fn native_props_reach_the_element_behind_the_ref() {
    let mut runtime = runtime();
    let anchor = {
        let tree = runtime.tree_mut();
        let anchor = tree.create_instance(&TemplateId::new("anchor")).unwrap();
        tree.insert_before(InstanceId::ROOT, anchor, None).unwrap();
        anchor
    };
    runtime.first_screen().unwrap();
    let element = runtime.tree().instance(anchor).unwrap().root_element().unwrap();
    let selector = format!("[react-ref-{anchor}-0]");
    assert_eq!(runtime.ref_element(&selector), Some(element));

    runtime.apply_ui_op(
        &selector,
        &UiOp::SetNativeProps {
            target: RefProxy::new(InstanceId(2), 0),
            props: json!({ "opacity": 0.5 }),
        },
    );

    assert_eq!(runtime.tree().native().attribute(element, "opacity"), Some(&json!(0.5)));
    assert_eq!(runtime.ref_element("[react-ref-99-0]"), None);
}
