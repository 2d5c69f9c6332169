use super::*;
use crate::gesture::{BaseGesture, GestureDescriptor, GestureKind};
use crate::native::{EngineSignal, EventPayload, EventType, MemoryNative, NativeOp};
use crate::template::TemplateId;
use crate::test_support::{mount, quiet_tree};
use crate::value::{HandlerId, RefBinding};
use crate::worklet::{RecordingWorkletRuntime, WorkletCall, WorkletDescriptor, WorkletRefDescriptor, WorkletValue};
use std::collections::BTreeMap;

fn element_of(tree: &SnapshotTree<MemoryNative>, id: InstanceId) -> ElementHandle {
    tree.instance(id).unwrap().root_element().unwrap()
}

fn flushes(ops: &[NativeOp]) -> usize {
    ops.iter().filter(|op| matches!(op, NativeOp::Flush { .. })).count()
}

#[test]
fn text_update_is_a_single_set_attribute() {
    let mut tree = quiet_tree();
    let label = mount(&mut tree, InstanceId::ROOT, "label");
    tree.set_value(label, 0, "Hello".into()).unwrap();
    tree.commit().unwrap();
    let raw = tree.instance(label).unwrap().elements().unwrap()[1];
    assert_eq!(tree.native().text_content(tree.page()), "Hello");
    tree.native_mut().clear_ops();

    tree.set_value(label, 0, "World".into()).unwrap();
    let report = tree.commit().unwrap();

    let ops = tree.native_mut().take_ops();
    assert_eq!(
        ops,
        vec![
            NativeOp::SetAttribute {
                element: raw,
                name: "text".into(),
                old: "Hello".into(),
                new: "World".into(),
            },
            NativeOp::Flush {
                root: tree.page(),
                options: FlushOptions {
                    trigger_layout: true,
                    operation_id: Some(report.operation_id),
                    pipeline: None,
                    exposure_changed: Vec::new(),
                },
            },
        ]
    );
    assert_eq!(report.slot_updates, 1);
    assert_eq!(report.structural_ops, 0);
}

#[test]
fn keyed_reorder_moves_without_recreating() {
    let mut tree = quiet_tree();
    let list = mount(&mut tree, InstanceId::ROOT, "list");
    let a = mount(&mut tree, list, "item");
    let b = mount(&mut tree, list, "item");
    let c = mount(&mut tree, list, "item");
    tree.commit().unwrap();
    let (ea, eb, ec) = (element_of(&tree, a), element_of(&tree, b), element_of(&tree, c));
    let host = element_of(&tree, list);
    tree.native_mut().clear_ops();

    tree.insert_before(list, c, Some(a)).unwrap();
    let report = tree.commit().unwrap();

    let ops = tree.native_mut().take_ops();
    let structural: Vec<_> = ops.iter().filter(|op| op.is_structural()).collect();
    assert_eq!(
        structural,
        vec![&NativeOp::InsertElementBefore {
            parent: host,
            child: ec,
            reference: Some(ea),
        }]
    );
    assert!(!ops.iter().any(NativeOp::is_create));
    assert!(report.destroyed.is_empty());
    assert_eq!(tree.native().children(host), &[ec, ea, eb]);
    // identity survives the move
    assert_eq!(element_of(&tree, c), ec);
}

#[test]
fn removed_children_are_destroyed_at_commit_end() {
    let mut tree = quiet_tree();
    let list = mount(&mut tree, InstanceId::ROOT, "list");
    let nested = mount(&mut tree, list, "list");
    let leaf = mount(&mut tree, nested, "item");
    tree.commit().unwrap();

    tree.remove_child(list, nested).unwrap();
    assert!(tree.contains(nested), "destruction waits for commit end");
    let report = tree.commit().unwrap();
    assert_eq!(report.destroyed, vec![nested, leaf]);
    assert!(!tree.contains(nested));
    assert!(!tree.contains(leaf));
    assert!(tree.native().children(element_of(&tree, list)).is_empty());
}

#[test]
fn reparented_children_survive() {
    let mut tree = quiet_tree();
    let left = mount(&mut tree, InstanceId::ROOT, "list");
    let right = mount(&mut tree, InstanceId::ROOT, "list");
    let item = mount(&mut tree, left, "item");
    tree.commit().unwrap();
    let element = element_of(&tree, item);
    tree.native_mut().clear_ops();

    tree.remove_child(left, item).unwrap();
    tree.insert_before(right, item, None).unwrap();
    let report = tree.commit().unwrap();

    assert!(report.destroyed.is_empty());
    assert_eq!(element_of(&tree, item), element);
    assert_eq!(tree.native().parent(element), Some(element_of(&tree, right)));
    assert!(!tree.native().ops().iter().any(NativeOp::is_create));
}

#[test]
fn shape_mismatch_aborts_before_native_calls() {
    let mut tree = quiet_tree();
    let label = mount(&mut tree, InstanceId::ROOT, "label");
    let item = mount(&mut tree, InstanceId::ROOT, "item");
    tree.commit().unwrap();
    tree.native_mut().clear_ops();

    tree.set_value(item, 0, "changed".into()).unwrap();
    let gesture: GestureDescriptor = BaseGesture::new(1, GestureKind::Tap).into();
    tree.set_value(label, 0, gesture.into()).unwrap();
    let err = tree.commit().unwrap_err();

    assert!(matches!(err, SnapshotError::TemplateShapeMismatch { .. }));
    assert!(tree.native().ops().is_empty());
}

#[test]
fn factory_shape_errors_leave_the_live_tree_untouched() {
    let mut tree = quiet_tree();
    let short = SnapshotTemplate::builder("short")
        .element_count(2)
        .create(|native: &mut dyn NativeApi| vec![native.create_element(&crate::ElementKind::View)])
        .build()
        .unwrap();
    tree.registry().register(short);
    let list = mount(&mut tree, InstanceId::ROOT, "list");
    let item = mount(&mut tree, list, "item");
    tree.commit().unwrap();
    let host = element_of(&tree, list);
    let kept = element_of(&tree, item);
    tree.native_mut().clear_ops();

    tree.remove_child(list, item).unwrap();
    let broken = mount(&mut tree, list, "short");
    let err = tree.commit().unwrap_err();

    assert!(matches!(err, SnapshotError::TemplateShapeMismatch { .. }));
    assert!(tree.native().ops().iter().all(NativeOp::is_create));
    assert_eq!(tree.native().children(host), &[kept]);
    assert!(tree.contains(item));

    tree.remove_child(list, broken).unwrap();
    let report = tree.commit().unwrap();
    assert_eq!(report.destroyed, vec![item, broken]);
    assert!(tree.native().children(host).is_empty());
}

#[test]
fn factories_must_cover_referenced_elements() {
    let mut tree = quiet_tree();
    let narrow = SnapshotTemplate::builder("narrow")
        .create(|native: &mut dyn NativeApi| vec![native.create_element(&crate::ElementKind::View)])
        .updater(crate::updaters::text(1))
        .build()
        .unwrap();
    tree.registry().register(narrow);
    let label = mount(&mut tree, InstanceId::ROOT, "label");
    tree.commit().unwrap();
    tree.native_mut().clear_ops();

    tree.remove_child(InstanceId::ROOT, label).unwrap();
    mount(&mut tree, InstanceId::ROOT, "narrow");
    let err = tree.commit().unwrap_err();

    assert!(matches!(err, SnapshotError::TemplateShapeMismatch { .. }));
    assert!(!tree.native().ops().iter().any(NativeOp::is_structural));
}

#[test]
fn children_without_a_slot_part_are_rejected() {
    let mut tree = quiet_tree();
    let item = mount(&mut tree, InstanceId::ROOT, "item");
    mount(&mut tree, item, "label");
    let err = tree.commit().unwrap_err();
    assert!(matches!(err, SnapshotError::TemplateShapeMismatch { .. }));
    assert!(tree.native().ops().is_empty());
}

#[test]
fn every_commit_flushes_exactly_once() {
    let mut tree = quiet_tree();
    let list = mount(&mut tree, InstanceId::ROOT, "list");
    for _ in 0..4 {
        mount(&mut tree, list, "item");
    }
    tree.commit().unwrap();
    assert_eq!(flushes(tree.native().ops()), 1);
    tree.commit().unwrap();
    assert_eq!(flushes(tree.native().ops()), 2);
}

#[test]
fn slot_parts_place_children_by_position() {
    let mut tree = quiet_tree();
    let host = mount(&mut tree, InstanceId::ROOT, "slots");
    let first = mount(&mut tree, host, "label");
    let second = mount(&mut tree, host, "label");
    tree.commit().unwrap();
    let elements = tree.instance(host).unwrap().elements().unwrap().to_vec();
    assert_eq!(tree.native().children(elements[1]), &[element_of(&tree, first)]);
    assert_eq!(tree.native().children(elements[2]), &[element_of(&tree, second)]);

    let replacement = tree.create_instance(&TemplateId::new("label")).unwrap();
    tree.remove_child(host, second).unwrap();
    tree.insert_before(host, replacement, None).unwrap();
    let report = tree.commit().unwrap();
    assert_eq!(tree.native().children(elements[2]), &[element_of(&tree, replacement)]);
    assert_eq!(report.destroyed, vec![second]);
}

#[test]
fn exposure_changes_reach_the_flush() {
    let mut tree = quiet_tree();
    let tracked = mount(&mut tree, InstanceId::ROOT, "exposure");
    tree.commit().unwrap();
    tree.native_mut().clear_ops();

    tree.set_value(tracked, 0, "banner".into()).unwrap();
    let report = tree.commit().unwrap();
    assert_eq!(report.exposure_changed, vec![element_of(&tree, tracked)]);
    let flush = tree.native().ops().last().cloned();
    assert!(matches!(
        flush,
        Some(NativeOp::Flush { options, .. }) if options.exposure_changed == report.exposure_changed
    ));
}

#[test]
fn exposure_tracking_can_be_disabled() {
    let options = crate::RuntimeOptions {
        track_exposure: false,
        ..Default::default()
    };
    let mut tree =
        SnapshotTree::with_options(crate::test_support::registry(), MemoryNative::new(), options).unwrap();
    let tracked = mount(&mut tree, InstanceId::ROOT, "exposure");
    tree.set_value(tracked, 0, "banner".into()).unwrap();
    let report = tree.commit().unwrap();
    assert!(report.exposure_changed.is_empty());
}

#[test]
fn destroy_lifetime_tears_everything_down_once() {
    let mut tree = quiet_tree();
    let list = mount(&mut tree, InstanceId::ROOT, "list");
    let item = mount(&mut tree, list, "item");
    tree.commit().unwrap();
    let page = tree.page();

    let report = tree.on_engine_signal(&EngineSignal::DestroyLifetime).unwrap();
    assert_eq!(report.destroyed, vec![list, item]);
    assert!(tree.native().children(page).is_empty());
    assert!(!tree.native().has_lifecycle_listener());
    assert_eq!(tree.len(), 1);
    assert!(tree.is_lifetime_ended());

    tree.native_mut().clear_ops();
    assert!(tree.on_engine_signal(&EngineSignal::DestroyLifetime).is_none());
    assert_eq!(tree.commit().unwrap(), CommitReport::default());
    assert!(tree.native().ops().is_empty());
}

#[test]
fn gesture_slots_diff_detectors_positionally() {
    let mut tree = quiet_tree();
    let host = mount(&mut tree, InstanceId::ROOT, "gesture");
    let composed = GestureDescriptor::simultaneous(vec![
        BaseGesture::new(1, GestureKind::Pan).into(),
        BaseGesture::new(2, GestureKind::Tap).into(),
    ]);
    tree.set_value(host, 0, composed.into()).unwrap();
    tree.commit().unwrap();
    let element = element_of(&tree, host);
    assert_eq!(tree.native().gestures(element).len(), 2);
    assert_eq!(tree.native().attribute(element, "has-react-gesture"), Some(&true.into()));
    tree.native_mut().clear_ops();

    tree.set_value(host, 0, GestureDescriptor::from(BaseGesture::new(1, GestureKind::Pan)).into())
        .unwrap();
    tree.commit().unwrap();
    let ops = tree.native_mut().take_ops();
    assert!(ops.contains(&NativeOp::RemoveGestureDetector { element, gesture_id: 2 }));
    assert_eq!(tree.native().gestures(element).len(), 1);
    // relation to the removed sibling is gone
    assert!(tree.native().gestures(element)[0].simultaneous_with.is_empty());
}

#[test]
fn worklet_refs_apply_after_patch_and_release_on_destroy() {
    let mut tree = quiet_tree();
    let recorder = RecordingWorkletRuntime::new();
    tree.set_worklet_runtime(Box::new(recorder.clone()));
    let host = mount(&mut tree, InstanceId::ROOT, "worklet");
    let wref = WorkletRefDescriptor { wvid: 42, initial: serde_json::Value::Null };
    tree.set_value(host, 0, WorkletValue::Function(WorkletDescriptor::new("onTap")).into())
        .unwrap();
    tree.set_value(host, 1, WorkletValue::Ref(wref.clone()).into()).unwrap();
    tree.commit().unwrap();
    let element = element_of(&tree, host);

    assert_eq!(
        recorder.take_calls(),
        vec![
            WorkletCall::CtxUpdate {
                new: Some("onTap".into()),
                old: None,
                first_bind: true,
                element,
            },
            WorkletCall::RefUpdate { wvid: 42, element: Some(element) },
        ]
    );
    assert!(matches!(
        tree.native().event(element, EventType::Bind, "tap"),
        Some(EventPayload::Worklet(w)) if w.id == "onTap"
    ));

    tree.remove_child(InstanceId::ROOT, host).unwrap();
    tree.commit().unwrap();
    assert_eq!(recorder.take_calls(), vec![WorkletCall::Release { wvid: 42 }]);
}

#[test]
fn spread_events_use_the_spread_key() {
    let mut tree = quiet_tree();
    let host = mount(&mut tree, InstanceId::ROOT, "spread");
    let mut props = BTreeMap::new();
    props.insert("bindtap".to_string(), SlotValue::event(HandlerId(1)));
    props.insert("class".to_string(), SlotValue::from("card"));
    props.insert("data-index".to_string(), SlotValue::from(3i64));
    tree.set_value(host, 0, SlotValue::Spread(props.clone())).unwrap();
    tree.commit().unwrap();
    let element = element_of(&tree, host);
    assert_eq!(
        tree.native().event(element, EventType::Bind, "tap"),
        Some(&EventPayload::Token(format!("{host}:0:bindtap")))
    );
    assert_eq!(tree.native().attribute(element, "class"), Some(&"card".into()));
    tree.native_mut().clear_ops();

    props.remove("bindtap");
    props.insert("class".to_string(), SlotValue::from("card"));
    tree.set_value(host, 0, SlotValue::Spread(props)).unwrap();
    tree.commit().unwrap();
    let ops = tree.native_mut().take_ops();
    assert_eq!(ops.len(), 2, "remove event + flush: {ops:?}");
    assert!(!tree.native().has_listener(element, EventType::Bind, "tap"));
}

#[test]
fn background_refs_become_selector_attributes() {
    let mut tree = quiet_tree();
    let host = mount(&mut tree, InstanceId::ROOT, "ref");
    tree.set_value(host, 0, RefBinding::Handle(HandlerId(5)).into()).unwrap();
    tree.commit().unwrap();
    let element = element_of(&tree, host);
    let selector = crate::updaters::ref_selector(host, 0);
    assert_eq!(tree.native().attribute(element, &selector), Some(&1.into()));

    tree.set_value(host, 0, SlotValue::Empty).unwrap();
    tree.commit().unwrap();
    assert!(tree.native().attribute(element, &selector).is_none());
}
