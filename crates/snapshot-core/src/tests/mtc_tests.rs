use super::*;
use crate::native::NativeOp;
use crate::test_support::{mount, quiet_tree};
use crate::value::SlotValue;
use serde_json::json;

fn label(props: &PropValue) -> ElementSpec {
    ElementSpec::new("label").value(props["label"].clone())
}

#[test]
fn unknown_component_renders_a_placeholder() {
    let mut tree = quiet_tree();
    let mount = tree
        .render_mtc(InstanceId::ROOT, None, "Counter", json!({ "label": "Hi" }))
        .unwrap();
    assert!(mount.placeholder);
    assert!(tree.children(mount.root).unwrap().is_empty());
    assert_eq!(tree.mtc().pending(), vec![mount.root]);
    tree.commit().unwrap();
    assert_eq!(tree.native().text_content(tree.page()), "");
}

#[test]
fn bundle_load_fills_waiting_placeholders() {
    let mut tree = quiet_tree();
    let first = tree
        .render_mtc(InstanceId::ROOT, None, "Counter", json!({ "label": "a" }))
        .unwrap();
    let second = tree
        .render_mtc(InstanceId::ROOT, None, "Counter", json!({ "label": "b" }))
        .unwrap();
    let other = tree.render_mtc(InstanceId::ROOT, None, "Other", json!({})).unwrap();
    tree.commit().unwrap();

    let filled = tree.on_bundle_loaded("Counter", label).unwrap();
    assert_eq!(filled, vec![first.root, second.root]);
    assert_eq!(tree.mtc().pending(), vec![other.root]);
    tree.commit().unwrap();
    assert_eq!(tree.native().text_content(tree.page()), "ab");
}

#[test]
fn known_component_renders_and_updates_in_place() {
    let mut tree = quiet_tree();
    tree.register_mtc("Counter", label);
    let mount = tree
        .render_mtc(InstanceId::ROOT, None, "Counter", json!({ "label": "1" }))
        .unwrap();
    assert!(!mount.placeholder);
    tree.commit().unwrap();
    let rendered = tree.children(mount.root).unwrap().to_vec();
    tree.native_mut().clear_ops();

    assert!(tree.update_mtc(mount.root, json!({ "label": "2" })).unwrap());
    assert_eq!(tree.children(mount.root).unwrap(), rendered.as_slice());
    tree.commit().unwrap();
    let updates = tree
        .native()
        .ops()
        .iter()
        .filter(|op| matches!(op, NativeOp::SetAttribute { .. }))
        .count();
    assert_eq!(updates, 1);
    assert_eq!(tree.native().text_content(tree.page()), "2");
}

#[test]
fn slot_keeps_background_elements() {
    let mut tree = quiet_tree();
    let host = tree.render_mtc(InstanceId::ROOT, None, "Card", json!({})).unwrap();
    let content = mount(&mut tree, InstanceId::ROOT, "label");
    tree.set_value(content, 0, SlotValue::from("body")).unwrap();
    tree.commit().unwrap();
    let element = tree.instance(content).unwrap().root_element().unwrap();

    let slot = tree.render_mtc_slot(host.root, content).unwrap();
    let report = tree.commit().unwrap();

    assert!(report.destroyed.is_empty());
    assert_eq!(tree.instance(content).unwrap().parent(), Some(slot));
    assert_eq!(tree.instance(content).unwrap().root_element(), Some(element));
    let slot_element = tree.instance(slot).unwrap().root_element().unwrap();
    assert_eq!(tree.native().parent(element), Some(slot_element));
}

#[test]
fn destroyed_sites_are_forgotten() {
    let mut tree = quiet_tree();
    let mount = tree.render_mtc(InstanceId::ROOT, None, "Lazy", json!({})).unwrap();
    tree.commit().unwrap();
    tree.remove_child(InstanceId::ROOT, mount.root).unwrap();
    tree.commit().unwrap();
    assert!(tree.mtc().pending().is_empty());
    assert!(tree.on_bundle_loaded("Lazy", label).unwrap().is_empty());
}
