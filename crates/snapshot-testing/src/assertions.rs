//! Queries over the calls recorded by [`MemoryNative`](snapshot_core::MemoryNative).

use snapshot_core::{ElementHandle, NativeOp, PropValue};

/// `(element, attribute, new value)` of every attribute write.
pub fn attribute_writes(ops: &[NativeOp]) -> Vec<(ElementHandle, &str, &PropValue)> {
    ops.iter()
        .filter_map(|op| match op {
            NativeOp::SetAttribute {
                element, name, new, ..
            } => Some((*element, name.as_str(), new)),
            _ => None,
        })
        .collect()
}

pub fn flush_count(ops: &[NativeOp]) -> usize {
    ops.iter()
        .filter(|op| matches!(op, NativeOp::Flush { .. }))
        .count()
}

#[track_caller]
pub fn assert_no_structural_ops(ops: &[NativeOp]) {
    let structural: Vec<&NativeOp> = ops
        .iter()
        .filter(|op| op.is_create() || op.is_structural())
        .collect();
    assert!(
        structural.is_empty(),
        "expected attribute updates only, got {structural:#?}"
    );
}

#[track_caller]
pub fn assert_single_flush(ops: &[NativeOp]) {
    assert_eq!(flush_count(ops), 1, "expected exactly one flush in {ops:#?}");
}
