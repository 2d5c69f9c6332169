//! Per-slot value diffing and child list reconciliation.

use std::hash::Hash;
use std::sync::Arc;

use crate::collections::map::{HashMap, HashSet};
use crate::error::{Result, SnapshotError};
use crate::native::NativeApi;
use crate::template::TemplateId;
use crate::tree::SnapshotTree;
use crate::updaters::SlotUpdate;
use crate::value::SlotValue;
use crate::{key_of, InstanceId, Key};

/// Canonical handler name: `"{instance}:{expression}:{spread key}"`.
pub fn event_token(instance: InstanceId, expr_index: usize, spread_key: &str) -> String {
    format!("{instance}:{expr_index}:{spread_key}")
}

/// Parses a canonical token back into its parts.
pub fn parse_event_token(token: &str) -> Option<(InstanceId, usize, &str)> {
    let mut parts = token.splitn(3, ':');
    let id = parts.next()?.parse().ok()?;
    let index = parts.next()?.parse().ok()?;
    let spread_key = parts.next()?;
    Some((InstanceId(id), index, spread_key))
}

/// Desired shape of one child, produced by a render pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSpec {
    pub key: Option<Key>,
    pub template: TemplateId,
    pub values: Vec<SlotValue>,
    pub children: Vec<ElementSpec>,
}

impl ElementSpec {
    pub fn new(template: impl Into<TemplateId>) -> Self {
        Self {
            key: None,
            template: template.into(),
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn key<K: Hash>(mut self, key: K) -> Self {
        self.key = Some(key_of(&key));
        self
    }

    pub fn value(mut self, value: impl Into<SlotValue>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn values(mut self, values: Vec<SlotValue>) -> Self {
        self.values = values;
        self
    }

    pub fn child(mut self, child: ElementSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: Vec<ElementSpec>) -> Self {
        self.children = children;
        self
    }
}

/// Structural change to one parent's child list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOp {
    Remove { id: InstanceId },
    Insert { id: InstanceId, before: Option<InstanceId> },
    Move { id: InstanceId, before: Option<InstanceId> },
}

impl ChildOp {
    pub fn id(&self) -> InstanceId {
        match self {
            ChildOp::Remove { id } | ChildOp::Insert { id, .. } | ChildOp::Move { id, .. } => *id,
        }
    }
}

/// Minimal operations turning `old` into `new`, compared by identity.
///
/// Removals come first. Inserts and moves follow from the last position to
/// the first so every `before` reference is already in its final place.
/// Children on the longest increasing subsequence of kept positions stay put.
pub fn diff_children(old: &[InstanceId], new: &[InstanceId]) -> Vec<ChildOp> {
    if old == new {
        return Vec::new();
    }
    let new_positions: HashMap<InstanceId, usize> =
        new.iter().enumerate().map(|(pos, id)| (*id, pos)).collect();
    let mut ops = Vec::new();
    let mut kept = Vec::new();
    for id in old {
        match new_positions.get(id) {
            Some(pos) => kept.push(*pos),
            None => ops.push(ChildOp::Remove { id: *id }),
        }
    }
    let old_set: HashSet<InstanceId> = old.iter().copied().collect();
    let stable: HashSet<usize> = longest_increasing_subsequence(&kept)
        .into_iter()
        .map(|i| kept[i])
        .collect();

    let mut tail = Vec::new();
    let mut before = None;
    for (pos, id) in new.iter().enumerate().rev() {
        if !old_set.contains(id) {
            tail.push(ChildOp::Insert { id: *id, before });
        } else if !stable.contains(&pos) {
            tail.push(ChildOp::Move { id: *id, before });
        }
        before = Some(*id);
    }
    ops.extend(tail);
    ops
}

/// Indices into `seq` forming one longest strictly increasing subsequence.
fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
    for (i, value) in seq.iter().enumerate() {
        let slot = tails.partition_point(|&t| seq[t] < *value);
        if slot > 0 {
            prev[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }
    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}

/// Identity of an existing child as seen by [`match_children`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSignature {
    pub id: InstanceId,
    pub key: Option<Key>,
    pub template: TemplateId,
}

/// Pairs each spec with an existing child to reuse, if any.
///
/// Keyed specs match the old child with the same key and template; a keyed
/// child whose template changed is recreated. Unkeyed specs take the first
/// unused unkeyed child of the same template, in order.
pub fn match_children(old: &[ChildSignature], new: &[ElementSpec]) -> Vec<Option<InstanceId>> {
    let mut used = vec![false; old.len()];
    let keyed: HashMap<Key, usize> = old
        .iter()
        .enumerate()
        .filter_map(|(index, child)| child.key.map(|key| (key, index)))
        .collect();
    let mut cursor = 0;
    new.iter()
        .map(|spec| {
            let index = match spec.key {
                Some(key) => keyed
                    .get(&key)
                    .copied()
                    .filter(|index| !used[*index] && old[*index].template == spec.template),
                None => {
                    let found = old
                        .iter()
                        .enumerate()
                        .skip(cursor)
                        .find(|(index, child)| {
                            !used[*index] && child.key.is_none() && child.template == spec.template
                        })
                        .map(|(index, _)| index);
                    if let Some(index) = found {
                        cursor = index + 1;
                    }
                    found
                }
            };
            index.map(|index| {
                used[index] = true;
                old[index].id
            })
        })
        .collect()
}

impl<N: NativeApi> SnapshotTree<N> {
    /// Applies one slot value immediately.
    ///
    /// Returns whether the engine was touched. Unmaterialized instances only
    /// store the value; it is bound when their elements are created.
    pub fn apply_update(&mut self, id: InstanceId, index: usize, new: SlotValue) -> Result<bool> {
        let instance = self.arena.try_get_mut(id)?;
        instance.pending.remove(&index);
        let Some(old) = instance.values.get(index) else {
            return Err(SnapshotError::shape(
                instance.template.scoped_id().as_str(),
                format!("expression {index} out of range ({})", instance.values.len()),
            ));
        };
        if *old == new {
            return Ok(false);
        }
        if !instance.is_materialized() {
            instance.values[index] = new;
            return Ok(false);
        }
        let old = std::mem::take(&mut instance.values[index]);
        let result = self.run_updater(id, index, &old, &new, false);
        let instance = self.arena.try_get_mut(id)?;
        instance.values[index] = if result.is_ok() { new } else { old };
        result.map(|()| true)
    }

    /// Invokes the updater of `index` on a materialized instance.
    pub(crate) fn run_updater(
        &mut self,
        id: InstanceId,
        index: usize,
        old: &SlotValue,
        new: &SlotValue,
        first_bind: bool,
    ) -> Result<()> {
        let instance = self.arena.try_get_mut(id)?;
        let template = Arc::clone(&instance.template);
        let updater = template.updater(index).ok_or_else(|| {
            SnapshotError::shape(template.scoped_id().as_str(), format!("no updater for expression {index}"))
        })?;
        if !updater.accepts(new) {
            return Err(SnapshotError::shape(
                template.scoped_id().as_str(),
                format!("updater `{}` cannot take a {} value", updater.name, new.kind_name()),
            ));
        }
        let element = instance
            .elements
            .as_ref()
            .and_then(|elements| elements.get(updater.element_index))
            .copied()
            .ok_or_else(|| {
                SnapshotError::shape(
                    template.scoped_id().as_str(),
                    format!("updater `{}` targets a missing element", updater.name),
                )
            })?;
        let mut worklet_refs = std::mem::take(&mut instance.worklet_refs);
        log::trace!("update {id}[{index}] via `{}`", updater.name);
        let result = updater.apply(&mut SlotUpdate {
            instance: id,
            expr_index: index,
            element_index: updater.element_index,
            element,
            old,
            new,
            first_bind,
            native: &mut self.native,
            worklets: self.worklets.as_mut(),
            effects: &mut self.effects,
            worklet_refs: &mut worklet_refs,
        });
        if let Some(instance) = self.arena.get_mut(id) {
            instance.worklet_refs = worklet_refs;
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/diff_tests.rs"]
mod tests;
