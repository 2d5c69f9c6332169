//! Pairing the main thread's first screen with the background tree.

use snapshot_core::collections::map::HashMap;
use snapshot_core::diff::parse_event_token;
use snapshot_core::{EventBinding, InstanceId, InstanceSnapshot, RefBinding, Result, SlotValue, SnapshotError};

use crate::patch::SnapshotPatch;
use crate::tree::BackgroundTree;

/// Main-thread id to background id, with the reverse index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrationMap {
    to_background: HashMap<InstanceId, InstanceId>,
    to_main: HashMap<InstanceId, InstanceId>,
}

impl HydrationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: &[(InstanceId, InstanceId)]) -> Self {
        let mut map = Self::new();
        for (main, background) in pairs {
            map.insert(*main, *background);
        }
        map
    }

    pub fn insert(&mut self, main: InstanceId, background: InstanceId) {
        if let Some(previous) = self.to_background.insert(main, background) {
            self.to_main.remove(&previous);
        }
        self.to_main.insert(background, main);
    }

    pub fn to_background(&self, main: InstanceId) -> Result<InstanceId> {
        self.to_background
            .get(&main)
            .copied()
            .ok_or(SnapshotError::HydrationMappingMissing { id: main })
    }

    /// Instances created by patches were never hydrated and keep their id.
    pub fn to_main(&self, background: InstanceId) -> InstanceId {
        self.to_main.get(&background).copied().unwrap_or(background)
    }

    /// Forgets a destroyed instance, given either of its ids.
    pub fn remove(&mut self, id: InstanceId) {
        if let Some(background) = self.to_background.remove(&id) {
            self.to_main.remove(&background);
        }
        if let Some(main) = self.to_main.remove(&id) {
            self.to_background.remove(&main);
        }
    }

    pub fn reset(&mut self) {
        self.to_background.clear();
        self.to_main.clear();
    }

    pub fn len(&self) -> usize {
        self.to_background.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_background.is_empty()
    }

    /// `(main, background)` pairs ordered by main id, root first.
    pub fn pairs(&self) -> Vec<(InstanceId, InstanceId)> {
        let mut pairs: Vec<_> = self.to_background.iter().map(|(m, b)| (*m, *b)).collect();
        pairs.sort_by(|a, b| b.0.cmp(&a.0));
        pairs
    }
}

/// Result of one hydration pass.
#[derive(Debug, Default)]
pub struct Hydration {
    pub map: HydrationMap,
    /// Operations that turn the first screen into the background tree.
    pub patches: Vec<SnapshotPatch>,
}

/// Matches `first_screen` against `tree`, same template by position.
///
/// Differing values become `SetAttribute`s, unmatched main children are
/// removed and unmatched background children are created in place.
pub fn hydrate(first_screen: &InstanceSnapshot, tree: &BackgroundTree) -> Result<Hydration> {
    let root = tree.root();
    let root_template = &tree
        .instance(root)
        .ok_or(SnapshotError::InstanceMissing { id: root })?
        .template;
    if *root_template != first_screen.template {
        return Err(SnapshotError::TemplateShapeMismatch {
            template: first_screen.template.to_string(),
            detail: format!("first screen root does not match `{root_template}`"),
        });
    }
    let mut hydration = Hydration::default();
    hydrate_node(first_screen, root, tree, &mut hydration)?;
    Ok(hydration)
}

fn hydrate_node(
    before: &InstanceSnapshot,
    after: InstanceId,
    tree: &BackgroundTree,
    hydration: &mut Hydration,
) -> Result<()> {
    hydration.map.insert(before.id, after);
    let instance = tree
        .instance(after)
        .ok_or(SnapshotError::InstanceMissing { id: after })?;

    for index in 0..instance.values.len() {
        let value = tree.wire_value(after, index);
        let old = before.values.get(index).unwrap_or(&SlotValue::Empty);
        if !equivalent(old, &value, before.id, after) {
            hydration.patches.push(SnapshotPatch::SetAttribute {
                id: after,
                index,
                value,
            });
        }
    }

    let children = &instance.children;
    let matched: Vec<bool> = children
        .iter()
        .enumerate()
        .map(|(position, child)| {
            let template = tree.instance(*child).map(|c| &c.template);
            before
                .children
                .get(position)
                .is_some_and(|old| Some(&old.template) == template)
        })
        .collect();

    for (position, old) in before.children.iter().enumerate() {
        if !matched.get(position).copied().unwrap_or(false) {
            hydration.patches.push(SnapshotPatch::RemoveChild {
                parent: after,
                child: old.id,
            });
        }
    }
    for (position, child) in children.iter().enumerate() {
        if matched[position] {
            hydrate_node(&before.children[position], *child, tree, hydration)?;
            continue;
        }
        create_subtree(*child, tree, &mut hydration.patches)?;
        let next_matched = (position + 1..children.len())
            .find(|p| matched[*p])
            .map(|p| children[p]);
        hydration.patches.push(SnapshotPatch::InsertBefore {
            parent: after,
            child: *child,
            before: next_matched,
        });
    }
    Ok(())
}

/// Operations that build the background subtree at `id` from scratch.
pub fn create_subtree(id: InstanceId, tree: &BackgroundTree, patches: &mut Vec<SnapshotPatch>) -> Result<()> {
    let instance = tree.instance(id).ok_or(SnapshotError::InstanceMissing { id })?;
    patches.push(SnapshotPatch::CreateElement {
        template: instance.template.clone(),
        id,
    });
    if instance.values.iter().any(|v| !v.is_empty()) {
        patches.push(SnapshotPatch::SetAttributes {
            id,
            values: tree.wire_values(id),
        });
    }
    for child in &instance.children {
        create_subtree(*child, tree, patches)?;
        patches.push(SnapshotPatch::InsertBefore {
            parent: id,
            child: *child,
            before: None,
        });
    }
    Ok(())
}

/// Equal up to the instance id baked into tokens and ref handles.
fn equivalent(main: &SlotValue, background: &SlotValue, main_id: InstanceId, background_id: InstanceId) -> bool {
    match (main, background) {
        (SlotValue::Event(EventBinding::Token(a)), SlotValue::Event(EventBinding::Token(b))) => {
            match (parse_event_token(a), parse_event_token(b)) {
                (Some((ai, aidx, akey)), Some((bi, bidx, bkey))) => {
                    ai == main_id && bi == background_id && aidx == bidx && akey == bkey
                }
                _ => a == b,
            }
        }
        (SlotValue::Ref(RefBinding::Handle(_)), SlotValue::Ref(RefBinding::Handle(_))) => true,
        (SlotValue::Spread(a), SlotValue::Spread(b)) => {
            a.len() == b.len()
                && a.iter().all(|(key, value)| {
                    b.get(key)
                        .is_some_and(|other| equivalent(value, other, main_id, background_id))
                })
        }
        _ => main == background,
    }
}

#[cfg(test)]
#[path = "tests/hydration_tests.rs"]
mod tests;
