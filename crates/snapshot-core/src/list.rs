//! Lists whose items render on demand.
//!
//! A template with a [`SlotPart::List`] part does not attach its children at
//! commit. The commit only tells the list element which positions changed
//! through the `update-list-info` attribute. The engine then asks for the
//! items it is about to show with [`SnapshotTree::component_at_index`] and
//! hands back items scrolled out of view with
//! [`SnapshotTree::enqueue_component`]. The next item of the same type reuses
//! the elements of an enqueued one.
//!
//! Towards the engine an item is known by its sign: the unique id of the
//! item's root element.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::collections::map::HashMap;
use crate::diff::{diff_children, ChildOp};
use crate::error::{Result, SnapshotError};
use crate::instance::SnapshotInstance;
use crate::native::{ElementHandle, FlushOptions, NativeApi};
use crate::template::SlotPart;
use crate::tree::SnapshotTree;
use crate::value::SlotValue;
use crate::InstanceId;

/// Attribute carrying [`ListOperations`] to the list element.
pub const LIST_INFO_ATTRIBUTE: &str = "update-list-info";

/// Per-item attributes the engine lays out and recycles by.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListItemInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_key: Option<String>,
    /// Items only reuse the elements of items with the same template and
    /// reuse identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertAction {
    pub position: usize,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(flatten)]
    pub info: ListItemInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAction {
    pub from: usize,
    pub to: usize,
    #[serde(rename = "type")]
    pub item_type: String,
    pub flush: bool,
    #[serde(flatten)]
    pub info: ListItemInfo,
}

/// Position changes of one list since its previous commit.
///
/// Removals index the old item list. Insertions index the new one and apply
/// after the removals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOperations {
    pub insert_action: Vec<InsertAction>,
    pub remove_action: Vec<usize>,
    pub update_action: Vec<UpdateAction>,
}

impl ListOperations {
    pub fn is_empty(&self) -> bool {
        self.insert_action.is_empty() && self.remove_action.is_empty() && self.update_action.is_empty()
    }
}

#[derive(Debug)]
struct ListState {
    element: ElementHandle,
    /// Shown items by sign.
    signs: HashMap<u32, InstanceId>,
    /// Enqueued items by reuse key, oldest first.
    recycle: IndexMap<String, IndexMap<u32, InstanceId>>,
    /// Roots appended under the list element.
    mounted: IndexSet<ElementHandle>,
    /// Items whose info changed under the same key.
    updated: IndexSet<InstanceId>,
    /// Items whose key changed. The engine sees them removed and reinserted.
    rekeyed: IndexSet<InstanceId>,
}

impl ListState {
    fn new(element: ElementHandle) -> Self {
        Self {
            element,
            signs: HashMap::default(),
            recycle: IndexMap::new(),
            mounted: IndexSet::new(),
            updated: IndexSet::new(),
            rekeyed: IndexSet::new(),
        }
    }

    fn release_sign(&mut self, sign: u32) {
        self.signs.remove(&sign);
        for pool in self.recycle.values_mut() {
            pool.shift_remove(&sign);
        }
    }
}

/// Bookkeeping for every materialized list of a tree.
#[derive(Debug, Default)]
pub struct ListRegistry {
    lists: HashMap<InstanceId, ListState>,
    items: HashMap<InstanceId, ListItemInfo>,
}

impl ListRegistry {
    pub fn contains(&self, list: InstanceId) -> bool {
        self.lists.contains_key(&list)
    }

    pub fn item_info(&self, item: InstanceId) -> Option<&ListItemInfo> {
        self.items.get(&item)
    }

    /// Item shown under `sign` in `list`.
    pub fn item_for_sign(&self, list: InstanceId, sign: u32) -> Option<InstanceId> {
        self.lists.get(&list)?.signs.get(&sign).copied()
    }

    /// Enqueued items of `list` waiting to be reused.
    pub fn recycled(&self, list: InstanceId) -> usize {
        self.lists
            .get(&list)
            .map_or(0, |state| state.recycle.values().map(IndexMap::len).sum())
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.lists
            .values()
            .any(|state| !state.updated.is_empty() || !state.rekeyed.is_empty())
    }

    pub(crate) fn open(&mut self, list: InstanceId, element: ElementHandle) {
        self.lists.entry(list).or_insert_with(|| ListState::new(element));
    }

    /// Drops everything known about a destroyed instance.
    pub(crate) fn forget(&mut self, id: InstanceId) {
        self.lists.remove(&id);
        self.items.remove(&id);
        for state in self.lists.values_mut() {
            state.signs.retain(|_, item| *item != id);
            for pool in state.recycle.values_mut() {
                pool.retain(|_, item| *item != id);
            }
            state.updated.shift_remove(&id);
            state.rekeyed.shift_remove(&id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.lists.clear();
        self.items.clear();
    }

    fn state(&self, list: InstanceId) -> Result<&ListState> {
        self.lists.get(&list).ok_or(SnapshotError::InstanceMissing { id: list })
    }

    fn state_mut(&mut self, list: InstanceId) -> Result<&mut ListState> {
        self.lists.get_mut(&list).ok_or(SnapshotError::InstanceMissing { id: list })
    }
}

pub(crate) fn is_list(instance: &SnapshotInstance) -> bool {
    matches!(instance.template.slots().first(), Some(SlotPart::List(_)))
}

impl<N: NativeApi> SnapshotTree<N> {
    pub fn lists(&self) -> &ListRegistry {
        &self.lists
    }

    /// Sets the layout and reuse attributes of a list item.
    ///
    /// A changed `item_key` reads as the item being removed and reinserted.
    pub fn set_list_item_info(&mut self, item: InstanceId, info: ListItemInfo) -> Result<()> {
        let parent = self.arena.try_get(item)?.parent;
        let previous = self.lists.items.insert(item, info.clone());
        let Some(state) = parent.and_then(|parent| self.lists.lists.get_mut(&parent)) else {
            return Ok(());
        };
        match previous {
            Some(previous) if previous == info => return Ok(()),
            Some(previous) if previous.item_key != info.item_key => {
                state.rekeyed.insert(item);
            }
            _ => {
                state.updated.insert(item);
            }
        }
        self.request_commit();
        Ok(())
    }

    fn item_type(&self, item: InstanceId) -> String {
        self.arena
            .get(item)
            .map(|instance| instance.template.scoped_id().to_string())
            .unwrap_or_default()
    }

    fn reuse_key(&self, item: InstanceId) -> String {
        let reuse = self
            .lists
            .items
            .get(&item)
            .and_then(|info| info.reuse_identifier.as_deref())
            .unwrap_or_default();
        format!("{}|{reuse}", self.item_type(item))
    }

    /// Takes the roots of items leaving `list` off the list element.
    pub(crate) fn detach_list_items(&mut self, list: InstanceId) -> Result<usize> {
        let instance = self.arena.try_get(list)?;
        let leaving: Vec<InstanceId> = instance
            .attached
            .iter()
            .filter(|id| !instance.children.contains(*id))
            .copied()
            .collect();
        let Some(state) = self.lists.lists.get_mut(&list) else {
            return Ok(0);
        };
        let mut removed = 0;
        for id in leaving {
            let Some(root) = self.arena.get(id).and_then(SnapshotInstance::root_element) else {
                continue;
            };
            state.release_sign(root.0);
            if state.mounted.shift_remove(&root) {
                self.native.remove_element(state.element, root);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Tells the list element how its items moved since the last commit.
    /// Returns whether the engine was told anything.
    pub(crate) fn update_list(&mut self, list: InstanceId) -> Result<bool> {
        let instance = self.arena.try_get(list)?;
        let old = instance.attached.clone();
        let new = instance.children.clone();
        let (element, updated, rekeyed) = {
            let state = self.lists.state_mut(list)?;
            (
                state.element,
                std::mem::take(&mut state.updated),
                std::mem::take(&mut state.rekeyed),
            )
        };
        if old == new && updated.is_empty() && rekeyed.is_empty() {
            return Ok(false);
        }

        let mut removed = IndexSet::new();
        let mut inserted = IndexSet::new();
        for op in diff_children(&old, &new) {
            match op {
                ChildOp::Remove { id } => {
                    removed.insert(id);
                }
                ChildOp::Move { id, .. } => {
                    removed.insert(id);
                    inserted.insert(id);
                }
                ChildOp::Insert { id, .. } => {
                    inserted.insert(id);
                }
            }
        }
        for id in rekeyed {
            if old.contains(&id) && new.contains(&id) {
                removed.insert(id);
                inserted.insert(id);
            }
        }

        let mut operations = ListOperations {
            remove_action: old
                .iter()
                .enumerate()
                .filter(|(_, id)| removed.contains(*id))
                .map(|(position, _)| position)
                .collect(),
            ..ListOperations::default()
        };
        for (position, id) in new.iter().enumerate() {
            let info = self.lists.items.get(id).cloned().unwrap_or_default();
            if inserted.contains(id) {
                operations.insert_action.push(InsertAction {
                    position,
                    item_type: self.item_type(*id),
                    info,
                });
            } else if updated.contains(id) {
                operations.update_action.push(UpdateAction {
                    from: position,
                    to: position,
                    item_type: self.item_type(*id),
                    flush: false,
                    info,
                });
            }
        }
        self.arena.try_get_mut(list)?.attached = new;
        if operations.is_empty() {
            return Ok(false);
        }
        log::trace!("list {list}: {operations:?}");
        let value = serde_json::to_value(&operations)
            .map_err(|err| SnapshotError::shape(self.item_type(list), format!("list operations: {err}")))?;
        self.native.set_attribute(element, LIST_INFO_ATTRIBUTE, &value);
        Ok(true)
    }

    /// Renders the item at `index` of `list` and returns its sign.
    ///
    /// A shown item keeps its elements. Otherwise the oldest enqueued item of
    /// the same type gives up its elements, rebound to the new item's values.
    /// New elements are only created when nothing can be reused.
    pub fn component_at_index(&mut self, list: InstanceId, index: usize, operation_id: u64) -> Result<u32> {
        let element = self.lists.state(list)?.element;
        let item = self
            .arena
            .try_get(list)?
            .children
            .get(index)
            .copied()
            .ok_or(SnapshotError::ListItemMissing { list, index })?;
        let reuse_key = self.reuse_key(item);

        let root = match self.arena.try_get(item)?.root_element() {
            Some(root) => {
                if let Some(pool) = self.lists.state_mut(list)?.recycle.get_mut(&reuse_key) {
                    pool.shift_remove(&root.0);
                }
                root
            }
            None => {
                let candidates: Vec<(u32, InstanceId)> = self
                    .lists
                    .state(list)?
                    .recycle
                    .get(&reuse_key)
                    .map(|pool| pool.iter().map(|(sign, id)| (*sign, *id)).collect())
                    .unwrap_or_default();
                let reusable = candidates
                    .into_iter()
                    .find(|(_, old)| *old != item && self.same_shape(*old, item));
                match reusable {
                    Some((sign, old)) => {
                        self.lists.state_mut(list)?.release_sign(sign);
                        self.adopt_elements(old, item)?;
                        log::trace!("list {list}: item {item} reuses the elements of {old}");
                    }
                    None => {
                        self.materialize(item)?;
                    }
                }
                self.item_root(item)?
            }
        };
        let state = self.lists.state_mut(list)?;
        state.signs.insert(root.0, item);
        if state.mounted.insert(root) {
            self.native.append_element(element, root);
        }
        self.effects.refs.apply(self.worklets.as_mut());
        self.native.flush_element_tree(
            root,
            &FlushOptions {
                trigger_layout: true,
                operation_id: Some(operation_id),
                ..FlushOptions::default()
            },
        );
        Ok(root.0)
    }

    /// The engine scrolled the item shown under `sign` out of view, so its
    /// elements may be reused. Unknown signs are ignored.
    pub fn enqueue_component(&mut self, list: InstanceId, sign: u32) -> Result<()> {
        let Some(item) = self.lists.state(list)?.signs.get(&sign).copied() else {
            log::debug!("list {list}: enqueue of unknown sign {sign}");
            return Ok(());
        };
        let reuse_key = self.reuse_key(item);
        self.lists
            .state_mut(list)?
            .recycle
            .entry(reuse_key)
            .or_default()
            .insert(sign, item);
        Ok(())
    }

    fn item_root(&self, id: InstanceId) -> Result<ElementHandle> {
        let instance = self.arena.try_get(id)?;
        instance.root_element().ok_or_else(|| {
            SnapshotError::shape(instance.template.scoped_id().as_str(), "instance has no elements")
        })
    }

    /// Same template and the same rendered children, recursively. Nested
    /// lists never match.
    fn same_shape(&self, from: InstanceId, to: InstanceId) -> bool {
        let (Some(from), Some(to)) = (self.arena.get(from), self.arena.get(to)) else {
            return false;
        };
        from.is_materialized()
            && !is_list(from)
            && from.template.scoped_id() == to.template.scoped_id()
            && from.children == from.attached
            && from.children.len() == to.children.len()
            && from
                .children
                .iter()
                .zip(&to.children)
                .all(|(a, b)| self.same_shape(*a, *b))
    }

    /// Moves the elements of `from` to `to` and rebinds every slot whose value
    /// differs. `from` is left unrendered with its values kept.
    fn adopt_elements(&mut self, from: InstanceId, to: InstanceId) -> Result<()> {
        let source = self.arena.try_get_mut(from)?;
        let elements = source.elements.take();
        let worklet_refs = std::mem::take(&mut source.worklet_refs);
        let bound = source.values.clone();
        for (index, value) in std::mem::take(&mut source.pending) {
            source.values[index] = value;
        }
        source.attached.clear();
        let from_children = source.children.clone();

        let target = self.arena.try_get_mut(to)?;
        for (index, value) in std::mem::take(&mut target.pending) {
            target.values[index] = value;
        }
        target.elements = elements;
        target.worklet_refs = worklet_refs;
        let values = target.values.clone();
        let to_children = target.children.clone();

        for (index, new) in values.iter().enumerate() {
            let old = bound.get(index).unwrap_or(&SlotValue::Empty);
            if old != new {
                self.run_updater(to, index, old, new, false)?;
            }
        }
        for (old_child, new_child) in from_children.iter().zip(&to_children) {
            self.adopt_elements(*old_child, *new_child)?;
        }
        self.arena.try_get_mut(to)?.attached = to_children;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/list_tests.rs"]
mod tests;
