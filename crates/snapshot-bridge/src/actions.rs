//! Background functions the main thread may call by handle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use snapshot_core::collections::map::HashMap;
use snapshot_core::PropValue;

pub type BgAction = Arc<dyn Fn(&[PropValue]) -> PropValue + Send + Sync>;

/// Serializable reference to a registered background action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BgActionHandle {
    pub id: u64,
    pub reload_version: u32,
}

/// Table of background actions, keyed by an incrementing id.
///
/// A reload bumps the version and forgets every action; handles minted
/// before it are stale.
#[derive(Default)]
pub struct BgActionTable {
    actions: HashMap<u64, BgAction>,
    next_id: u64,
    reload_version: u32,
}

impl BgActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reload_version(&self) -> u32 {
        self.reload_version
    }

    pub fn register_bg_action(&mut self, action: impl Fn(&[PropValue]) -> PropValue + Send + Sync + 'static) -> BgActionHandle {
        self.next_id += 1;
        self.actions.insert(self.next_id, Arc::new(action));
        BgActionHandle {
            id: self.next_id,
            reload_version: self.reload_version,
        }
    }

    /// The action behind `handle`, or `None` when the handle is stale.
    pub fn get(&self, handle: BgActionHandle) -> Option<BgAction> {
        if handle.reload_version < self.reload_version {
            log::debug!(
                "background action {} is from reload {}, now at {}",
                handle.id,
                handle.reload_version,
                self.reload_version
            );
            return None;
        }
        let action = self.actions.get(&handle.id).cloned();
        if action.is_none() {
            log::debug!("background action {} is not registered", handle.id);
        }
        action
    }

    /// Runs the action. Stale handles are a no-op.
    pub fn run_on_background(&self, handle: BgActionHandle, args: &[PropValue]) -> Option<PropValue> {
        self.get(handle).map(|action| action(args))
    }

    pub fn unregister(&mut self, handle: BgActionHandle) {
        self.actions.remove(&handle.id);
    }

    pub fn reload(&mut self) -> u32 {
        self.reload_version += 1;
        self.actions.clear();
        self.reload_version
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for BgActionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BgActionTable")
            .field("actions", &self.actions.len())
            .field("next_id", &self.next_id)
            .field("reload_version", &self.reload_version)
            .finish()
    }
}
