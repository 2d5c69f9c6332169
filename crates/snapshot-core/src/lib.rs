#![doc = r"Core runtime pieces for the dual-thread snapshot reconciler."]

extern crate self as snapshot_core;

pub mod collections;
pub mod commit;
pub mod diff;
pub mod error;
pub mod gesture;
pub mod hash;
pub mod instance;
pub mod list;
pub mod mtc;
pub mod native;
pub mod options;
pub mod platform;
pub mod template;
pub mod tree;
pub mod updaters;
pub mod value;
pub mod worklet;

#[cfg(test)]
pub(crate) mod test_support;

pub use commit::CommitReport;
pub use diff::{diff_children, event_token, match_children, ChildOp, ElementSpec};
pub use error::{Result, SnapshotError};
pub use gesture::{BaseGesture, ComposedGesture, CompositionMode, GestureDescriptor, GestureKind};
pub use instance::{InstanceArena, InstanceSnapshot, SnapshotInstance};
pub use list::{InsertAction, ListItemInfo, ListOperations, ListRegistry, UpdateAction, LIST_INFO_ATTRIBUTE};
pub use mtc::{MainThreadComponent, MtcMount, MtcRegistry};
pub use native::{
    ElementHandle, ElementKind, EngineSignal, EngineSignalKind, EventPayload, EventType,
    FlushOptions, MemoryNative, NativeApi, NativeOp,
};
pub use options::RuntimeOptions;
pub use platform::RuntimeScheduler;
pub use template::{SlotPart, SlotUpdater, SnapshotTemplate, TemplateId, TemplateRegistry};
pub use tree::SnapshotTree;
pub use value::{EventBinding, HandlerId, PropValue, RefBinding, SlotValue};
pub use worklet::{
    RecordingWorkletRuntime, WorkletCall, WorkletDescriptor, WorkletRefDescriptor, WorkletRuntime,
    WorkletValue,
};

pub use serde_json;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

pub type Key = u64;

/// Correlation id of a snapshot instance.
///
/// Ids created on the main thread are negative (`-1` is the page root), ids
/// created by the background thread are positive. Ids are never reused within
/// a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(pub i32);

impl InstanceId {
    pub const ROOT: InstanceId = InstanceId(-1);

    #[inline]
    pub fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn is_main_thread(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic id source owned by one execution context.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    next: i32,
    step: i32,
}

impl IdGenerator {
    /// Ids for instances created by main-thread rendering: -2, -3, ...
    pub fn main_thread() -> Self {
        Self { next: -2, step: -1 }
    }

    /// Ids for instances created by the background thread: 1, 2, ...
    pub fn background() -> Self {
        Self { next: 1, step: 1 }
    }

    pub fn next_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next);
        self.next += self.step;
        id
    }
}

/// Hashes a user supplied child key into a [`Key`].
pub fn key_of<K: Hash>(key: &K) -> Key {
    hash::hash_one(key)
}
