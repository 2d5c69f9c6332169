//! Wire format between the background and main threads.

use std::fmt;

use serde::{Deserialize, Serialize};
use snapshot_core::{InstanceId, PropValue, SlotValue, TemplateId, WorkletDescriptor};

use crate::error::Result;

/// One tree operation recorded by the background tree.
///
/// Ids are background ids; the main thread translates them through its
/// hydration map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SnapshotPatch {
    CreateElement {
        template: TemplateId,
        id: InstanceId,
    },
    InsertBefore {
        parent: InstanceId,
        child: InstanceId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<InstanceId>,
    },
    RemoveChild {
        parent: InstanceId,
        child: InstanceId,
    },
    SetAttribute {
        id: InstanceId,
        index: usize,
        value: SlotValue,
    },
    SetAttributes {
        id: InstanceId,
        values: Vec<SlotValue>,
    },
}

impl fmt::Display for SnapshotPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotPatch::CreateElement { template, id } => write!(f, "create {template} #{id}"),
            SnapshotPatch::InsertBefore {
                parent,
                child,
                before: Some(before),
            } => write!(f, "insert #{child} into #{parent} before #{before}"),
            SnapshotPatch::InsertBefore { parent, child, .. } => write!(f, "append #{child} to #{parent}"),
            SnapshotPatch::RemoveChild { parent, child } => write!(f, "remove #{child} from #{parent}"),
            SnapshotPatch::SetAttribute { id, index, value } => {
                write!(f, "set #{id}[{index}] = {}", value.kind_name())
            }
            SnapshotPatch::SetAttributes { id, values } => write!(f, "set #{id}[..{}]", values.len()),
        }
    }
}

/// Per-patch settings carried across threads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchOptions {
    /// Patches older than the receiver's reload version are dropped.
    pub reload_version: u32,
    #[serde(default)]
    pub is_hydration: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flow_ids: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
}

/// A worklet the background asked the main thread to run after a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOnMainThread {
    pub worklet: WorkletDescriptor,
    #[serde(default)]
    pub params: Vec<PropValue>,
    pub resolve_id: u64,
}

/// Everything one background commit sends to the main thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPayload {
    pub patches: Vec<SnapshotPatch>,
    /// `(main id, background id)` pairs established by hydration.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hydration: Vec<(InstanceId, InstanceId)>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub run_on_main_thread: Vec<RunOnMainThread>,
    pub options: PatchOptions,
}

impl PatchPayload {
    pub fn new(patches: Vec<SnapshotPatch>, options: PatchOptions) -> Self {
        Self {
            patches,
            options,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty() && self.hydration.is_empty() && self.run_on_main_thread.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    /// One line per operation, for debug logs.
    pub fn describe(&self) -> String {
        self.patches
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}
