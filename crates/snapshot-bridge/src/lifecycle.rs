//! Messages the main thread sends to the background thread.

use serde::{Deserialize, Serialize};
use snapshot_core::{InstanceSnapshot, PropValue};

use crate::actions::BgActionHandle;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum LifecycleEvent {
    /// The main thread rendered its first screen; hydrate against it.
    FirstScreen { root: InstanceSnapshot },
    /// A native event fired on an element bound under `token`.
    PublishEvent {
        token: String,
        #[serde(default)]
        data: PropValue,
    },
    RunOnBackground {
        handle: BgActionHandle,
        #[serde(default)]
        args: Vec<PropValue>,
    },
    /// The page is reloading; everything older than `version` is stale.
    Reload { version: u32 },
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::FirstScreen { .. } => "firstScreen",
            LifecycleEvent::PublishEvent { .. } => "publishEvent",
            LifecycleEvent::RunOnBackground { .. } => "runOnBackground",
            LifecycleEvent::Reload { .. } => "reload",
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }
}
