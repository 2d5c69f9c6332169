#![doc = r"Cross-thread coordination for the snapshot runtime: the patch protocol,
the background tree, hydration, event replay and background actions."]

pub mod actions;
pub mod background;
pub mod error;
pub mod events;
pub mod hydration;
pub mod lifecycle;
pub mod main_thread;
pub mod patch;
pub mod tree;
pub mod ui_ops;

#[cfg(test)]
pub(crate) mod test_support;

pub use actions::{BgAction, BgActionHandle, BgActionTable};
pub use background::BackgroundRuntime;
pub use error::{BridgeError, Result};
pub use events::{dispatch_event, resolve_token, DelayedEvent, DelayedEventQueue, EventTarget};
pub use hydration::{hydrate, Hydration, HydrationMap};
pub use lifecycle::LifecycleEvent;
pub use main_thread::{ApplyReport, MainThreadRuntime, MainThreadTask};
pub use patch::{PatchOptions, PatchPayload, RunOnMainThread, SnapshotPatch};
pub use tree::{BackgroundInstance, BackgroundTree, EventHandler};
pub use ui_ops::{parse_ref_selector, RecordingUiSink, RefProxy, UiOp, UiOpQueue, UiOpSink};
