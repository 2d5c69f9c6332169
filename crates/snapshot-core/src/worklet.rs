//! Worklet descriptors and the boundary to the main-thread worklet runtime.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::native::ElementHandle;
use crate::value::PropValue;

/// A function compiled to run on the main thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkletDescriptor {
    pub id: String,
    #[serde(default)]
    pub captured: PropValue,
    /// Assigned by the background right before the descriptor is shipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_id: Option<u64>,
}

impl WorkletDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            captured: PropValue::Null,
            exec_id: None,
        }
    }

    pub fn with_captured(mut self, captured: PropValue) -> Self {
        self.captured = captured;
        self
    }
}

/// A main-thread value box shared with worklets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkletRefDescriptor {
    pub wvid: i64,
    #[serde(default)]
    pub initial: PropValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkletValue {
    Function(WorkletDescriptor),
    Ref(WorkletRefDescriptor),
}

impl WorkletValue {
    pub fn as_function(&self) -> Option<&WorkletDescriptor> {
        match self {
            WorkletValue::Function(desc) => Some(desc),
            WorkletValue::Ref(_) => None,
        }
    }

    pub fn as_ref_descriptor(&self) -> Option<&WorkletRefDescriptor> {
        match self {
            WorkletValue::Ref(desc) => Some(desc),
            WorkletValue::Function(_) => None,
        }
    }
}

pub trait WorkletRuntime {
    /// Bind, rebind or unbind a worklet context attached to `element`.
    fn on_worklet_ctx_update(
        &mut self,
        new: Option<&WorkletDescriptor>,
        old: Option<&WorkletDescriptor>,
        first_bind: bool,
        element: ElementHandle,
    );

    /// Point a worklet ref at `element`, or clear it with `None`.
    fn update_worklet_ref(&mut self, wref: &WorkletRefDescriptor, element: Option<ElementHandle>);

    /// Drop the main-thread side of a ref whose owner was destroyed.
    fn release(&mut self, wref: &WorkletRefDescriptor);
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkletCall {
    CtxUpdate {
        new: Option<String>,
        old: Option<String>,
        first_bind: bool,
        element: ElementHandle,
    },
    RefUpdate {
        wvid: i64,
        element: Option<ElementHandle>,
    },
    Release {
        wvid: i64,
    },
}

/// Worklet runtime that only records what it was asked to do.
///
/// Clones share one call log, so a test can keep a handle while the tree owns
/// the boxed runtime.
#[derive(Debug, Clone, Default)]
pub struct RecordingWorkletRuntime {
    calls: Arc<Mutex<Vec<WorkletCall>>>,
}

impl RecordingWorkletRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WorkletCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn take_calls(&self) -> Vec<WorkletCall> {
        self.calls
            .lock()
            .map(|mut calls| std::mem::take(&mut *calls))
            .unwrap_or_default()
    }

    fn record(&self, call: WorkletCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

impl WorkletRuntime for RecordingWorkletRuntime {
    fn on_worklet_ctx_update(
        &mut self,
        new: Option<&WorkletDescriptor>,
        old: Option<&WorkletDescriptor>,
        first_bind: bool,
        element: ElementHandle,
    ) {
        self.record(WorkletCall::CtxUpdate {
            new: new.map(|w| w.id.clone()),
            old: old.map(|w| w.id.clone()),
            first_bind,
            element,
        });
    }

    fn update_worklet_ref(&mut self, wref: &WorkletRefDescriptor, element: Option<ElementHandle>) {
        self.record(WorkletCall::RefUpdate {
            wvid: wref.wvid,
            element,
        });
    }

    fn release(&mut self, wref: &WorkletRefDescriptor) {
        self.record(WorkletCall::Release { wvid: wref.wvid });
    }
}

#[derive(Debug, Clone, PartialEq)]
enum RefTask {
    Bind {
        wref: WorkletRefDescriptor,
        element: ElementHandle,
    },
    Unbind {
        wref: WorkletRefDescriptor,
    },
}

/// Worklet ref updates collected during a commit and applied after the patch,
/// once every element they point at exists.
#[derive(Debug, Default)]
pub struct RefQueue {
    tasks: Vec<RefTask>,
}

impl RefQueue {
    pub fn bind(&mut self, wref: WorkletRefDescriptor, element: ElementHandle) {
        self.tasks.push(RefTask::Bind { wref, element });
    }

    pub fn unbind(&mut self, wref: WorkletRefDescriptor) {
        self.tasks.push(RefTask::Unbind { wref });
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn apply(&mut self, runtime: &mut dyn WorkletRuntime) {
        for task in self.tasks.drain(..) {
            match task {
                RefTask::Bind { wref, element } => runtime.update_worklet_ref(&wref, Some(element)),
                RefTask::Unbind { wref } => runtime.update_worklet_ref(&wref, None),
            }
        }
    }
}
