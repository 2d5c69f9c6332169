//! Element operations issued from the background through refs.
//!
//! Before the first patch lands the main thread may not have the elements
//! the ref points at, so such operations wait in a [`UiOpQueue`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use snapshot_core::updaters::ref_selector;
use snapshot_core::{InstanceId, PropValue};

use crate::hydration::HydrationMap;

/// Background handle to the element behind a `ref` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefProxy {
    pub instance: InstanceId,
    pub expr_index: usize,
}

impl RefProxy {
    pub fn new(instance: InstanceId, expr_index: usize) -> Self {
        Self { instance, expr_index }
    }

    /// Attribute selector of the element, keyed by the main-thread id.
    pub fn selector(&self, map: &HydrationMap) -> String {
        format!("[{}]", ref_selector(map.to_main(self.instance), self.expr_index))
    }
}

/// Instance id and expression index named by a `[react-ref-{id}-{index}]`
/// selector.
pub fn parse_ref_selector(selector: &str) -> Option<(InstanceId, usize)> {
    let attribute = selector.strip_prefix('[')?.strip_suffix(']')?;
    let (id, index) = attribute.strip_prefix("react-ref-")?.rsplit_once('-')?;
    Some((InstanceId(id.parse().ok()?), index.parse().ok()?))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum UiOp {
    Invoke {
        target: RefProxy,
        method: String,
        #[serde(default)]
        params: PropValue,
    },
    SetNativeProps {
        target: RefProxy,
        props: PropValue,
    },
}

impl UiOp {
    pub fn target(&self) -> RefProxy {
        match self {
            UiOp::Invoke { target, .. } | UiOp::SetNativeProps { target, .. } => *target,
        }
    }
}

/// Executes resolved element operations.
pub trait UiOpSink {
    fn apply(&mut self, selector: &str, op: &UiOp);
}

/// Sink that keeps `(selector, op)` pairs. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingUiSink {
    applied: Arc<Mutex<Vec<(String, UiOp)>>>,
}

impl RecordingUiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<(String, UiOp)> {
        self.applied
            .lock()
            .map(|applied| applied.clone())
            .unwrap_or_default()
    }
}

impl UiOpSink for RecordingUiSink {
    fn apply(&mut self, selector: &str, op: &UiOp) {
        log::trace!("ui op on {selector}: {op:?}");
        if let Ok(mut applied) = self.applied.lock() {
            applied.push((selector.to_string(), op.clone()));
        }
    }
}

#[derive(Debug, Default)]
pub struct UiOpQueue {
    delayed: Vec<UiOp>,
    ready: bool,
}

impl UiOpQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn len(&self) -> usize {
        self.delayed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delayed.is_empty()
    }

    /// Runs `op` now when the queue is ready, otherwise keeps it.
    pub fn run_or_delay(&mut self, op: UiOp, map: &HydrationMap, sink: &mut dyn UiOpSink) {
        if self.ready {
            sink.apply(&op.target().selector(map), &op);
        } else {
            self.delayed.push(op);
        }
    }

    /// Runs everything delayed, once. Later ops run immediately.
    pub fn run_delayed(&mut self, map: &HydrationMap, sink: &mut dyn UiOpSink) {
        if self.ready {
            return;
        }
        self.ready = true;
        for op in std::mem::take(&mut self.delayed) {
            sink.apply(&op.target().selector(map), &op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn focus(instance: i32) -> UiOp {
        UiOp::Invoke {
            target: RefProxy::new(InstanceId(instance), 0),
            method: "focus".into(),
            params: PropValue::Null,
        }
    }

    #[test]
    fn selector_uses_the_main_thread_id() {
        let map = HydrationMap::from_pairs(&[(InstanceId(-4), InstanceId(6))]);
        assert_eq!(RefProxy::new(InstanceId(6), 2).selector(&map), "[react-ref--4-2]");
        assert_eq!(RefProxy::new(InstanceId(9), 0).selector(&map), "[react-ref-9-0]");
    }

    #[test]
    fn selectors_parse_back_to_their_slot() {
        assert_eq!(parse_ref_selector("[react-ref--4-2]"), Some((InstanceId(-4), 2)));
        assert_eq!(parse_ref_selector("[react-ref-9-0]"), Some((InstanceId(9), 0)));
        assert_eq!(parse_ref_selector("react-ref-9-0"), None);
        assert_eq!(parse_ref_selector("[data-ref-9-0]"), None);
    }

    #[test]
    fn ops_wait_until_the_first_patch() {
        let map = HydrationMap::new();
        let mut queue = UiOpQueue::new();
        let mut sink = RecordingUiSink::new();
        queue.run_or_delay(focus(3), &map, &mut sink);
        queue.run_or_delay(focus(4), &map, &mut sink);
        assert!(sink.applied().is_empty());
        assert_eq!(queue.len(), 2);

        queue.run_delayed(&map, &mut sink);
        let selectors: Vec<String> = sink.applied().into_iter().map(|(s, _)| s).collect();
        assert_eq!(selectors, ["[react-ref-3-0]", "[react-ref-4-0]"]);

        queue.run_delayed(&map, &mut sink);
        assert_eq!(sink.applied().len(), 2);
        queue.run_or_delay(focus(5), &map, &mut sink);
        assert_eq!(sink.applied().len(), 3);
        assert!(queue.is_empty());
    }
}
