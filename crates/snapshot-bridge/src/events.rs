//! Event routing from main-thread tokens to background handlers.

use std::collections::VecDeque;

use snapshot_core::diff::parse_event_token;
use snapshot_core::{InstanceId, PropValue};

use crate::hydration::HydrationMap;
use crate::tree::BackgroundTree;

/// A published event waiting for the background dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayedEvent {
    pub token: String,
    pub data: PropValue,
}

/// Events published before hydration, replayed once in arrival order.
#[derive(Debug, Default)]
pub struct DelayedEventQueue {
    events: VecDeque<DelayedEvent>,
    flushed: bool,
}

impl DelayedEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the event. Returns `false` once the queue has been flushed;
    /// the caller dispatches directly from then on.
    pub fn delayed_publish_event(&mut self, token: impl Into<String>, data: PropValue) -> bool {
        if self.flushed {
            return false;
        }
        self.events.push_back(DelayedEvent {
            token: token.into(),
            data,
        });
        true
    }

    /// Hands out the buffered events. Later calls return nothing.
    pub fn flush_delayed_events(&mut self) -> Vec<DelayedEvent> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;
        self.events.drain(..).collect()
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Where a token resolved to on the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTarget {
    pub instance: InstanceId,
    pub expr_index: usize,
    pub spread_key: String,
}

/// Parses `token` and maps first-screen ids to background ids.
pub fn resolve_token(token: &str, map: &HydrationMap) -> Option<EventTarget> {
    let Some((id, expr_index, spread_key)) = parse_event_token(token) else {
        log::debug!("malformed event token `{token}`");
        return None;
    };
    let instance = if id.is_main_thread() {
        match map.to_background(id) {
            Ok(id) => id,
            Err(err) => {
                log::debug!("event `{token}` dropped: {err}");
                return None;
            }
        }
    } else {
        id
    };
    Some(EventTarget {
        instance,
        expr_index,
        spread_key: spread_key.to_string(),
    })
}

/// Invokes the handler currently bound under `token`. Returns whether one ran.
pub fn dispatch_event(tree: &BackgroundTree, map: &HydrationMap, token: &str, data: &PropValue) -> bool {
    let Some(target) = resolve_token(token, map) else {
        return false;
    };
    match tree.handler_at(target.instance, target.expr_index, &target.spread_key) {
        Some(handler) => {
            handler(data);
            true
        }
        None => {
            log::debug!("no handler bound for event `{token}`");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::registry;
    use snapshot_core::TemplateId;
    use std::sync::{Arc, Mutex};

    #[test]
    fn queue_replays_in_order_exactly_once() {
        let mut queue = DelayedEventQueue::new();
        assert!(queue.delayed_publish_event("1:0:", PropValue::from(1)));
        assert!(queue.delayed_publish_event("2:0:", PropValue::from(2)));
        assert_eq!(queue.len(), 2);

        let tokens: Vec<String> = queue
            .flush_delayed_events()
            .into_iter()
            .map(|event| event.token)
            .collect();
        assert_eq!(tokens, ["1:0:", "2:0:"]);
        assert!(queue.flush_delayed_events().is_empty());
        assert!(!queue.delayed_publish_event("3:0:", PropValue::Null));
        assert!(queue.is_empty());
    }

    #[test]
    fn first_screen_tokens_go_through_the_map() {
        let map = HydrationMap::from_pairs(&[(InstanceId(-3), InstanceId(7))]);
        let target = resolve_token("-3:1:bindtap", &map).unwrap();
        assert_eq!(
            target,
            EventTarget {
                instance: InstanceId(7),
                expr_index: 1,
                spread_key: "bindtap".into(),
            }
        );
        assert_eq!(resolve_token("5:0:", &map).unwrap().instance, InstanceId(5));
        assert!(resolve_token("-9:0:", &map).is_none());
        assert!(resolve_token("garbage", &map).is_none());
    }

    #[test]
    fn dispatch_reaches_the_current_handler() {
        let mut tree = BackgroundTree::new(registry());
        let item = tree.create_instance(&TemplateId::new("item")).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        tree.on(item, 1, move |data| log.lock().unwrap().push(data.clone()))
            .unwrap();
        let map = HydrationMap::from_pairs(&[(InstanceId(-2), item)]);

        assert!(dispatch_event(&tree, &map, &format!("{item}:1:"), &PropValue::from("a")));
        assert!(dispatch_event(&tree, &map, "-2:1:", &PropValue::from("b")));
        assert!(!dispatch_event(&tree, &map, &format!("{item}:0:"), &PropValue::Null));
        assert_eq!(*seen.lock().unwrap(), vec![PropValue::from("a"), PropValue::from("b")]);
    }
}
