//! Dynamic expression values stored in an instance's `values` array.
//!
//! Every slot holds one [`SlotValue`]. The variant decides which updater
//! behaviour applies; updaters match on it explicitly instead of probing the
//! value's shape at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gesture::GestureDescriptor;
use crate::worklet::WorkletValue;
use crate::InstanceId;

/// Plain attribute payload.
pub type PropValue = serde_json::Value;

/// Identity of a callback living on the background thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandlerId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum EventBinding {
    /// A canonical token, used verbatim as the native handler name.
    Token(String),
    /// A background callback; bound under the instance's canonical token.
    Handler(HandlerId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum RefBinding {
    /// User supplied selector attribute.
    Selector(String),
    /// A background ref object; exposed as `react-ref-{id}-{index}`.
    Handle(HandlerId),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum SlotValue {
    #[default]
    Empty,
    Prop(PropValue),
    Event(EventBinding),
    Worklet(WorkletValue),
    Gesture(GestureDescriptor),
    Ref(RefBinding),
    Spread(BTreeMap<String, SlotValue>),
    Child(InstanceId),
}

impl SlotValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, SlotValue::Empty)
    }

    /// JavaScript-style falsiness: absent, null, false, zero, NaN or "".
    pub fn is_falsy(&self) -> bool {
        match self {
            SlotValue::Empty => true,
            SlotValue::Prop(value) => match value {
                PropValue::Null => true,
                PropValue::Bool(flag) => !flag,
                PropValue::Number(number) => number.as_f64().map_or(true, |n| n == 0.0 || n.is_nan()),
                PropValue::String(text) => text.is_empty(),
                PropValue::Array(_) | PropValue::Object(_) => false,
            },
            SlotValue::Event(EventBinding::Token(token)) => token.is_empty(),
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SlotValue::Empty => "empty",
            SlotValue::Prop(_) => "prop",
            SlotValue::Event(_) => "event",
            SlotValue::Worklet(_) => "worklet",
            SlotValue::Gesture(_) => "gesture",
            SlotValue::Ref(_) => "ref",
            SlotValue::Spread(_) => "spread",
            SlotValue::Child(_) => "child",
        }
    }

    pub fn as_prop(&self) -> Option<&PropValue> {
        match self {
            SlotValue::Prop(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_prop().and_then(PropValue::as_str)
    }

    /// Attribute payload for plain updaters; `Empty` maps to `null`, which
    /// the engine treats as "remove attribute".
    pub fn to_prop(&self) -> Option<PropValue> {
        match self {
            SlotValue::Empty => Some(PropValue::Null),
            SlotValue::Prop(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn event(handler: HandlerId) -> Self {
        SlotValue::Event(EventBinding::Handler(handler))
    }

    pub fn token(token: impl Into<String>) -> Self {
        SlotValue::Event(EventBinding::Token(token.into()))
    }
}

impl From<PropValue> for SlotValue {
    fn from(value: PropValue) -> Self {
        SlotValue::Prop(value)
    }
}

impl From<&str> for SlotValue {
    fn from(value: &str) -> Self {
        SlotValue::Prop(PropValue::from(value))
    }
}

impl From<String> for SlotValue {
    fn from(value: String) -> Self {
        SlotValue::Prop(PropValue::from(value))
    }
}

impl From<bool> for SlotValue {
    fn from(value: bool) -> Self {
        SlotValue::Prop(PropValue::from(value))
    }
}

impl From<i64> for SlotValue {
    fn from(value: i64) -> Self {
        SlotValue::Prop(PropValue::from(value))
    }
}

impl From<f64> for SlotValue {
    fn from(value: f64) -> Self {
        SlotValue::Prop(PropValue::from(value))
    }
}

impl From<EventBinding> for SlotValue {
    fn from(value: EventBinding) -> Self {
        SlotValue::Event(value)
    }
}

impl From<WorkletValue> for SlotValue {
    fn from(value: WorkletValue) -> Self {
        SlotValue::Worklet(value)
    }
}

impl From<GestureDescriptor> for SlotValue {
    fn from(value: GestureDescriptor) -> Self {
        SlotValue::Gesture(value)
    }
}

impl From<RefBinding> for SlotValue {
    fn from(value: RefBinding) -> Self {
        SlotValue::Ref(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn falsiness_follows_script_semantics() {
        assert!(SlotValue::Empty.is_falsy());
        assert!(SlotValue::from(json!(null)).is_falsy());
        assert!(SlotValue::from(false).is_falsy());
        assert!(SlotValue::from(0i64).is_falsy());
        assert!(SlotValue::from("").is_falsy());
        assert!(!SlotValue::from("x").is_falsy());
        assert!(!SlotValue::from(json!({})).is_falsy());
        assert!(!SlotValue::event(HandlerId(3)).is_falsy());
    }

    #[test]
    fn slot_values_cross_the_wire_unchanged() {
        let mut spread = BTreeMap::new();
        spread.insert("bindtap".to_string(), SlotValue::token("1:0:bindtap"));
        spread.insert("class".to_string(), SlotValue::from("a b"));
        let value = SlotValue::Spread(spread);
        let encoded = serde_json::to_string(&value).expect("encode");
        let decoded: SlotValue = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded, value);
    }
}
