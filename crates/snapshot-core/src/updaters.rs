//! Built-in slot updaters.
//!
//! Each constructor returns a [`SlotUpdater`] bound to one element index.
//! Updaters only run for values that changed; they translate the old/new
//! pair into the smallest set of native calls.

use std::collections::{BTreeMap, BTreeSet};

use crate::diff::event_token;
use crate::error::Result;
use crate::gesture::{diff_gestures, GestureOp};
use crate::native::{ElementHandle, EventPayload, EventType, NativeApi};
use crate::template::SlotUpdater;
use crate::value::{EventBinding, PropValue, RefBinding, SlotValue};
use crate::worklet::{
    RefQueue, WorkletDescriptor, WorkletRefDescriptor, WorkletRuntime, WorkletValue,
};
use crate::InstanceId;

const EMPTY: &SlotValue = &SlotValue::Empty;

/// Side effects collected while updaters run; consumed at the end of a commit.
#[derive(Debug, Default)]
pub struct UpdateEffects {
    pub exposure_changed: Vec<ElementHandle>,
    pub refs: RefQueue,
}

impl UpdateEffects {
    pub(crate) fn mark_exposure(&mut self, element: ElementHandle) {
        if !self.exposure_changed.contains(&element) {
            self.exposure_changed.push(element);
        }
    }
}

/// Everything an updater may touch for one slot.
pub struct SlotUpdate<'a> {
    pub instance: InstanceId,
    pub expr_index: usize,
    pub element_index: usize,
    pub element: ElementHandle,
    pub old: &'a SlotValue,
    pub new: &'a SlotValue,
    /// True when the instance is being materialized.
    pub first_bind: bool,
    pub native: &'a mut dyn NativeApi,
    pub worklets: &'a mut dyn WorkletRuntime,
    pub effects: &'a mut UpdateEffects,
    /// Worklet refs currently bound by this instance, released on destroy.
    pub worklet_refs: &'a mut Vec<WorkletRefDescriptor>,
}

impl SlotUpdate<'_> {
    /// Canonical handler name for the event bound at this slot.
    pub fn token(&self, spread_key: &str) -> String {
        event_token(self.instance, self.expr_index, spread_key)
    }
}

fn props(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Prop(_))
}

fn events(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Prop(_) | SlotValue::Event(_))
}

fn worklets(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Worklet(_)) || value.is_falsy()
}

fn gestures(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Gesture(_)) || value.is_falsy()
}

fn refs(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Ref(_)) || value.is_falsy()
}

fn spreads(value: &SlotValue) -> bool {
    matches!(value, SlotValue::Empty | SlotValue::Spread(_)) || value.is_falsy()
}

/// Plain attribute; `exposure-*` attributes mark the element for exposure.
pub fn attribute(element_index: usize, name: impl Into<String>) -> SlotUpdater {
    let name = name.into();
    SlotUpdater::new(element_index, name.clone(), props, move |update| {
        let (old, new) = (update.old, update.new);
        set_attribute(update, &name, old, new);
        Ok(())
    })
}

/// Text of a raw-text element.
pub fn text(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "text", props, |update| {
        let value = update.new.to_prop().unwrap_or(PropValue::Null);
        update.native.set_attribute(update.element, "text", &value);
        Ok(())
    })
}

pub fn class(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "class", props, |update| {
        let (old, new) = (update.old, update.new);
        set_class(update, old, new);
        Ok(())
    })
}

pub fn style(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "style", props, |update| {
        let (old, new) = (update.old, update.new);
        set_attribute(update, "style", old, new);
        Ok(())
    })
}

pub fn id(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "id", props, |update| {
        let (old, new) = (update.old, update.new);
        set_attribute(update, "id", old, new);
        Ok(())
    })
}

/// `data-{key}` attribute.
pub fn dataset(element_index: usize, key: &str) -> SlotUpdater {
    attribute(element_index, format!("data-{key}"))
}

/// Background event handler, bound by token.
pub fn event(element_index: usize, event_type: EventType, name: impl Into<String>) -> SlotUpdater {
    let name = name.into();
    SlotUpdater::new(element_index, format!("event:{name}"), events, move |update| {
        let (old, new) = (update.old, update.new);
        set_event(update, event_type, &name, old, new, "");
        Ok(())
    })
}

/// Main-thread event handler.
pub fn worklet_event(element_index: usize, event_type: EventType, name: impl Into<String>) -> SlotUpdater {
    let name = name.into();
    SlotUpdater::new(element_index, format!("worklet-event:{name}"), worklets, move |update| {
        let (old, new) = (update.old, update.new);
        set_worklet_event(update, event_type, &name, old, new);
        Ok(())
    })
}

/// `main-thread:ref` binding.
pub fn worklet_ref(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "main-thread:ref", worklets, |update| {
        let (old, new) = (update.old, update.new);
        set_worklet_ref(update, old, new);
        Ok(())
    })
}

/// Background `ref`, exposed to selector queries.
pub fn reference(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "ref", refs, |update| {
        let (old, new) = (update.old, update.new);
        set_ref(update, old, new);
        Ok(())
    })
}

pub fn gesture(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "main-thread:gesture", gestures, |update| {
        let (old, new) = (update.old, update.new);
        set_gesture(update, old, new);
        Ok(())
    })
}

/// `{...props}` on an element; keys are diffed one by one.
pub fn spread(element_index: usize) -> SlotUpdater {
    SlotUpdater::new(element_index, "spread", spreads, |update| {
        let empty = BTreeMap::new();
        let old = match update.old {
            SlotValue::Spread(map) => map,
            _ => &empty,
        };
        let new = match update.new {
            SlotValue::Spread(map) => map,
            _ => &empty,
        };
        let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
        for key in keys {
            let before = old.get(key).unwrap_or(EMPTY);
            let after = new.get(key).unwrap_or(EMPTY);
            if before == after {
                continue;
            }
            apply_spread_key(update, key, before, after)?;
        }
        Ok(())
    })
}

fn apply_spread_key(update: &mut SlotUpdate<'_>, key: &str, old: &SlotValue, new: &SlotValue) -> Result<()> {
    if let Some(worklet_key) = key.strip_prefix("main-thread:") {
        match worklet_key {
            "ref" => set_worklet_ref(update, old, new),
            "gesture" => set_gesture(update, old, new),
            other => {
                if let Some((event_type, name)) = EventType::parse_prop_key(other) {
                    set_worklet_event(update, event_type, name, old, new);
                } else {
                    log::debug!("spread: ignoring unknown main-thread key `{key}`");
                }
            }
        }
        return Ok(());
    }
    match key {
        "class" | "className" => set_class(update, old, new),
        "ref" => set_ref(update, old, new),
        "__lynx_timing_flag" => {}
        _ => {
            if let Some((event_type, name)) = EventType::parse_prop_key(key) {
                set_event(update, event_type, name, old, new, key);
            } else {
                set_attribute(update, key, old, new);
            }
        }
    }
    Ok(())
}

fn set_attribute(update: &mut SlotUpdate<'_>, name: &str, _old: &SlotValue, new: &SlotValue) {
    let value = new.to_prop().unwrap_or(PropValue::Null);
    update.native.set_attribute(update.element, name, &value);
    if name.starts_with("exposure-") {
        update.effects.mark_exposure(update.element);
    }
}

fn set_class(update: &mut SlotUpdate<'_>, _old: &SlotValue, new: &SlotValue) {
    let value = if new.is_falsy() {
        PropValue::from("")
    } else {
        new.to_prop().unwrap_or_else(|| PropValue::from(""))
    };
    update.native.set_attribute(update.element, "class", &value);
}

fn resolve_token(update: &SlotUpdate<'_>, value: &SlotValue, spread_key: &str) -> Option<String> {
    if value.is_falsy() {
        return None;
    }
    match value {
        SlotValue::Event(EventBinding::Token(token)) => Some(token.clone()),
        SlotValue::Prop(PropValue::String(token)) => Some(token.clone()),
        _ => Some(update.token(spread_key)),
    }
}

fn set_event(
    update: &mut SlotUpdate<'_>,
    event_type: EventType,
    name: &str,
    old: &SlotValue,
    new: &SlotValue,
    spread_key: &str,
) {
    let before = resolve_token(update, old, spread_key);
    let after = resolve_token(update, new, spread_key);
    if before == after {
        return;
    }
    match after {
        Some(token) => {
            update
                .native
                .add_event(update.element, event_type, name, &EventPayload::Token(token));
        }
        None => update.native.remove_event(update.element, event_type, name),
    }
}

fn set_worklet_event(
    update: &mut SlotUpdate<'_>,
    event_type: EventType,
    name: &str,
    old: &SlotValue,
    new: &SlotValue,
) {
    let before = worklet_function(old);
    let after = worklet_function(new);
    match after {
        Some(worklet) => update.native.add_event(
            update.element,
            event_type,
            name,
            &EventPayload::Worklet(worklet.clone()),
        ),
        None => {
            if before.is_some() {
                update.native.remove_event(update.element, event_type, name);
            }
        }
    }
    update
        .worklets
        .on_worklet_ctx_update(after, before, update.first_bind, update.element);
}

fn worklet_function(value: &SlotValue) -> Option<&WorkletDescriptor> {
    match value {
        SlotValue::Worklet(WorkletValue::Function(desc)) => Some(desc),
        _ => None,
    }
}

fn set_worklet_ref(update: &mut SlotUpdate<'_>, old: &SlotValue, new: &SlotValue) {
    if let SlotValue::Worklet(WorkletValue::Ref(old_ref)) = old {
        update.worklet_refs.retain(|r| r.wvid != old_ref.wvid);
        update.effects.refs.unbind(old_ref.clone());
    }
    // Ref callbacks run on the main thread once the element is attached.
    let before = worklet_function(old);
    let after = worklet_function(new);
    if before.is_some() || after.is_some() {
        update
            .worklets
            .on_worklet_ctx_update(after, before, update.first_bind, update.element);
    }
    if let SlotValue::Worklet(WorkletValue::Ref(new_ref)) = new {
        update.worklet_refs.push(new_ref.clone());
        update.effects.refs.bind(new_ref.clone(), update.element);
    }
    let bound = matches!(new, SlotValue::Worklet(_));
    let was_bound = matches!(old, SlotValue::Worklet(_));
    if bound && !was_bound {
        update
            .native
            .set_attribute(update.element, "has-react-ref", &PropValue::Bool(true));
    } else if !bound && was_bound {
        update
            .native
            .set_attribute(update.element, "has-react-ref", &PropValue::Null);
    }
}

/// Selector attribute that the background ref proxy queries with.
pub fn ref_selector(instance: InstanceId, expr_index: usize) -> String {
    format!("react-ref-{instance}-{expr_index}")
}

fn ref_attribute(update: &SlotUpdate<'_>, value: &SlotValue) -> Option<String> {
    match value {
        SlotValue::Ref(RefBinding::Selector(selector)) => Some(selector.clone()),
        SlotValue::Ref(RefBinding::Handle(_)) => Some(ref_selector(update.instance, update.expr_index)),
        _ => None,
    }
}

fn set_ref(update: &mut SlotUpdate<'_>, old: &SlotValue, new: &SlotValue) {
    let before = ref_attribute(update, old);
    let after = ref_attribute(update, new);
    if before == after {
        return;
    }
    if let Some(name) = before {
        update.native.set_attribute(update.element, &name, &PropValue::Null);
    }
    if let Some(name) = after {
        update.native.set_attribute(update.element, &name, &PropValue::from(1));
    }
}

fn set_gesture(update: &mut SlotUpdate<'_>, old: &SlotValue, new: &SlotValue) {
    let before = match old {
        SlotValue::Gesture(gesture) => Some(gesture),
        _ => None,
    };
    let after = match new {
        SlotValue::Gesture(gesture) => Some(gesture),
        _ => None,
    };
    if before.is_none() && after.is_some() {
        update
            .native
            .set_attribute(update.element, "has-react-gesture", &PropValue::Bool(true));
    }
    for op in diff_gestures(before, after) {
        match op {
            GestureOp::Remove(id) => update.native.remove_gesture_detector(update.element, id),
            GestureOp::Set(gesture) => update.native.set_gesture_detector(update.element, &gesture),
        }
    }
    if before.is_some() && after.is_none() {
        update
            .native
            .set_attribute(update.element, "has-react-gesture", &PropValue::Null);
    }
}
