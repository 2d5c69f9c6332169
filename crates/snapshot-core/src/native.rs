//! The native element boundary and an in-memory engine that records calls.

use std::fmt;
use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::gesture::BaseGesture;
use crate::hash::css_scope_id;
use crate::value::PropValue;
use crate::worklet::WorkletDescriptor;

/// Opaque handle to an element owned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementHandle(pub u32);

impl fmt::Display for ElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementKind {
    Page,
    View,
    Text,
    RawText,
    Image,
    Frame,
    List,
    Wrapper,
    Custom(String),
}

impl ElementKind {
    /// Maps a tag name to a kind; unknown tags become custom elements.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "page" => ElementKind::Page,
            "view" => ElementKind::View,
            "text" => ElementKind::Text,
            "raw-text" | "raw_text" => ElementKind::RawText,
            "image" => ElementKind::Image,
            "frame" => ElementKind::Frame,
            "list" => ElementKind::List,
            "wrapper" => ElementKind::Wrapper,
            other => ElementKind::Custom(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            ElementKind::Page => "page",
            ElementKind::View => "view",
            ElementKind::Text => "text",
            ElementKind::RawText => "raw-text",
            ElementKind::Image => "image",
            ElementKind::Frame => "frame",
            ElementKind::List => "list",
            ElementKind::Wrapper => "wrapper",
            ElementKind::Custom(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Bind,
    Catch,
    CaptureBind,
    CaptureCatch,
    GlobalBind,
}

impl EventType {
    /// Splits a prop key such as `bindtap` or `capture-catch:scroll` into
    /// its event type and event name.
    pub fn parse_prop_key(key: &str) -> Option<(EventType, &str)> {
        const PREFIXES: [(&str, EventType); 5] = [
            ("global-bind", EventType::GlobalBind),
            ("capture-bind", EventType::CaptureBind),
            ("capture-catch", EventType::CaptureCatch),
            ("bind", EventType::Bind),
            ("catch", EventType::Catch),
        ];
        PREFIXES.iter().find_map(|(prefix, ty)| {
            let rest = key.strip_prefix(prefix)?;
            let name = rest.strip_prefix(':').unwrap_or(rest);
            (!name.is_empty()).then_some((*ty, name))
        })
    }
}

/// What the engine invokes when an event fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum EventPayload {
    /// Routed back to the background dispatcher under this token.
    Token(String),
    /// Run directly on the main thread.
    Worklet(WorkletDescriptor),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushOptions {
    pub trigger_layout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
    #[serde(default)]
    pub exposure_changed: Vec<ElementHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineSignalKind {
    DestroyLifetime,
    Exposure,
    Layout,
}

/// Notifications delivered by the engine to the main thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineSignal {
    DestroyLifetime,
    Exposure { elements: Vec<ElementHandle> },
    Layout { operation_id: Option<u64> },
}

impl EngineSignal {
    pub fn kind(&self) -> EngineSignalKind {
        match self {
            EngineSignal::DestroyLifetime => EngineSignalKind::DestroyLifetime,
            EngineSignal::Exposure { .. } => EngineSignalKind::Exposure,
            EngineSignal::Layout { .. } => EngineSignalKind::Layout,
        }
    }
}

/// Element-level API of the rendering engine.
pub trait NativeApi {
    fn create_page(&mut self) -> ElementHandle;

    fn create_element(&mut self, kind: &ElementKind) -> ElementHandle;

    fn append_element(&mut self, parent: ElementHandle, child: ElementHandle);

    fn remove_element(&mut self, parent: ElementHandle, child: ElementHandle);

    /// Inserts `child` before `reference`, or appends when `reference` is `None`.
    /// An attached child moves.
    fn insert_element_before(
        &mut self,
        parent: ElementHandle,
        child: ElementHandle,
        reference: Option<ElementHandle>,
    );

    /// A `null` value removes the attribute.
    fn set_attribute(&mut self, element: ElementHandle, name: &str, value: &PropValue);

    fn add_event(
        &mut self,
        element: ElementHandle,
        event_type: EventType,
        name: &str,
        payload: &EventPayload,
    );

    fn remove_event(&mut self, element: ElementHandle, event_type: EventType, name: &str);

    fn set_gesture_detector(&mut self, element: ElementHandle, gesture: &BaseGesture);

    fn remove_gesture_detector(&mut self, element: ElementHandle, gesture_id: u32);

    fn set_css_id(&mut self, elements: &[ElementHandle], css_id: u32, entry: Option<&str>);

    fn flush_element_tree(&mut self, root: ElementHandle, options: &FlushOptions);

    fn add_lifecycle_listener(&mut self);

    fn remove_lifecycle_listener(&mut self);
}

/// One recorded call into [`MemoryNative`].
#[derive(Debug, Clone, PartialEq)]
pub enum NativeOp {
    CreatePage {
        handle: ElementHandle,
    },
    CreateElement {
        handle: ElementHandle,
        kind: ElementKind,
    },
    AppendElement {
        parent: ElementHandle,
        child: ElementHandle,
    },
    RemoveElement {
        parent: ElementHandle,
        child: ElementHandle,
    },
    InsertElementBefore {
        parent: ElementHandle,
        child: ElementHandle,
        reference: Option<ElementHandle>,
    },
    SetAttribute {
        element: ElementHandle,
        name: String,
        old: PropValue,
        new: PropValue,
    },
    AddEvent {
        element: ElementHandle,
        event_type: EventType,
        name: String,
        payload: EventPayload,
    },
    RemoveEvent {
        element: ElementHandle,
        event_type: EventType,
        name: String,
    },
    SetGestureDetector {
        element: ElementHandle,
        gesture: BaseGesture,
    },
    RemoveGestureDetector {
        element: ElementHandle,
        gesture_id: u32,
    },
    SetCssId {
        elements: Vec<ElementHandle>,
        css_id: u32,
        entry: Option<String>,
    },
    Flush {
        root: ElementHandle,
        options: FlushOptions,
    },
    AddLifecycleListener,
    RemoveLifecycleListener,
}

impl NativeOp {
    pub fn is_create(&self) -> bool {
        matches!(self, NativeOp::CreatePage { .. } | NativeOp::CreateElement { .. })
    }

    /// Calls that change the shape of the element tree.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            NativeOp::AppendElement { .. }
                | NativeOp::RemoveElement { .. }
                | NativeOp::InsertElementBefore { .. }
        )
    }
}

#[derive(Debug, Clone)]
struct ElementRecord {
    kind: ElementKind,
    parent: Option<ElementHandle>,
    children: Vec<ElementHandle>,
    attributes: IndexMap<String, PropValue>,
    events: IndexMap<(EventType, String), EventPayload>,
    gestures: IndexMap<u32, BaseGesture>,
    css_scope: Option<u64>,
}

impl ElementRecord {
    fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            attributes: IndexMap::new(),
            events: IndexMap::new(),
            gestures: IndexMap::new(),
            css_scope: None,
        }
    }
}

/// In-memory engine: keeps an element tree and a log of every call.
#[derive(Debug, Default)]
pub struct MemoryNative {
    elements: Vec<ElementRecord>,
    ops: Vec<NativeOp>,
    listening: bool,
    flushes: usize,
}

impl MemoryNative {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> &[NativeOp] {
        &self.ops
    }

    pub fn take_ops(&mut self) -> Vec<NativeOp> {
        std::mem::take(&mut self.ops)
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn has_lifecycle_listener(&self) -> bool {
        self.listening
    }

    pub fn kind(&self, element: ElementHandle) -> Option<&ElementKind> {
        self.record(element).map(|r| &r.kind)
    }

    pub fn children(&self, element: ElementHandle) -> &[ElementHandle] {
        self.record(element).map_or(&[], |r| r.children.as_slice())
    }

    pub fn parent(&self, element: ElementHandle) -> Option<ElementHandle> {
        self.record(element).and_then(|r| r.parent)
    }

    pub fn attribute(&self, element: ElementHandle, name: &str) -> Option<&PropValue> {
        self.record(element).and_then(|r| r.attributes.get(name))
    }

    pub fn event(&self, element: ElementHandle, event_type: EventType, name: &str) -> Option<&EventPayload> {
        self.record(element)
            .and_then(|r| r.events.get(&(event_type, name.to_string())))
    }

    pub fn has_listener(&self, element: ElementHandle, event_type: EventType, name: &str) -> bool {
        self.event(element, event_type, name).is_some()
    }

    pub fn gestures(&self, element: ElementHandle) -> Vec<&BaseGesture> {
        self.record(element)
            .map(|r| r.gestures.values().collect())
            .unwrap_or_default()
    }

    pub fn css_scope(&self, element: ElementHandle) -> Option<u64> {
        self.record(element).and_then(|r| r.css_scope)
    }

    /// Concatenated `text` attributes of every raw-text element under `element`.
    pub fn text_content(&self, element: ElementHandle) -> String {
        let mut out = String::new();
        self.collect_text(element, &mut out);
        out
    }

    fn collect_text(&self, element: ElementHandle, out: &mut String) {
        let Some(record) = self.record(element) else {
            return;
        };
        if record.kind == ElementKind::RawText {
            if let Some(text) = record.attributes.get("text") {
                match text {
                    PropValue::String(s) => out.push_str(s),
                    PropValue::Null => {}
                    other => out.push_str(&other.to_string()),
                }
            }
        }
        for child in &record.children {
            self.collect_text(*child, out);
        }
    }

    pub fn dump_tree(&self, root: Option<ElementHandle>) -> String {
        let mut output = String::new();
        if let Some(root) = root {
            self.dump_element(&mut output, root, 0);
        } else {
            output.push_str("(no root)\n");
        }
        output
    }

    fn dump_element(&self, output: &mut String, element: ElementHandle, depth: usize) {
        let indent = "  ".repeat(depth);
        let Some(record) = self.record(element) else {
            let _ = writeln!(output, "{indent}[{element}] (missing)");
            return;
        };
        let _ = write!(output, "{indent}[{element}] {}", record.kind.tag());
        for (name, value) in &record.attributes {
            let _ = write!(output, " {name}={value}");
        }
        output.push('\n');
        for child in &record.children {
            self.dump_element(output, *child, depth + 1);
        }
    }

    fn record(&self, element: ElementHandle) -> Option<&ElementRecord> {
        self.elements.get(element.0 as usize)
    }

    fn record_mut(&mut self, element: ElementHandle) -> Option<&mut ElementRecord> {
        let record = self.elements.get_mut(element.0 as usize);
        if record.is_none() {
            log::error!("memory native: unknown element {element}");
        }
        record
    }

    fn alloc(&mut self, kind: ElementKind) -> ElementHandle {
        let handle = ElementHandle(self.elements.len() as u32);
        self.elements.push(ElementRecord::new(kind));
        handle
    }

    fn detach(&mut self, child: ElementHandle) {
        let Some(parent) = self.record(child).and_then(|r| r.parent) else {
            return;
        };
        if let Some(record) = self.record_mut(parent) {
            record.children.retain(|c| *c != child);
        }
        if let Some(record) = self.record_mut(child) {
            record.parent = None;
        }
    }

    fn attach(&mut self, parent: ElementHandle, child: ElementHandle, reference: Option<ElementHandle>) {
        if self.record(parent).is_none() || self.record(child).is_none() {
            log::error!("memory native: cannot attach {child} under {parent}");
            return;
        }
        self.detach(child);
        if let Some(record) = self.record_mut(parent) {
            let position = reference
                .and_then(|r| record.children.iter().position(|c| *c == r))
                .unwrap_or(record.children.len());
            record.children.insert(position, child);
        }
        if let Some(record) = self.record_mut(child) {
            record.parent = Some(parent);
        }
    }
}

impl NativeApi for MemoryNative {
    fn create_page(&mut self) -> ElementHandle {
        let handle = self.alloc(ElementKind::Page);
        self.ops.push(NativeOp::CreatePage { handle });
        handle
    }

    fn create_element(&mut self, kind: &ElementKind) -> ElementHandle {
        let handle = self.alloc(kind.clone());
        self.ops.push(NativeOp::CreateElement {
            handle,
            kind: kind.clone(),
        });
        handle
    }

    fn append_element(&mut self, parent: ElementHandle, child: ElementHandle) {
        self.attach(parent, child, None);
        self.ops.push(NativeOp::AppendElement { parent, child });
    }

    fn remove_element(&mut self, parent: ElementHandle, child: ElementHandle) {
        if self.parent(child) == Some(parent) {
            self.detach(child);
        } else {
            log::debug!("memory native: {child} is not a child of {parent}");
        }
        self.ops.push(NativeOp::RemoveElement { parent, child });
    }

    fn insert_element_before(
        &mut self,
        parent: ElementHandle,
        child: ElementHandle,
        reference: Option<ElementHandle>,
    ) {
        self.attach(parent, child, reference);
        self.ops.push(NativeOp::InsertElementBefore {
            parent,
            child,
            reference,
        });
    }

    fn set_attribute(&mut self, element: ElementHandle, name: &str, value: &PropValue) {
        let Some(record) = self.record_mut(element) else {
            return;
        };
        let old = if value.is_null() {
            record.attributes.shift_remove(name)
        } else {
            record.attributes.insert(name.to_string(), value.clone())
        };
        self.ops.push(NativeOp::SetAttribute {
            element,
            name: name.to_string(),
            old: old.unwrap_or(PropValue::Null),
            new: value.clone(),
        });
    }

    fn add_event(
        &mut self,
        element: ElementHandle,
        event_type: EventType,
        name: &str,
        payload: &EventPayload,
    ) {
        let Some(record) = self.record_mut(element) else {
            return;
        };
        record
            .events
            .insert((event_type, name.to_string()), payload.clone());
        self.ops.push(NativeOp::AddEvent {
            element,
            event_type,
            name: name.to_string(),
            payload: payload.clone(),
        });
    }

    fn remove_event(&mut self, element: ElementHandle, event_type: EventType, name: &str) {
        let Some(record) = self.record_mut(element) else {
            return;
        };
        record.events.shift_remove(&(event_type, name.to_string()));
        self.ops.push(NativeOp::RemoveEvent {
            element,
            event_type,
            name: name.to_string(),
        });
    }

    fn set_gesture_detector(&mut self, element: ElementHandle, gesture: &BaseGesture) {
        let Some(record) = self.record_mut(element) else {
            return;
        };
        record.gestures.insert(gesture.id, gesture.clone());
        self.ops.push(NativeOp::SetGestureDetector {
            element,
            gesture: gesture.clone(),
        });
    }

    fn remove_gesture_detector(&mut self, element: ElementHandle, gesture_id: u32) {
        let Some(record) = self.record_mut(element) else {
            return;
        };
        record.gestures.shift_remove(&gesture_id);
        self.ops.push(NativeOp::RemoveGestureDetector {
            element,
            gesture_id,
        });
    }

    fn set_css_id(&mut self, elements: &[ElementHandle], css_id: u32, entry: Option<&str>) {
        let scope = css_scope_id(entry, css_id);
        for element in elements {
            if let Some(record) = self.record_mut(*element) {
                record.css_scope = Some(scope);
            }
        }
        self.ops.push(NativeOp::SetCssId {
            elements: elements.to_vec(),
            css_id,
            entry: entry.map(str::to_string),
        });
    }

    fn flush_element_tree(&mut self, root: ElementHandle, options: &FlushOptions) {
        self.flushes += 1;
        self.ops.push(NativeOp::Flush {
            root,
            options: options.clone(),
        });
    }

    fn add_lifecycle_listener(&mut self) {
        self.listening = true;
        self.ops.push(NativeOp::AddLifecycleListener);
    }

    fn remove_lifecycle_listener(&mut self) {
        self.listening = false;
        self.ops.push(NativeOp::RemoveLifecycleListener);
    }
}
