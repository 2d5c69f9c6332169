//! Gesture descriptors, composition and the positional detector diff.
//!
//! Composed gestures never reach the engine: they are flattened into base
//! gestures whose relation lists (`wait_for`, `simultaneous_with`,
//! `continue_with`) encode the composition.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collections::map::HashSet;
use crate::value::PropValue;
use crate::worklet::WorkletDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GestureKind {
    Pan,
    Tap,
    LongPress,
    Fling,
    Pinch,
    Rotation,
    Native,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseGesture {
    pub id: u32,
    pub kind: GestureKind,
    #[serde(default)]
    pub config: serde_json::Map<String, PropValue>,
    /// Callback name (`onBegin`, `onUpdate`, ...) to main-thread worklet.
    #[serde(default)]
    pub callbacks: BTreeMap<String, WorkletDescriptor>,
    #[serde(default)]
    pub wait_for: Vec<u32>,
    #[serde(default)]
    pub simultaneous_with: Vec<u32>,
    #[serde(default)]
    pub continue_with: Vec<u32>,
}

impl BaseGesture {
    pub fn new(id: u32, kind: GestureKind) -> Self {
        Self {
            id,
            kind,
            config: serde_json::Map::new(),
            callbacks: BTreeMap::new(),
            wait_for: Vec::new(),
            simultaneous_with: Vec::new(),
            continue_with: Vec::new(),
        }
    }

    pub fn config(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn on(mut self, callback: impl Into<String>, worklet: WorkletDescriptor) -> Self {
        self.callbacks.insert(callback.into(), worklet);
        self
    }

    pub fn wait_for(mut self, id: u32) -> Self {
        extend_unique(&mut self.wait_for, &[id]);
        self
    }

    pub fn simultaneous_with(mut self, id: u32) -> Self {
        extend_unique(&mut self.simultaneous_with, &[id]);
        self
    }

    pub fn continue_with(mut self, id: u32) -> Self {
        extend_unique(&mut self.continue_with, &[id]);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompositionMode {
    Simultaneous,
    Exclusive,
    Race,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposedGesture {
    pub mode: CompositionMode,
    pub gestures: Vec<GestureDescriptor>,
}

impl ComposedGesture {
    fn prepare(&mut self, simultaneous: &[u32], wait_for: &[u32]) {
        match self.mode {
            CompositionMode::Race => {
                for gesture in &mut self.gestures {
                    prepare_single(gesture, simultaneous, wait_for);
                }
            }
            CompositionMode::Simultaneous => {
                // Each member runs alongside every base gesture of the other
                // members, never alongside its own group.
                let groups: Vec<Vec<u32>> = self.gestures.iter().map(GestureDescriptor::ids).collect();
                for (index, gesture) in self.gestures.iter_mut().enumerate() {
                    let mut others: Vec<u32> = simultaneous.to_vec();
                    for (other, ids) in groups.iter().enumerate() {
                        if other != index {
                            extend_unique(&mut others, ids);
                        }
                    }
                    prepare_single(gesture, &others, wait_for);
                }
            }
            CompositionMode::Exclusive => {
                // Every group waits for all groups before it.
                let mut require_to_fail: Vec<u32> = wait_for.to_vec();
                for gesture in &mut self.gestures {
                    let ids = gesture.ids();
                    prepare_single(gesture, simultaneous, &require_to_fail);
                    extend_unique(&mut require_to_fail, &ids);
                }
            }
        }
    }
}

fn prepare_single(gesture: &mut GestureDescriptor, simultaneous: &[u32], wait_for: &[u32]) {
    match gesture {
        GestureDescriptor::Base(base) => {
            extend_unique(&mut base.simultaneous_with, simultaneous);
            extend_unique(&mut base.wait_for, wait_for);
        }
        GestureDescriptor::Composed(composed) => composed.prepare(simultaneous, wait_for),
    }
}

fn extend_unique(target: &mut Vec<u32>, ids: &[u32]) {
    for id in ids {
        if !target.contains(id) {
            target.push(*id);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GestureDescriptor {
    Base(BaseGesture),
    Composed(ComposedGesture),
}

impl GestureDescriptor {
    pub fn simultaneous(gestures: Vec<GestureDescriptor>) -> Self {
        Self::compose(CompositionMode::Simultaneous, gestures)
    }

    pub fn exclusive(gestures: Vec<GestureDescriptor>) -> Self {
        Self::compose(CompositionMode::Exclusive, gestures)
    }

    pub fn race(gestures: Vec<GestureDescriptor>) -> Self {
        Self::compose(CompositionMode::Race, gestures)
    }

    fn compose(mode: CompositionMode, gestures: Vec<GestureDescriptor>) -> Self {
        let mut composed = ComposedGesture { mode, gestures };
        composed.prepare(&[], &[]);
        GestureDescriptor::Composed(composed)
    }

    /// Base gestures in declaration order.
    pub fn flatten(&self) -> Vec<&BaseGesture> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a BaseGesture>) {
        match self {
            GestureDescriptor::Base(base) => out.push(base),
            GestureDescriptor::Composed(composed) => {
                for gesture in &composed.gestures {
                    gesture.collect(out);
                }
            }
        }
    }

    pub fn ids(&self) -> Vec<u32> {
        self.flatten().iter().map(|g| g.id).collect()
    }

    /// Visit every callback worklet, used to stamp exec ids before shipping.
    pub fn for_each_worklet_mut(&mut self, f: &mut dyn FnMut(&mut WorkletDescriptor)) {
        match self {
            GestureDescriptor::Base(base) => base.callbacks.values_mut().for_each(|w| f(w)),
            GestureDescriptor::Composed(composed) => {
                for gesture in &mut composed.gestures {
                    gesture.for_each_worklet_mut(f);
                }
            }
        }
    }
}

impl From<BaseGesture> for GestureDescriptor {
    fn from(value: BaseGesture) -> Self {
        GestureDescriptor::Base(value)
    }
}

/// Detector mutation for one element.
#[derive(Debug, Clone, PartialEq)]
pub enum GestureOp {
    Remove(u32),
    Set(BaseGesture),
}

/// Flattened base gestures with relations restricted to the sibling set.
pub fn resolve(descriptor: Option<&GestureDescriptor>) -> Vec<BaseGesture> {
    let Some(descriptor) = descriptor else {
        return Vec::new();
    };
    let flat = descriptor.flatten();
    let ids: HashSet<u32> = flat.iter().map(|g| g.id).collect();
    flat.into_iter()
        .map(|gesture| {
            let mut gesture = gesture.clone();
            let owner = gesture.id;
            for (name, relation) in [
                ("waitFor", &mut gesture.wait_for),
                ("simultaneousWith", &mut gesture.simultaneous_with),
                ("continueWith", &mut gesture.continue_with),
            ] {
                relation.retain(|id| {
                    let keep = *id != owner && ids.contains(id);
                    if !keep {
                        log::warn!("gesture {owner}: dropping dangling {name} relation to {id}");
                    }
                    keep
                });
            }
            gesture
        })
        .collect()
}

/// Positional diff between the detectors of two renders.
pub fn diff_gestures(old: Option<&GestureDescriptor>, new: Option<&GestureDescriptor>) -> Vec<GestureOp> {
    let old = resolve(old);
    let new = resolve(new);
    let mut ops = Vec::new();
    for index in 0..old.len().max(new.len()) {
        match (old.get(index), new.get(index)) {
            (Some(prev), None) => ops.push(GestureOp::Remove(prev.id)),
            (None, Some(next)) => ops.push(GestureOp::Set(next.clone())),
            (Some(prev), Some(next)) if prev != next => {
                if prev.id != next.id {
                    ops.push(GestureOp::Remove(prev.id));
                }
                ops.push(GestureOp::Set(next.clone()));
            }
            _ => {}
        }
    }
    ops
}
