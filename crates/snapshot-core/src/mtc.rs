//! Main-thread components (MTC).
//!
//! An MTC renders directly on the main thread. Its implementation may live
//! in a bundle that has not loaded yet; until then the component is a
//! placeholder wrapper that gets filled once the bundle registers it.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::collections::map::HashMap;
use crate::diff::ElementSpec;
use crate::error::Result;
use crate::native::NativeApi;
use crate::template::{TemplateId, MTC_PLACEHOLDER_TEMPLATE, MTC_SLOT_TEMPLATE};
use crate::tree::SnapshotTree;
use crate::value::PropValue;
use crate::InstanceId;

pub trait MainThreadComponent: Send + Sync {
    fn render(&self, props: &PropValue) -> ElementSpec;
}

impl<F> MainThreadComponent for F
where
    F: Fn(&PropValue) -> ElementSpec + Send + Sync,
{
    fn render(&self, props: &PropValue) -> ElementSpec {
        self(props)
    }
}

/// Where an MTC was mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtcMount {
    /// Wrapper instance hosting the component's output.
    pub root: InstanceId,
    /// True while the implementation is unknown.
    pub placeholder: bool,
}

#[derive(Debug, Clone)]
struct MtcSite {
    type_id: String,
    props: PropValue,
    rendered: bool,
}

/// Component implementations by type id, and the sites that use them.
#[derive(Default)]
pub struct MtcRegistry {
    components: HashMap<String, Arc<dyn MainThreadComponent>>,
    sites: IndexMap<InstanceId, MtcSite>,
}

impl MtcRegistry {
    pub fn register(&mut self, type_id: impl Into<String>, component: Arc<dyn MainThreadComponent>) {
        self.components.insert(type_id.into(), component);
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.components.contains_key(type_id)
    }

    pub fn pending(&self) -> Vec<InstanceId> {
        self.sites
            .iter()
            .filter(|(_, site)| !site.rendered)
            .map(|(id, _)| *id)
            .collect()
    }

    pub(crate) fn forget(&mut self, wrapper: InstanceId) {
        self.sites.shift_remove(&wrapper);
    }
}

impl<N: NativeApi> SnapshotTree<N> {
    pub fn register_mtc(&mut self, type_id: impl Into<String>, component: impl MainThreadComponent + 'static) {
        self.mtc.register(type_id, Arc::new(component));
    }

    pub fn mtc(&self) -> &MtcRegistry {
        &self.mtc
    }

    /// Mounts an MTC under `parent`. An unknown type renders an empty
    /// placeholder instead of failing.
    pub fn render_mtc(
        &mut self,
        parent: InstanceId,
        before: Option<InstanceId>,
        type_id: &str,
        props: PropValue,
    ) -> Result<MtcMount> {
        let wrapper = self.create_instance(&TemplateId::new(MTC_PLACEHOLDER_TEMPLATE))?;
        self.insert_before(parent, wrapper, before)?;
        self.mtc.sites.insert(
            wrapper,
            MtcSite {
                type_id: type_id.to_string(),
                props,
                rendered: false,
            },
        );
        let rendered = self.render_site(wrapper)?;
        if !rendered {
            log::debug!("main-thread component `{type_id}` not loaded; rendering placeholder {wrapper}");
        }
        Ok(MtcMount {
            root: wrapper,
            placeholder: !rendered,
        })
    }

    /// New props for a mounted MTC; re-renders when the implementation is known.
    pub fn update_mtc(&mut self, wrapper: InstanceId, props: PropValue) -> Result<bool> {
        if let Some(site) = self.mtc.sites.get_mut(&wrapper) {
            site.props = props;
        }
        self.render_site(wrapper)
    }

    /// Registers a late implementation and fills every placeholder using it.
    pub fn on_bundle_loaded(
        &mut self,
        type_id: &str,
        component: impl MainThreadComponent + 'static,
    ) -> Result<Vec<InstanceId>> {
        self.register_mtc(type_id, component);
        let waiting: Vec<InstanceId> = self
            .mtc
            .sites
            .iter()
            .filter(|(_, site)| !site.rendered && site.type_id == type_id)
            .map(|(id, _)| *id)
            .collect();
        for wrapper in &waiting {
            self.render_site(*wrapper)?;
        }
        Ok(waiting)
    }

    fn render_site(&mut self, wrapper: InstanceId) -> Result<bool> {
        let Some(site) = self.mtc.sites.get(&wrapper) else {
            return Ok(false);
        };
        let Some(component) = self.mtc.components.get(&site.type_id).cloned() else {
            return Ok(false);
        };
        let spec = component.render(&site.props);
        self.reconcile_children(wrapper, vec![spec])?;
        if let Some(site) = self.mtc.sites.get_mut(&wrapper) {
            site.rendered = true;
        }
        Ok(true)
    }

    /// Moves a background-rendered `instance` into an MTC slot under `host`.
    ///
    /// The instance keeps its subtree and elements; only its attachment point
    /// changes.
    pub fn render_mtc_slot(&mut self, host: InstanceId, instance: InstanceId) -> Result<InstanceId> {
        let slot = self.create_instance(&TemplateId::new(MTC_SLOT_TEMPLATE))?;
        self.insert_before(host, slot, None)?;
        if let Some(previous) = self.instance(instance).and_then(|i| i.parent()) {
            self.remove_child_keep_subtree(previous, instance)?;
        }
        self.insert_before(slot, instance, None)?;
        Ok(slot)
    }
}

#[cfg(test)]
#[path = "tests/mtc_tests.rs"]
mod tests;
