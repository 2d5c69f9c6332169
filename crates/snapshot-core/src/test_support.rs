use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::native::{ElementKind, EventType, MemoryNative, NativeApi};
use crate::template::{SnapshotTemplate, TemplateId, TemplateRegistry};
use crate::tree::SnapshotTree;
use crate::{updaters, InstanceId, RuntimeScheduler};

#[derive(Default)]
pub struct TestScheduler {
    pub commits: AtomicUsize,
}

impl RuntimeScheduler for TestScheduler {
    fn schedule_commit(&self) {
        self.commits.fetch_add(1, Ordering::SeqCst);
    }

    fn spawn_task(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        task();
    }
}

fn view(native: &mut dyn NativeApi) -> Vec<crate::ElementHandle> {
    vec![native.create_element(&ElementKind::View)]
}

pub fn registry() -> Arc<TemplateRegistry> {
    let registry = TemplateRegistry::new();
    let templates = [
        SnapshotTemplate::builder("label")
            .element_count(2)
            .create(|native: &mut dyn NativeApi| {
                let text = native.create_element(&ElementKind::Text);
                let raw = native.create_element(&ElementKind::RawText);
                native.append_element(text, raw);
                vec![text, raw]
            })
            .updater(updaters::text(1)),
        SnapshotTemplate::builder("list")
            .element_count(1)
            .create(view)
            .children(0),
        SnapshotTemplate::builder("feed")
            .element_count(1)
            .create(|native: &mut dyn NativeApi| vec![native.create_element(&ElementKind::List)])
            .list(0),
        SnapshotTemplate::builder("item")
            .element_count(1)
            .create(view)
            .updater(updaters::class(0))
            .updater(updaters::event(0, EventType::Bind, "tap")),
        SnapshotTemplate::builder("slots")
            .element_count(3)
            .create(|native: &mut dyn NativeApi| {
                let host = native.create_element(&ElementKind::View);
                let first = native.create_element(&ElementKind::Wrapper);
                let second = native.create_element(&ElementKind::Wrapper);
                native.append_element(host, first);
                native.append_element(host, second);
                vec![host, first, second]
            })
            .slot(1)
            .slot(2),
        SnapshotTemplate::builder("gesture")
            .element_count(1)
            .create(view)
            .updater(updaters::gesture(0)),
        SnapshotTemplate::builder("worklet")
            .element_count(1)
            .create(view)
            .updater(updaters::worklet_event(0, EventType::Bind, "tap"))
            .updater(updaters::worklet_ref(0)),
        SnapshotTemplate::builder("spread")
            .element_count(1)
            .create(view)
            .updater(updaters::spread(0)),
        SnapshotTemplate::builder("ref")
            .element_count(1)
            .create(view)
            .updater(updaters::reference(0)),
        SnapshotTemplate::builder("exposure")
            .element_count(1)
            .create(view)
            .updater(updaters::attribute(0, "exposure-id")),
        SnapshotTemplate::builder("attrs")
            .element_count(1)
            .create(view)
            .updater(updaters::attribute(0, "a"))
            .updater(updaters::attribute(0, "b"))
            .updater(updaters::attribute(0, "c"))
            .updater(updaters::attribute(0, "d")),
        SnapshotTemplate::builder("styled")
            .element_count(1)
            .css_id(7)
            .create(view),
    ];
    for builder in templates {
        match builder.build() {
            Ok(template) => {
                registry.register(template);
            }
            Err(err) => panic!("fixture template: {err}"),
        }
    }
    Arc::new(registry)
}

pub fn tree() -> SnapshotTree<MemoryNative> {
    SnapshotTree::new(registry(), MemoryNative::new()).expect("tree")
}

/// Tree whose construction ops are already cleared.
pub fn quiet_tree() -> SnapshotTree<MemoryNative> {
    let mut tree = tree();
    tree.native_mut().clear_ops();
    tree
}

/// Creates an instance of `template` and appends it to `parent`.
pub fn mount(tree: &mut SnapshotTree<MemoryNative>, parent: InstanceId, template: &str) -> InstanceId {
    let id = tree.create_instance(&TemplateId::new(template)).expect("create instance");
    tree.insert_before(parent, id, None).expect("insert");
    id
}
