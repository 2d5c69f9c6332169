use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use snapshot_bridge::{BackgroundRuntime, Result};
use snapshot_core::{
    EngineSignal, EventPayload, EventType, InstanceId, MemoryNative, PropValue, SlotValue, TemplateId,
    TemplateRegistry,
};
use snapshot_macros::snapshot;
use snapshot_runtime_std::{global_registry, BackgroundApp, DualThreadRuntime};

const WAIT: Duration = Duration::from_secs(2);

fn register_templates(registry: &TemplateRegistry) -> Result<()> {
    let templates = [
        snapshot! {
            "counter", css_id = 1,
            view(class = "counter", bindtap = dyn) {
                text(class = "label") { "Count: " dyn }
                view(class = "history") { children }
            }
        },
        snapshot! { "tick", text(class = dyn) { dyn } },
    ];
    for template in templates {
        registry.register(template.build()?);
    }
    Ok(())
}

/// Background side: a counter that appends a row per tap.
#[derive(Default)]
struct Counter {
    count: Arc<AtomicI64>,
    root: Option<InstanceId>,
    rows: i64,
}

impl BackgroundApp for Counter {
    fn render(&mut self, runtime: &mut BackgroundRuntime) -> Result<()> {
        let count = Arc::clone(&self.count);
        let tree = runtime.tree_mut();
        let counter = tree.create_instance(&TemplateId::new("counter"))?;
        tree.on(counter, 0, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })?;
        tree.set_value(counter, 1, "0".into())?;
        let root = tree.root();
        tree.insert_before(root, counter, None)?;
        self.root = Some(counter);
        Ok(())
    }

    fn update(&mut self, runtime: &mut BackgroundRuntime) -> Result<()> {
        let Some(counter) = self.root else {
            return Ok(());
        };
        let count = self.count.load(Ordering::SeqCst);
        let tree = runtime.tree_mut();
        tree.set_value(counter, 1, count.to_string().into())?;
        while self.rows < count {
            self.rows += 1;
            let row = tree.create_instance(&TemplateId::new("tick"))?;
            let class = if self.rows % 2 == 0 { "tick even" } else { "tick odd" };
            tree.set_value(row, 0, class.into())?;
            tree.set_value(row, 1, format!(" #{}", self.rows).into())?;
            tree.insert_before(counter, row, None)?;
        }
        Ok(())
    }
}

/// Main thread side: the same counter, rendered before the background runs.
fn first_screen(runtime: &mut DualThreadRuntime<MemoryNative>) -> Result<InstanceId> {
    let tree = runtime.main_mut().tree_mut();
    let counter = tree.create_instance(&TemplateId::new("counter"))?;
    tree.set_value(counter, 0, SlotValue::token(format!("{counter}:0:")))?;
    tree.set_value(counter, 1, "0".into())?;
    tree.insert_before(InstanceId::ROOT, counter, None)?;
    Ok(counter)
}

fn tap_token(runtime: &DualThreadRuntime<MemoryNative>, counter: InstanceId) -> Option<String> {
    let tree = runtime.main().tree();
    let element = tree.instance(counter)?.root_element()?;
    match tree.native().event(element, EventType::Bind, "tap")? {
        EventPayload::Token(token) => Some(token.clone()),
        EventPayload::Worklet(_) => None,
    }
}

fn print_page(runtime: &DualThreadRuntime<MemoryNative>, title: &str) {
    let tree = runtime.main().tree();
    println!("--- {title} ---");
    print!("{}", tree.native().dump_tree(Some(tree.page())));
    println!("text: {:?}", tree.native().text_content(tree.page()));
    println!();
}

fn main() -> Result<()> {
    env_logger::init();

    println!("=== Snapshot-RS Counter Example ===");
    println!("The main thread renders a first screen, the background thread");
    println!("hydrates it and answers taps with minimal patches.");
    println!();

    let registry = global_registry();
    register_templates(&registry)?;

    let mut runtime = DualThreadRuntime::spawn(registry, MemoryNative::new(), Counter::default())?;
    let counter = first_screen(&mut runtime)?;
    runtime.send_first_screen()?;
    print_page(&runtime, "first screen");

    match runtime.wait_for_patch(WAIT)? {
        Some(report) => log::info!("hydrated with {} patches", report.applied),
        None => log::warn!("no hydration patch within {WAIT:?}"),
    }

    for tap in 1..=3 {
        let Some(token) = tap_token(&runtime, counter) else {
            log::error!("counter lost its tap listener");
            break;
        };
        runtime.publish_event(token, PropValue::Null)?;
        if let Some(report) = runtime.wait_for_patch(WAIT)? {
            log::info!("tap {tap}: {} patches applied", report.applied);
        }
        print_page(&runtime, &format!("after tap {tap}"));
    }

    if let Some(report) = runtime.on_engine_signal(&EngineSignal::DestroyLifetime) {
        println!("page destroyed, {} instances released", report.destroyed.len());
    }
    runtime.shutdown()
}
