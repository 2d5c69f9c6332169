use std::sync::Arc;

use snapshot_core::TemplateRegistry;
use snapshot_macros::snapshot;

pub fn registry() -> Arc<TemplateRegistry> {
    let registry = TemplateRegistry::new();
    let templates = [
        snapshot! { "list", view(class = "list") { children } },
        snapshot! { "item", view(class = dyn, bindtap = dyn) },
        snapshot! { "label", text { dyn } },
        snapshot! { "spread", view(..dyn) },
        snapshot! { "anchor", view(ref = dyn) },
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
