use std::env;

/// Per-tree runtime switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Ask the engine for a layout pass on every flush.
    pub trigger_layout: bool,
    /// Collect elements whose exposure state changed and hand them to flush.
    pub track_exposure: bool,
    /// Log the instance tree at debug level after every commit.
    pub debug_tree: bool,
    pub pipeline: Option<String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            trigger_layout: true,
            track_exposure: true,
            debug_tree: false,
            pipeline: None,
        }
    }
}

impl RuntimeOptions {
    /// Defaults overridden by `SNAPSHOT_DEBUG_TREE` and
    /// `SNAPSHOT_DISABLE_EXPOSURE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| {
            lookup(name)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(false)
        };
        Self {
            debug_tree: flag("SNAPSHOT_DEBUG_TREE"),
            track_exposure: !flag("SNAPSHOT_DISABLE_EXPOSURE"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flags_override_defaults() {
        let options = RuntimeOptions::from_lookup(|name| match name {
            "SNAPSHOT_DEBUG_TREE" => Some("1".into()),
            "SNAPSHOT_DISABLE_EXPOSURE" => Some("true".into()),
            _ => None,
        });
        assert!(options.debug_tree);
        assert!(!options.track_exposure);
        assert!(options.trigger_layout);
    }

    #[test]
    fn unset_env_keeps_defaults() {
        assert_eq!(RuntimeOptions::from_lookup(|_| None), RuntimeOptions::default());
    }
}
