use thiserror::Error;

use crate::InstanceId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The template id is unknown. Recoverable while the bundle that
    /// registers it is still loading.
    #[error("snapshot template `{id}` is not registered")]
    TemplateNotFound { id: String },

    /// The compiled template and the runtime disagree about slots or elements.
    /// Always fatal.
    #[error("snapshot template `{template}` shape mismatch: {detail}")]
    TemplateShapeMismatch { template: String, detail: String },

    /// An id crossed the thread boundary before hydration mapped it.
    #[error("no hydration mapping for instance {id}")]
    HydrationMappingMissing { id: InstanceId },

    #[error("snapshot instance {id} missing")]
    InstanceMissing { id: InstanceId },

    #[error("snapshot instance {id} already exists")]
    DuplicateInstance { id: InstanceId },

    /// `child` is `parent` or one of its ancestors.
    #[error("inserting instance {child} under {parent} would create a cycle")]
    CyclicInsert { parent: InstanceId, child: InstanceId },

    #[error("list {list} has no item at index {index}")]
    ListItemMissing { list: InstanceId, index: usize },
}

impl SnapshotError {
    pub(crate) fn shape(template: impl Into<String>, detail: impl Into<String>) -> Self {
        SnapshotError::TemplateShapeMismatch {
            template: template.into(),
            detail: detail.into(),
        }
    }

    /// Whether the caller may retry after the missing piece arrives.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SnapshotError::TemplateNotFound { .. } | SnapshotError::HydrationMappingMissing { .. }
        )
    }
}

pub type Result<T, E = SnapshotError> = std::result::Result<T, E>;
