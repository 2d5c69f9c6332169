//! Host scheduling hooks for the snapshot runtime.
//!
//! The core never drives itself: when a tree gains dirty instances it asks
//! the host for a commit, and the host calls `SnapshotTree::commit` on the
//! thread that owns the tree.

/// Schedules work on behalf of a snapshot tree.
///
/// Implementations must be safe to use from multiple threads.
pub trait RuntimeScheduler: Send + Sync {
    /// Request that the host run a commit soon.
    fn schedule_commit(&self);

    /// Spawn a task that will run on the thread owning the tree.
    fn spawn_task(&self, task: Box<dyn FnOnce() + Send + 'static>);
}
