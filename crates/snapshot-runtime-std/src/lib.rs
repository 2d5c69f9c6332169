//! Standard runtime services backed by Rust's `std` library.
//!
//! [`StdScheduler`] implements the core scheduling hooks with atomics and a
//! task queue, and [`DualThreadRuntime`] runs a background tree on its own
//! thread, joined to the caller's main-thread tree by channels.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use once_cell::sync::Lazy;
use snapshot_core::{RuntimeScheduler, TemplateRegistry};

mod dual;

pub use dual::{BackgroundApp, DualThreadRuntime, ToBackground, ToMain};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Scheduler for the thread that owns a snapshot tree.
///
/// Commit requests set a flag and wake the owner; spawned tasks wait in a
/// queue until the owner drains it.
pub struct StdScheduler {
    commit_requested: AtomicBool,
    tasks: Mutex<VecDeque<Task>>,
    waker: RwLock<Option<Arc<dyn Fn() + Send + Sync + 'static>>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            commit_requested: AtomicBool::new(false),
            tasks: Mutex::new(VecDeque::new()),
            waker: RwLock::new(None),
        }
    }

    /// Returns whether a commit has been requested since the last call.
    pub fn take_commit_request(&self) -> bool {
        self.commit_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker invoked whenever a commit or task is scheduled.
    pub fn set_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn clear_waker(&self) {
        *self.waker.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Runs queued tasks on the calling thread. Returns how many ran.
    pub fn drain_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn wake(&self) {
        let waker = self
            .waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("commit_requested", &self.commit_requested.load(Ordering::SeqCst))
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

impl RuntimeScheduler for StdScheduler {
    fn schedule_commit(&self) {
        self.commit_requested.store(true, Ordering::SeqCst);
        self.wake();
    }

    fn spawn_task(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
        self.wake();
    }
}

static GLOBAL_REGISTRY: Lazy<Arc<TemplateRegistry>> = Lazy::new(|| Arc::new(TemplateRegistry::new()));

/// Process-wide template registry shared by every bundle loaded in-process.
pub fn global_registry() -> Arc<TemplateRegistry> {
    Arc::clone(&GLOBAL_REGISTRY)
}
