//! Cancellable one-shot timers.
//!
//! Monitors never sleep themselves; they hand callbacks to a [`Scheduler`]. The
//! tokio-backed [`TokioScheduler`] runs them on wall-clock time, the
//! [`VirtualScheduler`] runs them when a test advances its clock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;

/// Identifies a scheduled callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Callback run when a timer fires
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Source of one-shot timers
pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;

    /// Prevent a pending timer from firing; unknown or fired handles are ignored
    fn cancel(&self, handle: TimerHandle);
}

/// [`Scheduler`] on top of a tokio runtime
pub struct TokioScheduler {
    runtime: Handle,
    next_id: AtomicU64,
    pending: Arc<Mutex<HashMap<u64, AbortHandle>>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            next_id: AtomicU64::new(1),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Scheduler on the runtime the caller is running in
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn pending(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);

        // Hold the map while spawning so the task cannot remove its entry before it exists
        let mut map = lock(&self.pending);
        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if lock(&pending).remove(&id).is_some() {
                task();
            }
        });
        map.insert(id, join.abort_handle());

        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(abort) = lock(&self.pending).remove(&handle.0) {
            abort.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, abort) in lock(&self.pending).drain() {
            abort.abort();
        }
    }
}

#[derive(Default)]
struct VirtualQueue {
    now: Duration,
    next_id: u64,
    queue: BTreeMap<(Duration, u64), TimerTask>,
    due: HashMap<u64, Duration>,
}

/// Manually driven [`Scheduler`] for tests
#[derive(Default)]
pub struct VirtualScheduler {
    inner: Mutex<VirtualQueue>,
}

impl VirtualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation
    pub fn now(&self) -> Duration {
        lock(&self.inner).now
    }

    /// Number of timers waiting to fire
    pub fn pending(&self) -> usize {
        lock(&self.inner).queue.len()
    }

    /// Move the clock forward, firing every timer that comes due, in order.
    ///
    /// Timers scheduled by callbacks fire in the same call if they fall inside
    /// the window.
    pub fn advance(&self, by: Duration) {
        let target = lock(&self.inner).now + by;

        loop {
            let task = {
                let mut inner = lock(&self.inner);
                let Some((&(due, id), _)) = inner.queue.first_key_value() else {
                    break;
                };
                if due > target {
                    break;
                }
                inner.now = due;
                inner.due.remove(&id);
                inner.queue.remove(&(due, id))
            };

            if let Some(task) = task {
                task();
            }
        }

        lock(&self.inner).now = target;
    }
}

impl Scheduler for VirtualScheduler {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        let due = inner.now + delay;
        inner.queue.insert((due, id), task);
        inner.due.insert(id, due);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut inner = lock(&self.inner);
        if let Some(due) = inner.due.remove(&handle.0) {
            inner.queue.remove(&(due, handle.0));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
