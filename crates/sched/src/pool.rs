use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::error::SchedError;

#[derive(Default)]
struct PoolCounters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    panicked: AtomicU64,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl PoolCounters {
    fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire) + self.active.load(Ordering::Acquire)
    }
}

/// Decrements `active` when a task ends, panicking or not.
struct ActiveGuard<'a>(&'a PoolCounters);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let counters = self.0;
        counters.completed.fetch_add(1, Ordering::Relaxed);
        if counters.active.fetch_sub(1, Ordering::AcqRel) == 1 && counters.pending() == 0 {
            let _lock = counters.idle_lock.lock();
            counters.idle.notify_all();
        }
    }
}

/// A fixed-size pool of named worker threads.
///
/// `submit` never blocks. Tasks that panic are contained and logged; the
/// worker thread survives.
pub struct WorkerPool {
    name: &'static str,
    pool: rayon::ThreadPool,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(name: &'static str, threads: usize) -> Result<Self, SchedError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{name}-{i}"))
            .panic_handler(move |payload| {
                tracing::error!(pool = name, "worker panicked: {}", panic_message(payload.as_ref()));
            })
            .build()
            .map_err(|source| SchedError::PoolBuild { pool: name, source })?;
        tracing::debug!(pool = name, threads, "worker pool started");
        Ok(Self {
            name,
            pool,
            counters: Arc::default(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `task` for execution on one of the pool's threads.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) {
        let counters = Arc::clone(&self.counters);
        let name = self.name;
        counters.queued.fetch_add(1, Ordering::AcqRel);
        self.pool.spawn(move || {
            // Bump active before dropping queued so pending never reads zero mid-handoff.
            counters.active.fetch_add(1, Ordering::AcqRel);
            counters.queued.fetch_sub(1, Ordering::AcqRel);
            let _active = ActiveGuard(&counters);
            if let Err(payload) = catch_unwind(AssertUnwindSafe(task)) {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                tracing::error!(pool = name, "task panicked: {}", panic_message(payload.as_ref()));
            }
        });
    }

    /// Tasks queued or running.
    pub fn pending(&self) -> usize {
        self.counters.pending()
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.counters.panicked.load(Ordering::Relaxed)
    }

    /// Block until no task is queued or running, or `timeout` passes.
    /// Returns whether the pool went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut lock = self.counters.idle_lock.lock();
        while self.counters.pending() > 0 {
            if self.counters.idle.wait_until(&mut lock, deadline).timed_out() {
                return self.counters.pending() == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("threads", &self.threads())
            .field("pending", &self.pending())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
