//! Worker pool and job grouping for multi-threaded tile processing.
//!
//! A [`ThreadEnv`] owns a fixed set of worker threads. Jobs are always scheduled
//! against a [`ThreadQueue`], which counts its outstanding jobs so that callers
//! can wait for exactly the work they started.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

use log::{debug, error};

use crate::error::{Result, StripeError};

#[derive(Clone)]
pub struct ThreadEnv {
    pool: Arc<rayon::ThreadPool>,
}

impl ThreadEnv {
    pub fn new(num_threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("htj2k-worker-{i}"))
            // Without a handler rayon aborts the process on a panicking job.
            .panic_handler(|_| error!("tile job panicked"))
            .build()
            .map_err(|_| StripeError::ThreadPoolFailed)?;
        debug!("thread env started with {} workers", pool.current_num_threads());
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn create_queue(&self) -> ThreadQueue {
        ThreadQueue::default()
    }

    /// Runs `job` on a worker. The job counts as pending on `queue` until it
    /// returns or unwinds.
    pub fn schedule<F>(&self, queue: &ThreadQueue, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = queue.enter();
        self.pool.spawn(move || {
            let _guard = guard;
            job();
        });
    }

    /// Blocks until every job scheduled on `queue` has finished.
    pub fn join(&self, queue: &ThreadQueue) {
        queue.wait_idle();
    }
}

impl std::fmt::Debug for ThreadEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadEnv")
            .field("num_threads", &self.num_threads())
            .finish()
    }
}

/// Counter of outstanding jobs. Cloning shares the counter.
#[derive(Clone, Default)]
pub struct ThreadQueue {
    pending: Arc<(Mutex<usize>, Condvar)>,
}

impl ThreadQueue {
    pub fn pending(&self) -> usize {
        *self.pending.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self) -> PendingGuard {
        *self.pending.0.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        PendingGuard {
            pending: Arc::clone(&self.pending),
        }
    }

    fn wait_idle(&self) {
        let (lock, idle) = &*self.pending;
        let mut count = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = idle.wait(count).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct PendingGuard {
    pending: Arc<(Mutex<usize>, Condvar)>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let (lock, idle) = &*self.pending;
        let mut count = lock.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            idle.notify_all();
        }
    }
}
