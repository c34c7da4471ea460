//! Bounded worker pool for data-parallel work inside a task.

use crate::error::EngineError;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::sync::Arc;

pub struct WorkerPool {
    size: Mutex<usize>,
    pool: Mutex<Option<Arc<rayon::ThreadPool>>>,
}

impl WorkerPool {
    /// The underlying threads are started on first use.
    pub fn new(size: usize) -> Self {
        Self {
            size: Mutex::new(size.max(1)),
            pool: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        *self.size.lock()
    }

    /// Takes effect for work submitted after the call.
    pub fn resize(&self, size: usize) {
        let size = size.max(1);
        let mut current = self.size.lock();
        if *current != size {
            *current = size;
            *self.pool.lock() = None;
            tracing::debug!(size, "worker pool resized");
        }
    }

    fn pool(&self) -> Result<Arc<rayon::ThreadPool>, EngineError> {
        let size = self.size();
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|i| format!("motiflab-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Internal(format!("Could not start worker pool: {e}")))?;
        let pool = Arc::new(pool);
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Applies `f` to every item using at most `size()` threads. Results keep input order.
    pub fn map_bounded<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>, EngineError>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        let pool = self.pool()?;
        Ok(pool.install(|| items.into_par_iter().map(f).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_map_keeps_order() {
        let pool = WorkerPool::new(3);
        let out = pool.map_bounded((0..50).collect(), |x: i32| x * 2).unwrap();
        assert_eq!(out, (0..50).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        pool.map_bounded((0..16).collect(), |_x: i32| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            active.fetch_sub(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_resize_rebuilds_pool() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.size(), 1);
        pool.resize(4);
        assert_eq!(pool.size(), 4);
        let threads = pool
            .map_bounded(vec![(); 1], |_| rayon::current_num_threads())
            .unwrap();
        assert_eq!(threads, vec![4]);
    }
}
