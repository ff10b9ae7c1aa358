//! Producer pool with a fixed concurrency ceiling
//!
//! Promises do not run work themselves; something has to call the resolver.
//! [`ProducerPool`] is an explicitly owned set of worker threads for blocking
//! producer jobs (an HTTP fetch, a file read). At most `ceiling` jobs run at
//! once; the rest wait their turn. Each submitted job yields a [`Promise`]
//! resolved with the job's result.
//!
//! # Example
//!
//! ```
//! use tributary::{join_all, DeliveryQueue, Outcome, PoolConfig, ProducerPool};
//!
//! let queue = DeliveryQueue::new();
//! let pool = ProducerPool::new(&queue, PoolConfig::default().with_ceiling(2)).unwrap();
//!
//! let lengths: Vec<_> = ["1960", "1961", "1962"]
//!     .into_iter()
//!     .map(|year| pool.submit(move || Ok::<_, String>(year.len())))
//!     .collect();
//!
//! let all = join_all(&queue, lengths);
//! assert_eq!(queue.run_until_settled(&all).unwrap(), Outcome::Success(vec![4, 4, 4]));
//! ```

use std::error::Error as StdError;
use std::fmt;

use crate::{DeliveryQueue, Outcome, Promise};

/// Configuration for a [`ProducerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    ceiling: usize,
    thread_name_prefix: String,
}

impl PoolConfig {
    /// Maximum number of producer jobs running at once.
    ///
    /// # Panics
    ///
    /// Panics if `ceiling` is zero.
    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        assert!(ceiling > 0, "producer pool ceiling must be at least 1");
        self.ceiling = ceiling;
        self
    }

    /// Prefix for worker thread names; workers are named `{prefix}-{index}`.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// The configured thread name prefix.
    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ceiling: 4,
            thread_name_prefix: "tributary-producer".to_string(),
        }
    }
}

/// Error returned when the pool's worker threads cannot be started.
#[derive(Debug)]
pub struct PoolError {
    source: rayon::ThreadPoolBuildError,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to start producer pool: {}", self.source)
    }
}

impl StdError for PoolError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.source)
    }
}

/// Worker threads that run producer jobs and resolve promises with their
/// results.
pub struct ProducerPool {
    workers: rayon::ThreadPool,
    queue: DeliveryQueue,
    config: PoolConfig,
}

impl ProducerPool {
    /// Start a pool whose promises deliver through `queue`.
    pub fn new(queue: &DeliveryQueue, config: PoolConfig) -> Result<Self, PoolError> {
        let prefix = config.thread_name_prefix.clone();
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(config.ceiling)
            .thread_name(move |index| format!("{}-{}", prefix, index))
            .panic_handler(|_| {
                tracing::warn!("producer job panicked, its promise stays pending");
            })
            .build()
            .map_err(|source| PoolError { source })?;
        tracing::debug!(ceiling = config.ceiling, "producer pool started");
        Ok(ProducerPool {
            workers,
            queue: queue.clone(),
            config,
        })
    }

    /// The maximum number of jobs running at once.
    pub fn ceiling(&self) -> usize {
        self.config.ceiling
    }

    /// The queue the pool's promises deliver through.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Run `job` on a worker and return a promise of its result.
    ///
    /// `Ok` resolves the promise with a success and `Err` with a failure. A
    /// panic inside `job` is logged and the promise stays pending.
    pub fn submit<T, E, F>(&self, job: F) -> Promise<T, E>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        Promise::new(&self.queue, |resolver| {
            let resolver = resolver.clone();
            self.workers
                .spawn(move || resolver.resolve(Outcome::from_result(job())));
        })
    }
}

impl fmt::Debug for ProducerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerPool")
            .field("ceiling", &self.config.ceiling)
            .field("queue", &self.queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_default_ceiling_matches_connection_limit() {
        assert_eq!(PoolConfig::default().ceiling(), 4);
    }

    #[test]
    #[should_panic(expected = "ceiling must be at least 1")]
    fn test_zero_ceiling_panics() {
        let _ = PoolConfig::default().with_ceiling(0);
    }

    #[test]
    fn test_submit_failure_resolves_failure() {
        let queue = DeliveryQueue::new();
        let pool = ProducerPool::new(&queue, PoolConfig::default()).unwrap();
        let promise = pool.submit(|| Err::<Vec<u8>, _>("Status Code: 500".to_string()));
        assert_eq!(
            queue.run_until_settled(&promise).unwrap(),
            Outcome::Failure("Status Code: 500".to_string())
        );
    }

    #[test]
    fn test_workers_use_prefix() {
        let queue = DeliveryQueue::new();
        let pool = ProducerPool::new(
            &queue,
            PoolConfig::default()
                .with_ceiling(1)
                .with_thread_name_prefix("climate"),
        )
        .unwrap();
        let promise = pool.submit(|| Ok::<_, String>(thread::current().name().map(String::from)));
        assert_eq!(
            queue.run_until_settled(&promise).unwrap(),
            Outcome::Success(Some("climate-0".to_string()))
        );
    }

    #[test]
    fn test_ceiling_bounds_concurrency() {
        let queue = DeliveryQueue::new();
        let pool = ProducerPool::new(&queue, PoolConfig::default().with_ceiling(2)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..8)
            .map(|i| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.submit(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(i)
                })
            })
            .collect();

        let all = crate::join_all(&queue, jobs);
        assert_eq!(
            queue.run_until_settled(&all).unwrap(),
            Outcome::Success((0..8).collect::<Vec<_>>())
        );
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
