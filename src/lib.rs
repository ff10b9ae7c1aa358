//! # Tributary
//!
//! > *Many small streams, one river.*
//!
//! A small library of single-assignment promises for callback-style
//! concurrency.
//!
//! - [`Outcome`] is a railway value: a success or an opaque failure.
//! - [`Promise`] resolves to one `Outcome`, exactly once, and hands it to every
//!   observer. `map`, `try_map`, and `and_then` build new promises from old
//!   ones; failures skip the remaining steps.
//! - [`join_all`] waits on many promises and yields their values in input
//!   order, or the first failure.
//! - [`DeliveryQueue`] is the one serialized context every resolution and
//!   callback runs on, so callbacks never race each other.
//! - [`ProducerPool`] runs blocking producers on a fixed number of threads.
//!
//! ## Quick Example
//!
//! ```rust
//! use tributary::prelude::*;
//!
//! let queue = DeliveryQueue::new();
//! let pool = ProducerPool::new(&queue, PoolConfig::default()).unwrap();
//!
//! let downloads: Vec<Promise<usize, Fault>> = (1..=12)
//!     .map(|month| {
//!         pool.submit(move || -> Result<String, Fault> {
//!             Ok(format!("legend\nyear,month\n1960,{}\n", month))
//!         })
//!         .map(|csv| csv.lines().filter(|line| line.contains(',')).count())
//!     })
//!     .collect();
//!
//! let rows = join_all(&queue, downloads).map(|counts| counts.iter().sum::<usize>());
//!
//! match queue.run_until_settled(&rows).unwrap() {
//!     Outcome::Success(total) => assert_eq!(total, 24),
//!     Outcome::Failure(fault) => panic!("import failed: {}", fault),
//! }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod fault;
pub mod join;
pub mod outcome;
pub mod pool;
pub mod promise;
pub mod queue;
#[cfg(feature = "async")]
pub mod task;
pub mod testing;

// Re-exports
pub use fault::Fault;
pub use join::join_all;
pub use outcome::Outcome;
pub use pool::{PoolConfig, PoolError, ProducerPool};
pub use promise::{Abandoned, AlreadyResolved, Promise, Resolver, Settled};
pub use queue::{DeliveryQueue, DeliveryThread, QueueConfig, QueueError};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fault::Fault;
    pub use crate::join::join_all;
    pub use crate::outcome::Outcome;
    pub use crate::pool::{PoolConfig, ProducerPool};
    pub use crate::promise::{Promise, Resolver};
    pub use crate::queue::{DeliveryQueue, DeliveryThread, QueueConfig};
}
