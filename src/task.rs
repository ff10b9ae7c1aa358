//! Tokio producers (requires the `async` feature)
//!
//! [`spawn`] runs an async producer on a tokio runtime and returns a
//! [`Promise`] of its result, so async I/O can feed the same combinators as
//! thread-pool producers.
//!
//! # Example
//!
//! ```rust
//! use tributary::{task, DeliveryQueue, Outcome};
//!
//! let runtime = tokio::runtime::Runtime::new().unwrap();
//! let queue = DeliveryQueue::new();
//!
//! let promise = task::spawn(runtime.handle(), &queue, async { Ok::<_, String>(3 * 7) });
//! assert_eq!(queue.run_until_settled(&promise).unwrap(), Outcome::Success(21));
//! ```

use std::future::Future;

use tokio::runtime::Handle;

use crate::{DeliveryQueue, Outcome, Promise};

/// Spawn `producer` on `handle` and resolve the returned promise with its
/// output.
///
/// If the task is aborted or panics, the promise stays pending.
pub fn spawn<T, E, F>(handle: &Handle, queue: &DeliveryQueue, producer: F) -> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Future<Output = Result<T, E>> + Send + 'static,
{
    Promise::new(queue, |resolver| {
        let resolver = resolver.clone();
        handle.spawn(async move {
            resolver.resolve(Outcome::from_result(producer.await));
        });
    })
}
