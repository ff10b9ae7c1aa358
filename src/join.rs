//! Joining many promises into one
//!
//! [`join_all`] waits on a fixed collection of independent promises and
//! resolves with all of their values, in input order, or with the first error
//! delivered.
//!
//! # Example
//!
//! ```
//! use tributary::{join_all, DeliveryQueue, Outcome, Promise};
//!
//! let queue = DeliveryQueue::new();
//! let months: Vec<_> = (1..=3)
//!     .map(|m| Promise::<_, String>::pure(&queue, format!("1960-{}", m)))
//!     .collect();
//!
//! let all = join_all(&queue, months);
//! assert_eq!(
//!     queue.run_until_settled(&all).unwrap(),
//!     Outcome::Success(vec!["1960-1".to_string(), "1960-2".to_string(), "1960-3".to_string()])
//! );
//! ```

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{DeliveryQueue, Outcome, Promise};

/// Accumulator for one join: a slot per input and a done flag.
struct Tally<T> {
    slots: Vec<Option<T>>,
    filled: usize,
    done: bool,
}

impl<T> Tally<T> {
    fn new(len: usize) -> Self {
        Tally {
            slots: (0..len).map(|_| None).collect(),
            filled: 0,
            done: false,
        }
    }

    /// Record one input's outcome. Returns the join's outcome the first time
    /// it is decided and `None` otherwise.
    fn record<E>(&mut self, index: usize, outcome: Outcome<T, E>) -> Option<Outcome<Vec<T>, E>> {
        if self.done {
            return None;
        }
        match outcome {
            Outcome::Success(value) => {
                if self.slots[index].replace(value).is_none() {
                    self.filled += 1;
                }
                if self.filled < self.slots.len() {
                    return None;
                }
                self.done = true;
                let values = mem::take(&mut self.slots).into_iter().flatten().collect();
                Some(Outcome::Success(values))
            }
            Outcome::Failure(error) => {
                self.done = true;
                self.slots.clear();
                Some(Outcome::Failure(error))
            }
        }
    }
}

/// Wait for every promise and collect their values in input order.
///
/// - The output succeeds once all inputs succeed; `values[i]` is the value of
///   the `i`-th input, whatever order they completed in.
/// - The first failure delivered resolves the output with that error. Later
///   outcomes from the other inputs are ignored.
/// - An empty input resolves with an empty vector.
///
/// Inputs may belong to any queue; the bookkeeping runs on the queue each
/// input delivers through and the output delivers through `queue`.
pub fn join_all<T, E, I>(queue: &DeliveryQueue, promises: I) -> Promise<Vec<T>, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    I: IntoIterator<Item = Promise<T, E>>,
{
    let promises: Vec<Promise<T, E>> = promises.into_iter().collect();
    if promises.is_empty() {
        return Promise::pure(queue, Vec::new());
    }

    let count = promises.len();
    Promise::new(queue, |resolver| {
        let tally = Arc::new(Mutex::new(Tally::new(count)));
        for (index, promise) in promises.iter().enumerate() {
            let tally = Arc::clone(&tally);
            let resolver = resolver.clone();
            promise.observe(move |outcome| {
                let decided = tally.lock().record(index, outcome);
                if let Some(outcome) = decided {
                    tracing::debug!(inputs = count, success = outcome.is_success(), "join decided");
                    resolver.resolve(outcome);
                }
            });
        }
    })
}
