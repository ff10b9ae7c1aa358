//! Single-assignment promises
//!
//! A [`Promise`] is a value that becomes available at most once. Whoever
//! starts the asynchronous work receives a [`Resolver`] and calls it exactly
//! once with an [`Outcome`]; any number of observers, registered before or
//! after that moment, receive a clone of the same outcome.
//!
//! All state changes and all callbacks run on the promise's
//! [`DeliveryQueue`], so callbacks never run inline with the code that
//! registers them or with the code that resolves the promise.
//!
//! # Example
//!
//! ```
//! use tributary::{DeliveryQueue, Outcome, Promise};
//!
//! let queue = DeliveryQueue::new();
//!
//! let body = Promise::<_, String>::new(&queue, |resolver| {
//!     resolver.resolve(Outcome::success("a,b,c\n1,2,3".to_string()));
//! });
//!
//! let rows = body
//!     .map(|text| text.lines().count())
//!     .and_then({
//!         let queue = queue.clone();
//!         move |n| Promise::pure(&queue, n * 10)
//!     });
//!
//! assert_eq!(queue.run_until_settled(&rows).unwrap(), Outcome::Success(20));
//! ```

use std::error::Error as StdError;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::mem;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::channel::oneshot;
use parking_lot::Mutex;

use crate::queue::QueueRef;
use crate::{DeliveryQueue, Outcome};

type Observer<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send + 'static>;

enum State<T, E> {
    Pending(Vec<Observer<T, E>>),
    Resolved(Outcome<T, E>),
}

struct Shared<T, E> {
    queue: QueueRef,
    claimed: AtomicBool,
    state: Mutex<State<T, E>>,
}

impl<T, E> Shared<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Store the outcome and drain the observers. Runs on the delivery queue.
    fn settle(&self, outcome: Outcome<T, E>) {
        let observers = {
            let mut state = self.state.lock();
            match mem::replace(&mut *state, State::Resolved(outcome.clone())) {
                State::Pending(observers) => observers,
                State::Resolved(_) => unreachable!("resolve claim admitted a second outcome"),
            }
        };
        tracing::trace!(
            observers = observers.len(),
            success = outcome.is_success(),
            "promise resolved"
        );
        for observer in observers {
            observer(outcome.clone());
        }
    }

    /// Deliver to `observer` now if resolved, else queue it. Runs on the
    /// delivery queue.
    fn attach(&self, observer: Observer<T, E>) {
        let cached = {
            let mut state = self.state.lock();
            match &mut *state {
                State::Pending(observers) => {
                    observers.push(observer);
                    return;
                }
                State::Resolved(outcome) => outcome.clone(),
            }
        };
        observer(cached);
    }
}

/// A value that will be available at most once.
///
/// `Promise` is a reference-counted handle: clones observe the same
/// underlying state. Delivering an outcome to several observers clones it,
/// hence the `Clone` bounds on `T` and `E`.
pub struct Promise<T, E> {
    shared: Arc<Shared<T, E>>,
}

/// The write side of a [`Promise`].
///
/// Handed to the starter passed to [`Promise::new`]. It can be cloned and sent
/// to other threads, but only the first resolution is accepted.
pub struct Resolver<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Promise {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Clone for Resolver<T, E> {
    fn clone(&self) -> Self {
        Resolver {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn start<F>(queue: QueueRef, starter: F) -> Self
    where
        F: FnOnce(&Resolver<T, E>),
    {
        let promise = Promise {
            shared: Arc::new(Shared {
                queue,
                claimed: AtomicBool::new(false),
                state: Mutex::new(State::Pending(Vec::new())),
            }),
        };
        let resolver = Resolver {
            shared: Arc::clone(&promise.shared),
        };
        starter(&resolver);
        promise
    }

    /// Create a promise and start the work that will resolve it.
    ///
    /// `starter` runs once, synchronously, before `new` returns. It may resolve
    /// right away, move a clone of the resolver to another thread, or never
    /// resolve at all, in which case the promise stays pending.
    pub fn new<F>(queue: &DeliveryQueue, starter: F) -> Self
    where
        F: FnOnce(&Resolver<T, E>),
    {
        Self::start(queue.downgrade(), starter)
    }

    /// A promise that is already resolved with `outcome`.
    pub fn from_outcome(queue: &DeliveryQueue, outcome: Outcome<T, E>) -> Self {
        Promise {
            shared: Arc::new(Shared {
                queue: queue.downgrade(),
                claimed: AtomicBool::new(true),
                state: Mutex::new(State::Resolved(outcome)),
            }),
        }
    }

    /// A promise that already succeeded with `value`.
    ///
    /// Observers still receive the value through the queue, never inline.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::atomic::{AtomicBool, Ordering};
    /// use std::sync::Arc;
    /// use tributary::{DeliveryQueue, Promise};
    ///
    /// let queue = DeliveryQueue::new();
    /// let seen = Arc::new(AtomicBool::new(false));
    ///
    /// let flag = Arc::clone(&seen);
    /// Promise::<_, String>::pure(&queue, 5).observe(move |_| flag.store(true, Ordering::SeqCst));
    ///
    /// assert!(!seen.load(Ordering::SeqCst));
    /// queue.run_until_idle().unwrap();
    /// assert!(seen.load(Ordering::SeqCst));
    /// ```
    pub fn pure(queue: &DeliveryQueue, value: T) -> Self {
        Self::from_outcome(queue, Outcome::Success(value))
    }

    /// A promise that already failed with `error`.
    pub fn failed(queue: &DeliveryQueue, error: E) -> Self {
        Self::from_outcome(queue, Outcome::Failure(error))
    }

    /// The queue this promise delivers through.
    ///
    /// Promises do not keep their queue alive; this is `None` once every
    /// [`DeliveryQueue`] handle for it has been dropped. Jobs dispatched after
    /// that point are discarded and the promise never resolves.
    pub fn queue(&self) -> Option<DeliveryQueue> {
        self.shared.queue.upgrade()
    }

    pub(crate) fn delivers_through(&self, queue: &DeliveryQueue) -> bool {
        self.shared.queue.refers_to(queue)
    }

    /// Whether the outcome has been stored.
    ///
    /// A resolver call becomes visible here once the queue has run the
    /// resolution job.
    pub fn is_resolved(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Resolved(_))
    }

    /// Register a callback for the outcome.
    ///
    /// The callback runs once, on the delivery queue. Callbacks on the same
    /// promise run in the order they were registered.
    pub fn observe<F>(&self, callback: F)
    where
        F: FnOnce(Outcome<T, E>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.shared
            .queue
            .dispatch(move || shared.attach(Box::new(callback)));
    }

    /// Transform the success value.
    ///
    /// On failure the error is passed through and `f` is never called. A panic
    /// inside `f` is not captured: it unwinds out of the delivery job into the
    /// queue's driver and the returned promise never resolves. Use
    /// [`try_map`](Promise::try_map) when the transform can fail.
    pub fn map<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        Promise::start(self.shared.queue.clone(), |resolver| {
            let resolver = resolver.clone();
            self.observe(move |outcome| resolver.resolve(outcome.map(f)));
        })
    }

    /// Transform the success value with a function that can fail.
    ///
    /// An `Err` from `f` resolves the returned promise with a failure.
    ///
    /// # Example
    ///
    /// ```
    /// use tributary::{DeliveryQueue, Fault, Outcome, Promise};
    ///
    /// let queue = DeliveryQueue::new();
    /// let number = Promise::<_, Fault>::pure(&queue, "x1".to_string())
    ///     .try_map(|s| s.parse::<i32>().map_err(Fault::from_error));
    ///
    /// let outcome = queue.run_until_settled(&number).unwrap();
    /// assert_eq!(outcome.err().map(|f| f.message().to_string()),
    ///            Some("invalid digit found in string".to_string()));
    /// ```
    pub fn try_map<U, F, E2>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        E2: Into<E>,
        F: FnOnce(T) -> Result<U, E2> + Send + 'static,
    {
        Promise::start(self.shared.queue.clone(), |resolver| {
            let resolver = resolver.clone();
            self.observe(move |outcome| {
                resolver.resolve(outcome.and_then(|value| Outcome::from_fallible(|| f(value))))
            });
        })
    }

    /// Chain another asynchronous step.
    ///
    /// On success, `f` produces the next promise and its outcome becomes the
    /// outcome of the returned promise. On failure, `f` is never called.
    #[doc(alias = "flat_map")]
    pub fn and_then<U, F>(&self, f: F) -> Promise<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U, E> + Send + 'static,
    {
        Promise::start(self.shared.queue.clone(), |resolver| {
            let resolver = resolver.clone();
            self.observe(move |outcome| match outcome {
                Outcome::Success(value) => {
                    f(value).observe(move |inner| resolver.resolve(inner));
                }
                Outcome::Failure(error) => resolver.resolve(Outcome::Failure(error)),
            });
        })
    }

    /// Transform the error. `f` is never called on success.
    pub fn map_err<E2, F>(&self, f: F) -> Promise<T, E2>
    where
        E2: Clone + Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        Promise::start(self.shared.queue.clone(), |resolver| {
            let resolver = resolver.clone();
            self.observe(move |outcome| resolver.resolve(outcome.map_err(f)));
        })
    }

    /// Consume the outcome with one handler per track.
    pub fn run<S, F>(&self, on_success: S, on_failure: F)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
    {
        self.observe(move |outcome| match outcome {
            Outcome::Success(value) => on_success(value),
            Outcome::Failure(error) => on_failure(error),
        });
    }

    /// Like [`run`](Promise::run), then call `always` whichever track ran.
    pub fn run_always<S, F, A>(&self, on_success: S, on_failure: F, always: A)
    where
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(E) + Send + 'static,
        A: FnOnce() + Send + 'static,
    {
        self.observe(move |outcome| {
            match outcome {
                Outcome::Success(value) => on_success(value),
                Outcome::Failure(error) => on_failure(error),
            }
            always();
        });
    }
}

impl<T, E> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resolved = matches!(*self.shared.state.lock(), State::Resolved(_));
        f.debug_struct("Promise")
            .field("claimed", &self.shared.claimed.load(Ordering::Acquire))
            .field("resolved", &resolved)
            .finish()
    }
}

impl<T, E> Resolver<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Resolve the promise.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved. Promises emit only one
    /// value; use [`try_resolve`](Resolver::try_resolve) where a second call
    /// is expected.
    pub fn resolve(&self, outcome: Outcome<T, E>) {
        if let Err(rejected) = self.try_resolve(outcome) {
            panic!("{}", rejected);
        }
    }

    /// Resolve the promise, handing the outcome back if it was already
    /// resolved.
    pub fn try_resolve(&self, outcome: Outcome<T, E>) -> Result<(), AlreadyResolved<T, E>> {
        if self.shared.claimed.swap(true, Ordering::AcqRel) {
            return Err(AlreadyResolved { outcome });
        }
        let shared = Arc::clone(&self.shared);
        self.shared.queue.dispatch(move || shared.settle(outcome));
        Ok(())
    }

    /// Whether a resolution has already been accepted.
    pub fn is_claimed(&self) -> bool {
        self.shared.claimed.load(Ordering::Acquire)
    }
}

impl<T, E> fmt::Debug for Resolver<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("claimed", &self.shared.claimed.load(Ordering::Acquire))
            .finish()
    }
}

/// Error returned by [`Resolver::try_resolve`] on a promise that already
/// accepted an outcome. Carries the rejected outcome.
pub struct AlreadyResolved<T, E> {
    outcome: Outcome<T, E>,
}

impl<T, E> AlreadyResolved<T, E> {
    /// The outcome that was not stored.
    pub fn into_outcome(self) -> Outcome<T, E> {
        self.outcome
    }
}

impl<T, E> fmt::Debug for AlreadyResolved<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlreadyResolved")
            .field("success", &self.outcome.is_success())
            .finish()
    }
}

impl<T, E> fmt::Display for AlreadyResolved<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise already resolved: promises emit only one value")
    }
}

impl<T, E> StdError for AlreadyResolved<T, E> {}

/// Error returned by [`Settled`] when the promise can no longer resolve.
///
/// That happens when the promise and all of its resolvers are dropped
/// unresolved, when the delivery thread panics and drops the queued jobs, or
/// when the last queue handle is dropped with jobs still queued. Shutting
/// down a [`DeliveryThread`](crate::DeliveryThread) keeps the queued jobs
/// for the next driver, so it never abandons a promise on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Abandoned;

impl fmt::Display for Abandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise dropped before it was resolved")
    }
}

impl StdError for Abandoned {}

/// A `std::future::Future` that completes with a promise's outcome.
///
/// Created by `.await`-ing a [`Promise`] (through `IntoFuture`). Someone must
/// be driving the promise's queue, usually a
/// [`DeliveryThread`](crate::DeliveryThread).
///
/// # Example
///
/// ```
/// use tributary::{DeliveryQueue, Outcome, Promise};
///
/// # tokio_test::block_on(async {
/// let queue = DeliveryQueue::new();
/// let delivery = queue.spawn_thread().unwrap();
///
/// let csv = Promise::<_, String>::pure(&queue, "a,b\n1,2".to_string());
/// let lines = csv.map(|text| text.lines().count());
///
/// assert_eq!(lines.await, Ok(Outcome::Success(2)));
/// delivery.shutdown();
/// # });
/// ```
#[must_use = "futures do nothing unless polled"]
pub struct Settled<T, E> {
    receiver: oneshot::Receiver<Outcome<T, E>>,
}

impl<T, E> Future for Settled<T, E> {
    type Output = Result<Outcome<T, E>, Abandoned>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let received = ready!(Pin::new(&mut self.receiver).poll(cx));
        Poll::Ready(received.map_err(|_| Abandoned))
    }
}

impl<T, E> fmt::Debug for Settled<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settled").finish_non_exhaustive()
    }
}

impl<T, E> IntoFuture for Promise<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<Outcome<T, E>, Abandoned>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        let (sender, receiver) = oneshot::channel();
        self.observe(move |outcome| {
            let _ = sender.send(outcome);
        });
        Settled { receiver }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn test_starter_runs_synchronously_once() {
        let queue = DeliveryQueue::new();
        let calls = counter();
        let c = Arc::clone(&calls);
        let _promise = Promise::<i32, String>::new(&queue, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolution_waits_for_queue() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, String>::new(&queue, |r| r.resolve(Outcome::success(1)));
        assert!(!promise.is_resolved());
        queue.run_until_idle().unwrap();
        assert!(promise.is_resolved());
    }

    #[test]
    #[should_panic(expected = "promises emit only one value")]
    fn test_second_resolve_panics() {
        let queue = DeliveryQueue::new();
        let _promise = Promise::<i32, String>::new(&queue, |r| {
            r.resolve(Outcome::success(1));
            r.resolve(Outcome::success(2));
        });
    }

    #[test]
    fn test_try_resolve_returns_rejected_outcome() {
        let queue = DeliveryQueue::new();
        let mut second = None;
        let promise = Promise::<i32, String>::new(&queue, |r| {
            r.resolve(Outcome::success(1));
            second = Some(r.try_resolve(Outcome::failure("late".to_string())));
        });
        let rejected = second.unwrap().unwrap_err();
        assert_eq!(rejected.into_outcome(), Outcome::Failure("late".to_string()));
        assert_eq!(queue.run_until_settled(&promise).unwrap(), Outcome::Success(1));
    }

    #[test]
    fn test_resolving_pure_promise_is_rejected() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, String>::pure(&queue, 1);
        let resolver = Resolver {
            shared: Arc::clone(&promise.shared),
        };
        assert!(resolver.is_claimed());
        assert!(resolver.try_resolve(Outcome::success(2)).is_err());
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let queue = DeliveryQueue::new();
        let resolver_slot = Arc::new(Mutex::new(None));
        let promise = Promise::<i32, String>::new(&queue, |r| {
            *resolver_slot.lock() = Some(r.clone());
        });
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = Arc::clone(&order);
            promise.observe(move |_| order.lock().push(i));
        }
        queue.run_until_idle().unwrap();
        assert!(order.lock().is_empty());

        resolver_slot
            .lock()
            .take()
            .unwrap()
            .resolve(Outcome::success(0));
        queue.run_until_idle().unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unresolved_promise_stays_pending() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, String>::new(&queue, |_| {});
        let calls = counter();
        let c = Arc::clone(&calls);
        promise.observe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        queue.run_until_idle().unwrap();
        assert!(!promise.is_resolved());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_promise_delivers_error() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, _>::failed(&queue, "No data".to_string());
        assert_eq!(
            queue.run_until_settled(&promise).unwrap(),
            Outcome::Failure("No data".to_string())
        );
    }

    #[test]
    fn test_map_err_rewrites_failure() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, _>::failed(&queue, "bad".to_string()).map_err(|e| e.len());
        assert_eq!(queue.run_until_settled(&promise).unwrap(), Outcome::Failure(3));
    }

    #[test]
    fn test_run_always_calls_both_handlers() {
        let queue = DeliveryQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b, c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        Promise::<i32, String>::failed(&queue, "bad".to_string()).run_always(
            move |v| a.lock().push(format!("ok {}", v)),
            move |e| b.lock().push(format!("err {}", e)),
            move || c.lock().push("done".to_string()),
        );
        queue.run_until_idle().unwrap();
        assert_eq!(*log.lock(), vec!["err bad".to_string(), "done".to_string()]);
    }

    #[test]
    fn test_promise_does_not_keep_queue_alive() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, String>::pure(&queue, 1);
        assert!(promise.queue().is_some_and(|q| q.same_queue(&queue)));

        drop(queue);
        assert!(promise.queue().is_none());
    }

    #[test]
    fn test_pending_observers_freed_with_queue() {
        let queue = DeliveryQueue::new();
        let payload = Arc::new(());
        let sentinel = Arc::downgrade(&payload);
        let mapped = Promise::<i32, String>::pure(&queue, 1).map(move |n| {
            let _keep = &payload;
            n + 1
        });

        drop(queue);
        assert!(mapped.queue().is_none());
        drop(mapped);
        assert!(sentinel.upgrade().is_none());
    }

    #[test]
    fn test_debug_reports_state() {
        let queue = DeliveryQueue::new();
        let promise = Promise::<i32, String>::pure(&queue, 1);
        let output = format!("{:?}", promise);
        assert!(output.contains("resolved: true"));
    }
}
