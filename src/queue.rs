//! The serialized delivery queue
//!
//! Every resolution and every observer callback in this crate runs as a job on
//! a [`DeliveryQueue`]. A queue is a FIFO of boxed jobs with exactly one
//! driver at a time, so no two callbacks ever run concurrently and promise
//! state never needs to be shared between running callbacks.
//!
//! Producers may dispatch from any thread. Draining happens in one of three
//! ways:
//!
//! - [`DeliveryQueue::run_until_idle`] runs whatever is queued on the calling
//!   thread and returns.
//! - [`DeliveryQueue::run_until_settled`] blocks the calling thread, running
//!   jobs as they arrive, until one promise resolves.
//! - [`DeliveryQueue::spawn_thread`] hands the queue to a dedicated thread
//!   until the returned [`DeliveryThread`] is shut down.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use tributary::DeliveryQueue;
//!
//! let queue = DeliveryQueue::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..3 {
//!     let hits = Arc::clone(&hits);
//!     queue.dispatch(move || {
//!         hits.fetch_add(1, Ordering::SeqCst);
//!     });
//! }
//!
//! assert_eq!(hits.load(Ordering::SeqCst), 0);
//! assert_eq!(queue.run_until_idle().unwrap(), 3);
//! assert_eq!(hits.load(Ordering::SeqCst), 3);
//! ```

use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::executor::block_on;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;

use crate::{Outcome, Promise};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Deliver(Job),
    Stop,
}

thread_local! {
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as a queue driver for as long as it lives.
struct DrainGuard;

impl DrainGuard {
    fn enter() -> Result<Self, QueueError> {
        DRAINING.with(|draining| {
            if draining.replace(true) {
                Err(QueueError::Reentrant)
            } else {
                Ok(DrainGuard)
            }
        })
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}

/// Configuration for a [`DeliveryQueue`].
///
/// # Examples
///
/// ```
/// use tributary::QueueConfig;
///
/// let config = QueueConfig::default().with_thread_name("climate-delivery");
/// assert_eq!(config.thread_name(), "climate-delivery");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    thread_name: String,
}

impl QueueConfig {
    /// Name given to the thread started by [`DeliveryQueue::spawn_thread`].
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// The configured thread name.
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "tributary-delivery".to_string(),
        }
    }
}

/// Error returned by the queue drivers.
#[derive(Debug)]
pub enum QueueError {
    /// A driver was called from inside a delivery job.
    Reentrant,
    /// The queue is being drained by a [`DeliveryThread`].
    Detached,
    /// The queue can no longer receive jobs: its delivery thread panicked and
    /// took the queued jobs with it.
    Closed,
    /// The promise dispatches through a different queue.
    Foreign,
    /// The delivery thread could not be started.
    Spawn(io::Error),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Reentrant => write!(f, "delivery queue driven from inside a delivery job"),
            QueueError::Detached => write!(f, "delivery queue is owned by a delivery thread"),
            QueueError::Closed => write!(f, "delivery queue is closed"),
            QueueError::Foreign => write!(f, "promise belongs to a different delivery queue"),
            QueueError::Spawn(e) => write!(f, "failed to start delivery thread: {}", e),
        }
    }
}

impl StdError for QueueError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            QueueError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

struct Inner {
    config: QueueConfig,
    sender: UnboundedSender<Message>,
    receiver: Mutex<Option<UnboundedReceiver<Message>>>,
    pending: AtomicUsize,
    closed: AtomicBool,
}

impl Inner {
    fn send(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.unbounded_send(Message::Deliver(job)).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!(
                queue = %self.config.thread_name,
                "delivery queue closed, job dropped"
            );
        }
    }

    fn deliver(&self, job: Job) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        job();
    }

    /// Why the receiver slot is empty.
    fn unavailable(&self) -> QueueError {
        if self.closed.load(Ordering::Acquire) {
            QueueError::Closed
        } else {
            QueueError::Detached
        }
    }

    /// Delivery thread body. Puts the receiver back when stopped; a panicking
    /// job drops it and marks the queue closed.
    fn drive(&self, mut receiver: UnboundedReceiver<Message>) {
        DRAINING.with(|draining| draining.set(true));
        let _closing = ClosingGuard(self);
        tracing::debug!(thread = %self.config.thread_name, "delivery thread started");
        while let Some(message) = block_on(receiver.next()) {
            match message {
                Message::Deliver(job) => self.deliver(job),
                Message::Stop => break,
            }
        }
        tracing::debug!(thread = %self.config.thread_name, "delivery thread stopped");
        *self.receiver.lock() = Some(receiver);
    }
}

struct ClosingGuard<'a>(&'a Inner);

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.closed.store(true, Ordering::Release);
        }
    }
}

/// Non-owning handle held by promises, so queued jobs never keep their own
/// queue alive. Dispatching through a handle whose queue is gone drops the job.
#[derive(Clone)]
pub(crate) struct QueueRef {
    inner: Weak<Inner>,
}

impl QueueRef {
    pub(crate) fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match self.inner.upgrade() {
            Some(inner) => inner.send(Box::new(job)),
            None => tracing::warn!("delivery queue dropped, job dropped"),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<DeliveryQueue> {
        self.inner.upgrade().map(|inner| DeliveryQueue { inner })
    }

    pub(crate) fn refers_to(&self, queue: &DeliveryQueue) -> bool {
        ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&queue.inner))
    }
}

/// A handle to a serialized delivery queue.
///
/// Handles are cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct DeliveryQueue {
    inner: Arc<Inner>,
}

impl DeliveryQueue {
    /// Create a queue with the default configuration.
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    /// Create a queue with the given configuration.
    pub fn with_config(config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded();
        DeliveryQueue {
            inner: Arc::new(Inner {
                config,
                sender,
                receiver: Mutex::new(Some(receiver)),
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// The queue's configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Number of dispatched jobs that have not run yet.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    /// Whether two handles refer to the same queue.
    pub fn same_queue(&self, other: &DeliveryQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> QueueRef {
        QueueRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Append a job to the queue.
    ///
    /// The job never runs inline; it runs when a driver reaches it. If no
    /// driver can ever receive it (the delivery thread died) the job is dropped
    /// with a warning.
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.send(Box::new(job));
    }

    /// Run queued jobs on the calling thread until the queue is empty.
    ///
    /// Jobs dispatched by the jobs being run are run too. Returns the number of
    /// jobs that ran.
    pub fn run_until_idle(&self) -> Result<usize, QueueError> {
        let _guard = DrainGuard::enter()?;
        let mut slot = self.inner.receiver.lock();
        let receiver = slot.as_mut().ok_or_else(|| self.inner.unavailable())?;

        let mut ran = 0;
        while let Some(message) = receiver.next().now_or_never() {
            match message {
                Some(Message::Deliver(job)) => {
                    self.inner.deliver(job);
                    ran += 1;
                }
                Some(Message::Stop) => {}
                None => return Err(QueueError::Closed),
            }
        }
        tracing::trace!(ran, "delivery queue idle");
        Ok(ran)
    }

    /// Drive the queue on the calling thread until `promise` resolves.
    ///
    /// Blocks while waiting for producers on other threads to dispatch. A
    /// promise that is never resolved blocks forever.
    ///
    /// # Example
    ///
    /// ```
    /// use std::thread;
    /// use tributary::{DeliveryQueue, Outcome, Promise};
    ///
    /// let queue = DeliveryQueue::new();
    /// let promise = Promise::<u32, String>::new(&queue, |resolver| {
    ///     let resolver = resolver.clone();
    ///     thread::spawn(move || resolver.resolve(Outcome::success(7)));
    /// });
    ///
    /// let outcome = queue.run_until_settled(&promise).unwrap();
    /// assert_eq!(outcome, Outcome::Success(7));
    /// ```
    pub fn run_until_settled<T, E>(
        &self,
        promise: &Promise<T, E>,
    ) -> Result<Outcome<T, E>, QueueError>
    where
        T: Clone + Send + 'static,
        E: Clone + Send + 'static,
    {
        if !promise.delivers_through(self) {
            return Err(QueueError::Foreign);
        }
        let _guard = DrainGuard::enter()?;
        let mut slot = self.inner.receiver.lock();
        let receiver = slot.as_mut().ok_or_else(|| self.inner.unavailable())?;

        let settled = Arc::new(Mutex::new(None));
        {
            let settled = Arc::clone(&settled);
            promise.observe(move |outcome| *settled.lock() = Some(outcome));
        }

        loop {
            if let Some(outcome) = settled.lock().take() {
                return Ok(outcome);
            }
            match block_on(receiver.next()) {
                Some(Message::Deliver(job)) => self.inner.deliver(job),
                Some(Message::Stop) => {}
                None => return Err(QueueError::Closed),
            }
        }
    }

    /// Move the queue onto a dedicated thread.
    ///
    /// Until the returned guard is shut down, jobs run on that thread as soon
    /// as they are dispatched and the manual drivers return
    /// [`QueueError::Detached`]. If a job panics on that thread, the queued
    /// jobs are lost and every driver returns [`QueueError::Closed`] from then
    /// on.
    pub fn spawn_thread(&self) -> Result<DeliveryThread, QueueError> {
        let _guard = DrainGuard::enter()?;
        let receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .ok_or_else(|| self.inner.unavailable())?;

        let handoff = Arc::new(Mutex::new(Some(receiver)));
        let inner = Arc::clone(&self.inner);
        let thread_handoff = Arc::clone(&handoff);
        let spawned = thread::Builder::new()
            .name(self.inner.config.thread_name.clone())
            .spawn(move || {
                let receiver = thread_handoff.lock().take();
                if let Some(receiver) = receiver {
                    inner.drive(receiver);
                }
            });

        match spawned {
            Ok(handle) => Ok(DeliveryThread {
                queue: self.clone(),
                handle: Some(handle),
            }),
            Err(e) => {
                *self.inner.receiver.lock() = handoff.lock().take();
                Err(QueueError::Spawn(e))
            }
        }
    }
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("thread_name", &self.inner.config.thread_name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Guard for a queue being drained by a dedicated thread.
///
/// Dropping the guard (or calling [`shutdown`](DeliveryThread::shutdown))
/// lets the thread finish the jobs queued so far, stops it, and returns the
/// queue to manual driving.
pub struct DeliveryThread {
    queue: DeliveryQueue,
    handle: Option<JoinHandle<()>>,
}

impl DeliveryThread {
    /// The queue this thread drains.
    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.queue.inner.sender.unbounded_send(Message::Stop);
        if handle.thread().id() == thread::current().id() {
            tracing::warn!("delivery thread stopped from one of its own jobs");
            return;
        }
        if handle.join().is_err() {
            tracing::warn!(
                thread = %self.queue.inner.config.thread_name,
                "delivery thread panicked, queue closed"
            );
        }
    }
}

impl Drop for DeliveryThread {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DeliveryThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryThread")
            .field("queue", &self.queue)
            .field("running", &self.handle.is_some())
            .finish()
    }
}
