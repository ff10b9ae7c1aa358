//! A ready-made opaque error with a context trail
//!
//! Promises and outcomes accept any error type. `Fault` is for callers that do
//! not want to design one: it carries a message, an optional underlying
//! `std::error::Error`, and a trail of context messages added as the failure
//! travels outward.
//!
//! # Examples
//!
//! ```
//! use tributary::Fault;
//!
//! let fault = Fault::new("Status Code: 404")
//!     .context("loading 1960-1")
//!     .context("importing batch");
//!
//! assert_eq!(fault.message(), "Status Code: 404");
//! assert_eq!(fault.context_trail(), &["loading 1960-1", "importing batch"]);
//! ```

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// An opaque, cloneable error value.
///
/// Clones share the underlying source error, so a single failure can be
/// delivered to any number of observers.
///
/// # Examples
///
/// ```
/// use tributary::Fault;
///
/// let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
/// let fault = Fault::from_error(io).context("reading legend");
///
/// println!("{}", fault);
/// // Output:
/// // no such file
/// //   -> reading legend
/// ```
#[derive(Clone)]
pub struct Fault {
    message: String,
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    context: Vec<String>,
}

impl Fault {
    /// Create a fault from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Fault {
            message: message.into(),
            source: None,
            context: Vec::new(),
        }
    }

    /// Create a fault wrapping an existing error.
    ///
    /// The error's `Display` output becomes the message and the error itself
    /// is kept as the `source`.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Fault {
            message: error.to_string(),
            source: Some(Arc::new(error)),
            context: Vec::new(),
        }
    }

    /// Create a fault from a panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "computation panicked".to_string()
        };
        Fault::new(message)
    }

    /// Add a context layer.
    ///
    /// Context messages are kept in the order they are added, innermost first.
    pub fn context(mut self, msg: impl Into<String>) -> Self {
        self.context.push(msg.into());
        self
    }

    /// The fault message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The context trail, innermost first.
    pub fn context_trail(&self) -> &[String] {
        &self.context
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message)
            .field("has_source", &self.source.is_some())
            .field("context", &self.context)
            .finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for ctx in &self.context {
            write!(f, "\n  -> {}", ctx)?;
        }
        Ok(())
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Faults compare by message and context; the source is not compared.
impl PartialEq for Fault {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.context == other.context
    }
}

impl Eq for Fault {}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Fault::new(message)
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Fault::new(message)
    }
}
