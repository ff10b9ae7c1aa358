//! Railway-oriented outcome type
//!
//! This module provides `Outcome`, a two-track value that is either a success
//! or an opaque failure. Every promise in this crate resolves to an `Outcome`,
//! and the combinators here are the synchronous half of the railway: `map` and
//! `and_then` run only on the success track, while a failure passes through
//! untouched.
//!
//! # Examples
//!
//! ## Staying on the success track
//!
//! ```
//! use tributary::Outcome;
//!
//! let parsed = Outcome::<_, String>::success("42")
//!     .and_then(|s| Outcome::from_fallible(|| s.parse::<i32>().map_err(|e| e.to_string())))
//!     .map(|n| n * 2);
//!
//! assert_eq!(parsed, Outcome::Success(84));
//! ```
//!
//! ## Short-circuiting on failure
//!
//! ```
//! use tributary::Outcome;
//!
//! let mut calls = 0;
//! let result = Outcome::<i32, _>::failure("no payload").map(|n| {
//!     calls += 1;
//!     n + 1
//! });
//!
//! assert_eq!(result, Outcome::Failure("no payload"));
//! assert_eq!(calls, 0);
//! ```

use std::panic::{self, AssertUnwindSafe};

use crate::Fault;

/// A value that is either a success or a failure.
///
/// `Outcome` never accumulates errors: the first failure wins and everything
/// downstream is skipped.
///
/// The error type `E` is left open. Any value can travel on the failure track;
/// [`Fault`] is provided for callers that just want a message with context.
///
/// # Examples
///
/// ```
/// use tributary::Outcome;
///
/// let found = Outcome::from_option(Some(3), "missing");
/// let missing = Outcome::<i32, _>::from_option(None, "missing");
///
/// assert_eq!(found, Outcome::Success(3));
/// assert_eq!(missing, Outcome::Failure("missing"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome<T, E> {
    /// The computation produced a value
    Success(T),
    /// The computation failed with an error
    Failure(E),
}

impl<T, E> Outcome<T, E> {
    /// Create a successful outcome
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// let o = Outcome::<i32, String>::success(42);
    /// assert!(o.is_success());
    /// ```
    #[inline]
    pub fn success(value: T) -> Self {
        Outcome::Success(value)
    }

    /// Create a failed outcome
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// let o = Outcome::<i32, &str>::failure("bad");
    /// assert!(o.is_failure());
    /// ```
    #[inline]
    pub fn failure(error: E) -> Self {
        Outcome::Failure(error)
    }

    /// Create an outcome from an optional value, using `or` when it is absent.
    #[inline]
    pub fn from_option(value: Option<T>, or: E) -> Self {
        match value {
            Some(value) => Outcome::Success(value),
            None => Outcome::Failure(or),
        }
    }

    /// Run a fallible computation and capture its error on the failure track.
    ///
    /// The error is converted with `Into`, so a computation failing with
    /// `&str` can feed an `Outcome<T, Fault>` directly.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::{Fault, Outcome};
    ///
    /// let o: Outcome<i32, Fault> =
    ///     Outcome::from_fallible(|| "12".parse::<i32>().map_err(Fault::from_error));
    /// assert_eq!(o.ok(), Some(12));
    ///
    /// let o: Outcome<i32, Fault> = Outcome::from_fallible(|| Err("Couldn't parse data"));
    /// assert!(o.is_failure());
    /// ```
    pub fn from_fallible<F, E2>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, E2>,
        E2: Into<E>,
    {
        match f() {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error.into()),
        }
    }

    /// Lift a fallible function into one that returns an `Outcome`.
    ///
    /// Handy as the argument to `map`-like APIs that expect a plain function.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::{Fault, Outcome};
    ///
    /// let parse = Outcome::<i32, Fault>::wrap(|s: &str| {
    ///     s.trim().parse::<i32>().map_err(Fault::from_error)
    /// });
    ///
    /// assert_eq!(parse(" 7 ").ok(), Some(7));
    /// assert!(parse("x").is_failure());
    /// ```
    pub fn wrap<A, F, E2>(f: F) -> impl Fn(A) -> Outcome<T, E>
    where
        F: Fn(A) -> Result<T, E2>,
        E2: Into<E>,
    {
        move |a| Outcome::from_fallible(|| f(a))
    }

    /// Create an outcome from a `Result`
    #[inline]
    pub fn from_result(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(error) => Outcome::Failure(error),
        }
    }

    /// Convert this outcome into a `Result`
    #[inline]
    pub fn into_result(self) -> Result<T, E> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }

    /// Check if this outcome is a success
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Check if this outcome is a failure
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure(_))
    }

    /// The success value, if any.
    #[inline]
    pub fn ok(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The error, if any.
    #[inline]
    pub fn err(self) -> Option<E> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    /// Borrow the contents of this outcome.
    #[inline]
    pub fn as_ref(&self) -> Outcome<&T, &E> {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Transform the success value. `f` is never called on a failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// let o = Outcome::<_, String>::success(5).map(|x| x * 2);
    /// assert_eq!(o, Outcome::Success(10));
    /// ```
    #[inline]
    pub fn map<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Transform the error. `f` is never called on a success.
    #[inline]
    pub fn map_err<E2, F>(self, f: F) -> Outcome<T, E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            Outcome::Success(value) => Outcome::Success(value),
            Outcome::Failure(error) => Outcome::Failure(f(error)),
        }
    }

    /// Chain a computation that can itself fail.
    ///
    /// This is the monadic bind (`flatMap`): the first failure short-circuits
    /// and `f` is never invoked.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// fn half(n: i32) -> Outcome<i32, &'static str> {
    ///     if n % 2 == 0 {
    ///         Outcome::success(n / 2)
    ///     } else {
    ///         Outcome::failure("odd")
    ///     }
    /// }
    ///
    /// assert_eq!(Outcome::success(8).and_then(half), Outcome::Success(4));
    /// assert_eq!(Outcome::success(3).and_then(half), Outcome::Failure("odd"));
    /// ```
    #[doc(alias = "flat_map")]
    #[inline]
    pub fn and_then<U, F>(self, f: F) -> Outcome<U, E>
    where
        F: FnOnce(T) -> Outcome<U, E>,
    {
        match self {
            Outcome::Success(value) => f(value),
            Outcome::Failure(error) => Outcome::Failure(error),
        }
    }

    /// Observe the error without changing the outcome.
    ///
    /// `handler` runs only on the failure track. The outcome is returned as-is
    /// so the call can sit in the middle of a chain.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// let mut seen = Vec::new();
    /// let o = Outcome::<i32, _>::failure("status 404").on_error(|e| seen.push(*e));
    ///
    /// assert!(o.is_failure());
    /// assert_eq!(seen, vec!["status 404"]);
    /// ```
    #[inline]
    pub fn on_error<F>(self, handler: F) -> Self
    where
        F: FnOnce(&E),
    {
        if let Outcome::Failure(error) = &self {
            handler(error);
        }
        self
    }
}

impl<T> Outcome<T, Fault> {
    /// Run a computation, capturing a panic as a [`Fault`].
    ///
    /// The panic payload becomes the fault message when it is a string.
    ///
    /// # Examples
    ///
    /// ```
    /// use tributary::Outcome;
    ///
    /// let o = Outcome::catching(|| -> i32 { panic!("decoder blew up") });
    /// assert_eq!(o.err().map(|f| f.message().to_string()), Some("decoder blew up".to_string()));
    /// ```
    pub fn catching<F>(f: F) -> Self
    where
        F: FnOnce() -> T,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Outcome::Success(value),
            Err(payload) => Outcome::Failure(Fault::from_panic(payload)),
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        Outcome::from_result(result)
    }
}

impl<T, E> From<Outcome<T, E>> for Result<T, E> {
    fn from(outcome: Outcome<T, E>) -> Self {
        outcome.into_result()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn outcome_strategy() -> impl Strategy<Value = Outcome<i32, String>> {
        prop_oneof![
            any::<i32>().prop_map(Outcome::success),
            ".*".prop_map(Outcome::failure),
        ]
    }

    proptest! {
        #[test]
        fn map_identity(o in outcome_strategy()) {
            prop_assert_eq!(o.clone().map(|x| x), o);
        }

        #[test]
        fn map_composition(o in outcome_strategy()) {
            let f = |x: i32| x.wrapping_mul(3);
            let g = |x: i32| x.wrapping_sub(7);
            prop_assert_eq!(o.clone().map(f).map(g), o.map(|x| g(f(x))));
        }

        #[test]
        fn and_then_left_identity(x in any::<i32>()) {
            let f = |n: i32| if n % 2 == 0 {
                Outcome::success(n / 2)
            } else {
                Outcome::failure(format!("{} is odd", n))
            };
            prop_assert_eq!(Outcome::<_, String>::success(x).and_then(f), f(x));
        }

        #[test]
        fn and_then_right_identity(o in outcome_strategy()) {
            prop_assert_eq!(o.clone().and_then(Outcome::success), o);
        }

        #[test]
        fn result_conversion_preserves_track(o in outcome_strategy()) {
            prop_assert_eq!(Outcome::from_result(o.clone().into_result()), o);
        }
    }
}
