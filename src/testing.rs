//! Testing utilities for outcomes and promises
//!
//! The assertion macros unwrap the expected track of an
//! [`Outcome`](crate::Outcome) and evaluate to it, so a test can keep
//! checking the value. [`assert_fault!`](crate::assert_fault) checks a
//! [`Fault`](crate::Fault) by message and context trail.
//!
//! Behind the `proptest` feature, `Outcome` and `Fault` implement
//! `Arbitrary`.
//!
//! # Examples
//!
//! ```rust
//! use tributary::{assert_failure_eq, assert_fault, assert_success, Fault, Outcome};
//!
//! let rows = assert_success!(Outcome::<_, String>::success(vec![1960, 1961]));
//! assert_eq!(rows.len(), 2);
//!
//! assert_failure_eq!(Outcome::<i32, _>::failure("No data"), "No data");
//!
//! let missing = Outcome::<i32, _>::failure(Fault::new("Status Code: 404").context("1960-01"));
//! assert_fault!(missing, "Status Code: 404", ["1960-01"]);
//! ```

/// Assert that an outcome is a success and evaluate to its value.
///
/// Panics with the error if the outcome is a `Failure`.
#[macro_export]
macro_rules! assert_success {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Success(value) => value,
            $crate::Outcome::Failure(e) => {
                panic!("Expected Success, got Failure: {:?}", e)
            }
        }
    };
}

/// Assert that an outcome is a failure and evaluate to its error.
///
/// Panics with the value if the outcome is a `Success`.
#[macro_export]
macro_rules! assert_failure {
    ($outcome:expr) => {
        match $outcome {
            $crate::Outcome::Failure(error) => error,
            $crate::Outcome::Success(v) => {
                panic!("Expected Failure, got Success: {:?}", v)
            }
        }
    };
}

/// Assert that an outcome failed with a specific error.
#[macro_export]
macro_rules! assert_failure_eq {
    ($outcome:expr, $expected:expr) => {{
        let error = $crate::assert_failure!($outcome);
        assert_eq!(error, $expected);
    }};
}

/// Assert that an outcome failed with a [`Fault`](crate::Fault) carrying the
/// given message and, optionally, exactly the given context trail (innermost
/// first). The source is not checked.
#[macro_export]
macro_rules! assert_fault {
    ($outcome:expr, $message:expr) => {{
        let fault: $crate::Fault = $crate::assert_failure!($outcome);
        assert_eq!(fault.message(), $message, "fault message: {}", fault);
    }};
    ($outcome:expr, $message:expr, [$($context:expr),* $(,)?]) => {{
        let fault: $crate::Fault = $crate::assert_failure!($outcome);
        assert_eq!(fault.message(), $message, "fault message: {}", fault);
        let expected: &[&str] = &[$($context),*];
        assert_eq!(fault.context_trail(), expected, "fault context: {}", fault);
    }};
}

#[cfg(feature = "proptest")]
mod arbitrary {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use crate::{Fault, Outcome};

    impl<T, E> Arbitrary for Outcome<T, E>
    where
        T: Arbitrary + 'static,
        E: Arbitrary + 'static,
    {
        type Parameters = (T::Parameters, E::Parameters);
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((values, errors): Self::Parameters) -> Self::Strategy {
            prop_oneof![
                any_with::<T>(values).prop_map(Outcome::Success),
                any_with::<E>(errors).prop_map(Outcome::Failure),
            ]
            .boxed()
        }
    }

    /// Faults with a short message and up to three context layers.
    impl Arbitrary for Fault {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            ("[A-Za-z][A-Za-z0-9 :]{0,23}", vec("[a-z0-9-]{1,12}", 0..=3))
                .prop_map(|(message, trail)| {
                    trail.into_iter().fold(Fault::new(message), Fault::context)
                })
                .boxed()
        }
    }
}
