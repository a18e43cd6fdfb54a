//! Error types for sort execution, registration, and device transfers.
//!
//! This module declares the single error enum returned by every public
//! operation of the engine. Each variant models one failure mode and carries
//! enough context (type names, backend, byte counts) to make logs actionable.
//!
//! ## Goals
//! * **Specificity:** one variant per failure mode, no catch-all strings for
//!   conditions the caller can act on.
//! * **Stickiness:** [`SortError`] is `Clone + PartialEq` so a context can
//!   store the first [`SortError::BackendUnavailable`] it observed and return
//!   it again on every later call.
//! * **Untouched data:** every error is raised before the caller's sequence is
//!   written, so a failed call never leaves partially sorted data behind.
//!
//! ## Handling at the boundary
//! ```ignore
//! match hetsort::sort(&mut values) {
//!     Ok(()) => {}
//!     Err(SortError::UnregisteredType { type_name }) => {
//!         eprintln!("register {type_name} before sorting it on the GPU");
//!     }
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use std::sync::PoisonError;

use thiserror::Error;

use crate::engine::types::BackendKind;

/// Convenience alias used across the crate.
pub type SortResult<T> = Result<T, SortError>;

/// Every failure the sort engine can report.
///
/// ## Display vs. Debug
/// * `Display` is short and suitable for operator logs.
/// * `Debug` (derived) keeps the full structure.

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SortError {
    /// The requested backend cannot be initialised, or a device was lost
    /// while a job was in flight. Sticky for the context that observed it.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        /// Backend that could not be used.
        backend: BackendKind,
        /// Adapter or device message.
        reason: String,
    },

    /// The element type was never registered but the backend needs generated
    /// code for it.
    #[error("element type `{type_name}` is not registered for device code generation")]
    UnregisteredType {
        /// Rust type name of the element.
        type_name: &'static str,
    },

    /// The comparator has no device representation for this element type.
    #[error("comparator `{comparator}` is not supported for element type `{type_name}` on this backend")]
    UnsupportedComparator {
        /// Rust type name of the element.
        type_name: &'static str,
        /// Rust type name of the comparator.
        comparator: &'static str,
    },

    /// Generated device code failed to compile or validate.
    #[error("failed to compile `{label}`: {message}")]
    CompilationFailure {
        /// Artifact label (element, comparator, strategy).
        label: String,
        /// Compiler diagnostic.
        message: String,
    },

    /// The device rejected commands recorded for a sort (a validation error
    /// raised while encoding or submitting, not while compiling).
    #[error("device rejected `{operation}`: {message}")]
    DeviceValidation {
        /// Operation whose commands were rejected.
        operation: String,
        /// Validation message reported by the device.
        message: String,
    },

    /// Moving data between host and device failed.
    #[error("host/device transfer failed: {0}")]
    TransferFailure(String),

    /// A type or comparator descriptor was rejected.
    #[error("invalid registration for `{name}`: {reason}")]
    InvalidRegistration {
        /// Canonical name of the offending descriptor.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The element type cannot be laid out in the requested memory domain.
    #[error("element type `{type_name}` ({size} bytes) cannot be stored in a device buffer: {reason}")]
    InvalidLayout {
        /// Rust type name of the element.
        type_name: &'static str,
        /// `size_of::<T>()`.
        size: usize,
        /// Layout requirement that failed.
        reason: &'static str,
    },

    /// The sequence does not fit the device limits for this strategy.
    #[error("{len} elements exceed the device limit of {limit} for this sort")]
    CapacityExceeded {
        /// Requested length.
        len: usize,
        /// Largest supported length.
        limit: usize,
    },

    /// An element access on a device vector was out of range.
    #[error("index {index} out of range for device vector of length {len}")]
    IndexOutOfBounds {
        /// Requested index (or range end).
        index: usize,
        /// Length of the vector.
        len: usize,
    },

    /// A [`SortConfig`](crate::engine::config::SortConfig) value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An internal invariant was violated: a poisoned lock, or a strategy or
    /// artifact that does not match the backend executing it.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SortError {
    /// Returns `true` if this error permanently disables the context that
    /// produced it.
    #[inline]
    pub fn is_sticky(&self) -> bool {
        matches!(self, SortError::BackendUnavailable { .. })
    }

    pub(crate) fn backend_unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        SortError::BackendUnavailable { backend, reason: reason.into() }
    }

    pub(crate) fn invalid_registration(name: impl Into<String>, reason: impl Into<String>) -> Self {
        SortError::InvalidRegistration { name: name.into(), reason: reason.into() }
    }
}

impl<T> From<PoisonError<T>> for SortError {
    fn from(_: PoisonError<T>) -> Self {
        SortError::Internal("lock poisoned".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_loss_is_sticky() {
        assert!(SortError::backend_unavailable(BackendKind::Gpu, "lost").is_sticky());
        assert!(!SortError::TransferFailure("map".into()).is_sticky());
        assert!(!SortError::UnregisteredType { type_name: "Foo" }.is_sticky());
    }

    #[test]
    fn device_validation_is_distinct_from_internal_errors() {
        let e = SortError::DeviceValidation { operation: "radix sort".into(), message: "bad binding".into() };
        assert!(!e.is_sticky());
        assert!(e.to_string().contains("radix sort"));
        let poisoned: SortError = PoisonError::new(()).into();
        assert!(matches!(poisoned, SortError::Internal(_)));
        assert_ne!(e, poisoned);
    }

    #[test]
    fn display_names_the_type() {
        let e = SortError::UnsupportedComparator { type_name: "Pair", comparator: "ByKey" };
        let text = e.to_string();
        assert!(text.contains("Pair"));
        assert!(text.contains("ByKey"));
    }
}
