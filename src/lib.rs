//! # hetsort
//!
//! Heterogeneous in-place sorting over GPU, multicore, and serial backends.
//!
//! ## Design Goals
//! - One call shape for every backend and memory domain
//! - Radix sorts for built-in numerics, comparison networks for everything else
//! - Device code generated from registered WGSL fragments, compiled once
//! - Failed calls never leave partially sorted data behind
//!
//! ## Quick start
//! ```rust
//! use hetsort::prelude::*;
//!
//! let ctx = Context::new(BackendHint::MultiCore)?;
//! let mut values = vec![3.5f64, -1.0, 2.0];
//! ctx.sort_by(&mut values, Greater)?;
//! assert_eq!(values, [3.5, 2.0, -1.0]);
//! # Ok::<(), hetsort::SortError>(())
//! ```
//!
//! This crate builds as both:
//! - `rlib` (for Rust usage & integration tests)
//! - `cdylib` (for FFI / DLL usage)

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

#[cfg(feature = "gpu")]
pub mod gpu;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

// Entry points

pub use engine::sort::{
    sort,
    sort_by,
    sort_raw_parts,
};

pub use engine::context::{
    BackendHint,
    Context,
};

pub use engine::config::SortConfig;

pub use engine::error::{
    SortError,
    SortResult,
};

// Elements, comparators, sequences

pub use engine::element::SortElement;

pub use engine::comparator::{
    Comparator,
    Greater,
    Less,
};

pub use engine::sequence::{
    MemoryDomain,
    Sequence,
    SortTarget,
};

// Device code generation

pub use engine::registry::{
    ComparatorDescriptor,
    TypeDescriptor,
    is_comparator_registered,
    is_type_registered,
    register_comparator,
    register_type,
    type_descriptor_of,
};

// Dispatch

pub use engine::dispatch::{
    SortBackend,
    select_strategy,
};

pub use engine::types::{
    BackendKind,
    ComparatorInfo,
    Direction,
    ElementInfo,
    PrimitiveKind,
    SortPhase,
    Strategy,
};

#[cfg(feature = "gpu")]
pub use gpu::{
    DeviceVector,
    GpuDevice,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude (Optional but recommended)
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used sort types.
///
/// Import with:
/// ```rust
/// use hetsort::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        BackendHint,
        Comparator,
        ComparatorDescriptor,
        Context,
        Greater,
        Less,
        SortConfig,
        SortElement,
        SortError,
        SortResult,
        SortTarget,
        TypeDescriptor,
        register_comparator,
        register_type,
        sort,
        sort_by,
    };

    #[cfg(feature = "gpu")]
    pub use crate::DeviceVector;
}
