//! Core Sort Types, Identifiers, and Tuning Constants
//!
//! This module defines the **fundamental vocabulary** shared by every layer of
//! the sort engine: primitive element kinds, ordering directions, backend
//! identifiers, strategy identifiers, and the per-call phase machine.
//!
//! ## Design Philosophy
//!
//! The engine is designed around:
//!
//! - **Small, copyable identifiers** that can be hashed into cache keys,
//! - **Pure descriptors** of element and comparator identity,
//! - **Explicit constants** for every tile, digit, and workgroup width.
//!
//! None of the types here own data or touch a backend. They are passed by
//! value between the dispatcher, the backends, and the artifact cache.
//!
//! ## Identity
//!
//! Element and comparator identity is always the Rust [`TypeId`]. Two
//! comparator *instances* of the same type are the same comparator; two
//! different comparator *types* are different even if they implement the same
//! relation.

use std::any::{type_name, TypeId};
use std::fmt;

/// Number of invocations per GPU workgroup.
///
/// All kernels in this crate are compiled with this workgroup size and every
/// radix tile covers exactly this many elements.
pub const GPU_WORKGROUP_SIZE: u32 = 256;

/// Number of key bits consumed by one GPU radix pass.
pub const GPU_RADIX_BITS: u32 = 4;

/// Number of buckets per GPU radix pass (`2^GPU_RADIX_BITS`).
pub const GPU_RADIX_BUCKETS: u32 = 1 << GPU_RADIX_BITS;

/// Maximum number of workgroups in one dispatch dimension.
pub const GPU_MAX_WORKGROUPS: u32 = 65_535;

/// Number of key bits consumed by one CPU radix pass.
pub const CPU_RADIX_BITS: u32 = 8;

/// Number of buckets per CPU radix pass (`2^CPU_RADIX_BITS`).
pub const CPU_RADIX_BUCKETS: usize = 1 << CPU_RADIX_BITS;

/// Default length below which every backend falls back to insertion sort.
pub const DEFAULT_SERIAL_THRESHOLD: usize = 32;

/// Built-in numeric element kinds.
///
/// A kind determines the width of the radix key, whether the element can live
/// in a device buffer, and how raw device words are turned into sortable keys.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `u64`
    U64,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `i64`
    I64,
    /// `f32`
    F32,
    /// `f64`
    F64,
}

impl PrimitiveKind {
    /// Width of the element (and its radix key) in bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        match self {
            PrimitiveKind::U8 | PrimitiveKind::I8 => 8,
            PrimitiveKind::U16 | PrimitiveKind::I16 => 16,
            PrimitiveKind::U32 | PrimitiveKind::I32 | PrimitiveKind::F32 => 32,
            PrimitiveKind::U64 | PrimitiveKind::I64 | PrimitiveKind::F64 => 64,
        }
    }

    /// Number of 32-bit words one key occupies on the GPU.
    #[inline]
    pub const fn key_words(self) -> u32 {
        if self.bits() > 32 { 2 } else { 1 }
    }

    /// Returns `true` if the element can be stored directly in a device buffer.
    ///
    /// Device buffers are addressed in 4-byte units, so narrow integers only
    /// reach the GPU as widened keys.
    #[inline]
    pub const fn device_storable(self) -> bool {
        self.bits() >= 32
    }

    /// Returns `true` for IEEE-754 kinds.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, PrimitiveKind::F32 | PrimitiveKind::F64)
    }

    /// Returns `true` for two's-complement signed kinds.
    #[inline]
    pub const fn is_signed_integer(self) -> bool {
        matches!(
            self,
            PrimitiveKind::I8 | PrimitiveKind::I16 | PrimitiveKind::I32 | PrimitiveKind::I64
        )
    }

    /// Canonical lowercase name, used in artifact labels.
    pub const fn name(self) -> &'static str {
        match self {
            PrimitiveKind::U8 => "u8",
            PrimitiveKind::U16 => "u16",
            PrimitiveKind::U32 => "u32",
            PrimitiveKind::U64 => "u64",
            PrimitiveKind::I8 => "i8",
            PrimitiveKind::I16 => "i16",
            PrimitiveKind::I32 => "i32",
            PrimitiveKind::I64 => "i64",
            PrimitiveKind::F32 => "f32",
            PrimitiveKind::F64 => "f64",
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordering direction of a canonical comparator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Natural order (`a < b`).
    Ascending,
    /// Strict reverse of natural order (`a > b`).
    Descending,
}

impl Direction {
    /// Returns the opposite direction.
    #[inline]
    pub const fn reversed(self) -> Self {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

/// Backend family an execution context runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// GPU command queue (`wgpu`).
    Gpu,
    /// Fixed-size CPU worker pool (`rayon`).
    MultiCore,
    /// Calling thread only.
    Serial,
}

impl BackendKind {
    /// Returns `true` for backends that execute generated code and therefore
    /// require registered element types and comparators.
    #[inline]
    pub const fn is_gpu_class(self) -> bool {
        matches!(self, BackendKind::Gpu)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Gpu => "gpu",
            BackendKind::MultiCore => "multicore",
            BackendKind::Serial => "serial",
        })
    }
}

/// Sort algorithm chosen by the dispatcher for one call.
///
/// ## Invariants
/// * `GpuRadix` and `GpuBitonic` are only produced for [`BackendKind::Gpu`].
/// * `ParallelRadix` and `ParallelComparison` are only produced for
///   [`BackendKind::MultiCore`].
/// * `Noop` is produced for lengths `0` and `1` on every backend.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Nothing to do.
    Noop,
    /// Serial insertion sort for lengths below the configured threshold.
    SmallSerial,
    /// Serial pattern-defeating quicksort driven by the comparator.
    SerialComparison,
    /// Parallel MSD-partitioned LSD radix sort on the worker pool.
    ParallelRadix,
    /// Parallel comparison sort on the worker pool.
    ParallelComparison,
    /// Device-side LSD radix sort over order-preserving keys.
    GpuRadix,
    /// Device-side bitonic network driven by the generated comparator.
    GpuBitonic,
}

impl Strategy {
    /// Returns `true` if the strategy executes device code.
    #[inline]
    pub const fn is_gpu(self) -> bool {
        matches!(self, Strategy::GpuRadix | Strategy::GpuBitonic)
    }

    /// Short name used in logs and artifact labels.
    pub const fn name(self) -> &'static str {
        match self {
            Strategy::Noop => "noop",
            Strategy::SmallSerial => "small_serial",
            Strategy::SerialComparison => "serial_comparison",
            Strategy::ParallelRadix => "parallel_radix",
            Strategy::ParallelComparison => "parallel_comparison",
            Strategy::GpuRadix => "gpu_radix",
            Strategy::GpuBitonic => "gpu_bitonic",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-call state of the sort façade.
///
/// ```text
/// Idle -> Validating -> BackendResolved -> [ArtifactResolved] -> Dispatching -> Completed
///                 \______________\_________________\_______________\-> Failed
/// ```
///
/// `ArtifactResolved` is only visited by GPU-class backends.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortPhase {
    /// Call accepted, nothing inspected yet.
    Idle,
    /// Checking length, layout, and context health.
    Validating,
    /// Strategy chosen for the context's backend.
    BackendResolved,
    /// Registration checked and compiled artifacts available.
    ArtifactResolved,
    /// Backend is running the strategy.
    Dispatching,
    /// Sequence fully sorted.
    Completed,
    /// Call failed; sequence untouched.
    Failed,
}

/// Identity of an element type as seen by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementInfo {
    /// Runtime type identity.
    pub type_id: TypeId,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Built-in numeric kind, `None` for aggregates.
    pub primitive: Option<PrimitiveKind>,

    /// `size_of::<T>()`.
    pub size: usize,
}

impl ElementInfo {
    /// Builds the descriptor for `T`.
    #[inline]
    pub fn of<T: crate::engine::element::SortElement>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            primitive: T::PRIMITIVE,
            size: std::mem::size_of::<T>(),
        }
    }
}

/// Identity of a comparator type as seen by the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComparatorInfo {
    /// Runtime type identity of the comparator.
    pub type_id: TypeId,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Set for the canonical natural/reverse comparators.
    pub direction: Option<Direction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_words_follow_width() {
        assert_eq!(PrimitiveKind::U8.key_words(), 1);
        assert_eq!(PrimitiveKind::F32.key_words(), 1);
        assert_eq!(PrimitiveKind::I64.key_words(), 2);
        assert_eq!(PrimitiveKind::F64.key_words(), 2);
    }

    #[test]
    fn narrow_kinds_are_not_device_storable() {
        assert!(!PrimitiveKind::U8.device_storable());
        assert!(!PrimitiveKind::I16.device_storable());
        assert!(PrimitiveKind::U32.device_storable());
        assert!(PrimitiveKind::F64.device_storable());
    }

    #[test]
    fn gpu_radix_passes_are_even_for_every_kind() {
        for kind in [
            PrimitiveKind::U8,
            PrimitiveKind::U16,
            PrimitiveKind::U32,
            PrimitiveKind::U64,
            PrimitiveKind::F64,
        ] {
            assert_eq!((kind.bits() / GPU_RADIX_BITS) % 2, 0, "{kind}");
        }
    }
}
