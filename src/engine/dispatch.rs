//! # Algorithm Dispatch
//!
//! Strategy selection and the backend capability interface.
//!
//! ## Strategy table
//!
//! | length | backend | element / comparator | strategy |
//! |---|---|---|---|
//! | `0..=1` | any | any | [`Strategy::Noop`] |
//! | `< serial_threshold` | any | any | [`Strategy::SmallSerial`] |
//! | otherwise | serial | any | [`Strategy::SerialComparison`] |
//! | otherwise | multicore | numeric + canonical | [`Strategy::ParallelRadix`] |
//! | otherwise | multicore | anything else | [`Strategy::ParallelComparison`] |
//! | otherwise | gpu | numeric + canonical | [`Strategy::GpuRadix`] |
//! | otherwise | gpu | anything else | [`Strategy::GpuBitonic`] |
//!
//! "numeric + canonical" means a built-in [`PrimitiveKind`] sorted by a
//! comparator that reports a [`Direction`]. The table is a pure function of
//! its inputs; every strategy produces the same ordering up to the relative
//! order of equivalent elements.
//!
//! [`PrimitiveKind`]: crate::engine::types::PrimitiveKind
//! [`Direction`]: crate::engine::types::Direction

use crate::engine::comparator::Comparator;
use crate::engine::config::SortConfig;
use crate::engine::element::SortElement;
use crate::engine::error::SortResult;
use crate::engine::sequence::Sequence;
use crate::engine::types::{BackendKind, ComparatorInfo, ElementInfo, Strategy};

/// Chooses the algorithm for one call.
pub fn select_strategy(
    element: &ElementInfo,
    comparator: &ComparatorInfo,
    len: usize,
    backend: BackendKind,
    config: &SortConfig,
) -> Strategy {
    if len <= 1 {
        return Strategy::Noop;
    }
    if len < config.serial_threshold {
        return Strategy::SmallSerial;
    }

    let keyed = element.primitive.is_some() && comparator.direction.is_some();
    match (backend, keyed) {
        (BackendKind::Serial, _) => Strategy::SerialComparison,
        (BackendKind::MultiCore, true) => Strategy::ParallelRadix,
        (BackendKind::MultiCore, false) => Strategy::ParallelComparison,
        (BackendKind::Gpu, true) => Strategy::GpuRadix,
        (BackendKind::Gpu, false) => Strategy::GpuBitonic,
    }
}

/// Capability interface implemented once per backend.
///
/// A sort call moves through three steps: choose a [`Strategy`], resolve the
/// backend-specific artifacts it needs, then execute. Only GPU-class backends
/// have non-trivial artifacts; CPU backends use `()`.

pub trait SortBackend {
    /// Compiled state handed from resolution to execution.
    type Artifacts;

    /// Backend family.
    fn kind(&self) -> BackendKind;

    /// Chooses the strategy for one call.
    fn resolve_strategy(
        &self,
        element: &ElementInfo,
        comparator: &ComparatorInfo,
        len: usize,
        config: &SortConfig,
    ) -> Strategy {
        select_strategy(element, comparator, len, self.kind(), config)
    }

    /// Validates registration and obtains compiled artifacts for `strategy`.
    ///
    /// Must not touch the sequence's data.
    fn resolve_artifacts<T: SortElement>(
        &self,
        element: &ElementInfo,
        comparator: &ComparatorInfo,
        strategy: Strategy,
        sequence: &Sequence<'_, T>,
        config: &SortConfig,
    ) -> SortResult<Self::Artifacts>;

    /// Runs `strategy` over `sequence`, blocking until it is complete.
    fn execute<T: SortElement, C: Comparator<T>>(
        &self,
        sequence: Sequence<'_, T>,
        comparator: &C,
        strategy: Strategy,
        artifacts: Self::Artifacts,
        config: &SortConfig,
    ) -> SortResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::comparator::{comparator_info, Greater, Less};

    #[derive(Clone, Copy, PartialEq, PartialOrd)]
    struct Point {
        x: f32,
    }
    impl SortElement for Point {}

    fn pick<T: SortElement, C: Comparator<T>>(cmp: &C, len: usize, backend: BackendKind) -> Strategy {
        select_strategy(&ElementInfo::of::<T>(), &comparator_info(cmp), len, backend, &SortConfig::default())
    }

    #[test]
    fn tiny_inputs_are_noops_everywhere() {
        for backend in [BackendKind::Gpu, BackendKind::MultiCore, BackendKind::Serial] {
            assert_eq!(pick::<u32, _>(&Less, 0, backend), Strategy::Noop);
            assert_eq!(pick::<Point, _>(&Less, 1, backend), Strategy::Noop);
        }
    }

    #[test]
    fn threshold_selects_insertion_sort() {
        assert_eq!(pick::<u32, _>(&Less, 31, BackendKind::Gpu), Strategy::SmallSerial);
        assert_eq!(pick::<u32, _>(&Less, 32, BackendKind::Gpu), Strategy::GpuRadix);
        let config = SortConfig::default().with_serial_threshold(0);
        let s = select_strategy(
            &ElementInfo::of::<u8>(),
            &comparator_info::<u8, _>(&Greater),
            2,
            BackendKind::MultiCore,
            &config,
        );
        assert_eq!(s, Strategy::ParallelRadix);
    }

    #[test]
    fn keyed_sorts_prefer_radix() {
        assert_eq!(pick::<f64, _>(&Greater, 4096, BackendKind::MultiCore), Strategy::ParallelRadix);
        assert_eq!(pick::<f64, _>(&Greater, 4096, BackendKind::Serial), Strategy::SerialComparison);
        let by_abs = |a: &i32, b: &i32| a.abs() < b.abs();
        assert_eq!(pick::<i32, _>(&by_abs, 4096, BackendKind::Gpu), Strategy::GpuBitonic);
        assert_eq!(pick::<i32, _>(&by_abs, 4096, BackendKind::MultiCore), Strategy::ParallelComparison);
        assert_eq!(pick::<Point, _>(&Less, 4096, BackendKind::Gpu), Strategy::GpuBitonic);
    }

    #[test]
    fn selection_is_deterministic() {
        let a = pick::<i64, _>(&Less, 65_537, BackendKind::Gpu);
        let b = pick::<i64, _>(&Less, 65_537, BackendKind::Gpu);
        assert_eq!(a, b);
    }
}
