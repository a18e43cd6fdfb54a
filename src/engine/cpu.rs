//! CPU backends.
//!
//! * [`SerialBackend`] runs everything on the calling thread.
//! * [`MultiCoreBackend`] owns a fixed-size `rayon` pool; the calling thread
//!   blocks in [`rayon::ThreadPool::install`] until the sort is complete.
//!
//! Neither backend needs registered types or compiled artifacts. Device
//! sequences are sorted through a host mirror.
//!
//! Built-in numerics under [`Less`](crate::engine::comparator::Less) or
//! [`Greater`](crate::engine::comparator::Greater) are compared by their
//! directed radix key on every comparison path. The key is a bijection of
//! the value's bits, so the comparison strategies produce bit-for-bit the
//! same output as the radix strategies (`-0.0` before `0.0`, NaNs by key).

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::info;

use crate::engine::comparator::{ordering, Comparator};
use crate::engine::config::SortConfig;
use crate::engine::dispatch::SortBackend;
use crate::engine::element::{directed_key, SortElement};
use crate::engine::error::{SortError, SortResult};
use crate::engine::radix::par_radix_sort;
use crate::engine::sequence::Sequence;
use crate::engine::types::{BackendKind, ComparatorInfo, Direction, ElementInfo, PrimitiveKind, Strategy};

/// Stable insertion sort for short inputs.
pub(crate) fn insertion_sort<T, C: Comparator<T> + ?Sized>(data: &mut [T], cmp: &C) {
    for i in 1..data.len() {
        let mut j = i;
        while j > 0 && cmp.less(&data[j], &data[j - 1]) {
            data.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// Returns the key parameters of a keyed sort.
pub(crate) fn radix_params<T: SortElement, C: Comparator<T>>(cmp: &C) -> SortResult<(PrimitiveKind, Direction)> {
    match (T::PRIMITIVE, cmp.direction()) {
        (Some(kind), Some(direction)) => Ok((kind, direction)),
        _ => Err(SortError::Internal(format!(
            "radix strategy selected for non-key element `{}`",
            std::any::type_name::<T>()
        ))),
    }
}

fn unsupported_strategy(backend: BackendKind, strategy: Strategy) -> SortError {
    SortError::Internal(format!("strategy {strategy} cannot run on the {backend} backend"))
}

/// Total order over the directed radix keys of a built-in numeric.
#[derive(Clone, Copy, Debug)]
pub(crate) struct KeyOrder {
    direction: Direction,
    bits: u32,
}

impl<T: SortElement> Comparator<T> for KeyOrder {
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        directed_key(a, self.direction, self.bits) < directed_key(b, self.direction, self.bits)
    }

    #[inline]
    fn direction(&self) -> Option<Direction> {
        Some(self.direction)
    }
}

/// Key order replacing `cmp` when `T` is keyed and `cmp` is canonical.
#[inline]
pub(crate) fn key_order<T: SortElement, C: Comparator<T>>(cmp: &C) -> Option<KeyOrder> {
    match (T::PRIMITIVE, cmp.direction()) {
        (Some(kind), Some(direction)) => Some(KeyOrder { direction, bits: kind.bits() }),
        _ => None,
    }
}

fn caller_strategy<T, C: Comparator<T>>(data: &mut [T], cmp: &C, strategy: Strategy) -> Option<()> {
    match strategy {
        Strategy::Noop => Some(()),
        Strategy::SmallSerial => {
            insertion_sort(data, cmp);
            Some(())
        }
        Strategy::SerialComparison => {
            data.sort_unstable_by(|a, b| ordering(cmp, a, b));
            Some(())
        }
        _ => None,
    }
}

/// Runs a strategy that needs nothing but the calling thread.
pub(crate) fn sort_on_caller<T: SortElement, C: Comparator<T>>(
    data: &mut [T],
    cmp: &C,
    strategy: Strategy,
) -> Option<()> {
    match key_order(cmp) {
        Some(keys) => caller_strategy(data, &keys, strategy),
        None => caller_strategy(data, cmp, strategy),
    }
}

/// Backend running on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialBackend;

impl SortBackend for SerialBackend {
    type Artifacts = ();

    fn kind(&self) -> BackendKind {
        BackendKind::Serial
    }

    fn resolve_artifacts<T: SortElement>(
        &self,
        _element: &ElementInfo,
        _comparator: &ComparatorInfo,
        _strategy: Strategy,
        _sequence: &Sequence<'_, T>,
        _config: &SortConfig,
    ) -> SortResult<()> {
        Ok(())
    }

    fn execute<T: SortElement, C: Comparator<T>>(
        &self,
        sequence: Sequence<'_, T>,
        comparator: &C,
        strategy: Strategy,
        _artifacts: (),
        _config: &SortConfig,
    ) -> SortResult<()> {
        sequence.with_host_view(|data| {
            sort_on_caller(data, comparator, strategy)
                .ok_or_else(|| unsupported_strategy(BackendKind::Serial, strategy))
        })
    }
}

/// Backend running on a fixed-size worker pool.
#[derive(Clone)]
pub struct MultiCoreBackend {
    pool: Arc<ThreadPool>,
}

impl MultiCoreBackend {
    /// Builds the worker pool.
    ///
    /// ## Errors
    /// [`SortError::BackendUnavailable`] if the pool cannot be spawned.

    pub fn new(config: &SortConfig) -> SortResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.unwrap_or(0))
            .thread_name(|i| format!("hetsort-worker-{i}"))
            .build()
            .map_err(|e| SortError::backend_unavailable(BackendKind::MultiCore, e.to_string()))?;
        info!(threads = pool.current_num_threads(), "multicore sort backend ready");
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl std::fmt::Debug for MultiCoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiCoreBackend").field("threads", &self.threads()).finish()
    }
}

impl SortBackend for MultiCoreBackend {
    type Artifacts = ();

    fn kind(&self) -> BackendKind {
        BackendKind::MultiCore
    }

    fn resolve_artifacts<T: SortElement>(
        &self,
        _element: &ElementInfo,
        _comparator: &ComparatorInfo,
        _strategy: Strategy,
        _sequence: &Sequence<'_, T>,
        _config: &SortConfig,
    ) -> SortResult<()> {
        Ok(())
    }

    fn execute<T: SortElement, C: Comparator<T>>(
        &self,
        sequence: Sequence<'_, T>,
        comparator: &C,
        strategy: Strategy,
        _artifacts: (),
        _config: &SortConfig,
    ) -> SortResult<()> {
        sequence.with_host_view(|data| match strategy {
            Strategy::ParallelComparison => {
                match key_order(comparator) {
                    Some(KeyOrder { direction, bits }) => self
                        .pool
                        .install(|| data.par_sort_unstable_by_key(|v| directed_key(v, direction, bits))),
                    None => self
                        .pool
                        .install(|| data.par_sort_unstable_by(|a, b| ordering(comparator, a, b))),
                }
                Ok(())
            }
            Strategy::ParallelRadix => {
                let (kind, direction) = radix_params::<T, C>(comparator)?;
                self.pool.install(|| par_radix_sort(data, direction, kind.bits()));
                Ok(())
            }
            other => sort_on_caller(data, comparator, other)
                .ok_or_else(|| unsupported_strategy(BackendKind::MultiCore, other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::comparator::{Greater, Less};
    use crate::engine::sequence::SortTarget;

    #[test]
    fn insertion_sort_orders_by_comparator() {
        let mut v = vec![4, -1, 9, 0, -1];
        insertion_sort(&mut v, &Less);
        assert_eq!(v, [-1, -1, 0, 4, 9]);
        insertion_sort(&mut v, &|a: &i32, b: &i32| b < a);
        assert_eq!(v, [9, 4, 0, -1, -1]);
    }

    #[test]
    fn serial_backend_rejects_parallel_strategies() {
        let mut v = vec![3u32, 2, 1];
        let err = SerialBackend
            .execute(v.as_sequence(), &Less, Strategy::ParallelRadix, (), &SortConfig::default())
            .unwrap_err();
        assert!(matches!(err, SortError::Internal(_)));
        assert_eq!(v, [3, 2, 1]);
    }

    #[test]
    fn comparison_strategies_follow_key_order_for_signed_zero() {
        let backend = MultiCoreBackend::new(&SortConfig::default().with_worker_threads(2)).unwrap();
        let input: Vec<f32> = (0..300).map(|i| if i % 2 == 0 { 0.0 } else { -0.0 }).collect();
        let mut expected = input.clone();
        par_radix_sort(&mut expected, Direction::Ascending, 32);
        let expected: Vec<u32> = expected.iter().map(|v| v.to_bits()).collect();

        for strategy in [
            Strategy::SmallSerial,
            Strategy::SerialComparison,
            Strategy::ParallelComparison,
        ] {
            let mut v = input.clone();
            backend
                .execute(v.as_sequence(), &Less, strategy, (), &SortConfig::default())
                .unwrap();
            let bits: Vec<u32> = v.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits, expected, "{strategy}");
        }
    }

    #[test]
    fn key_order_only_replaces_canonical_comparators() {
        assert!(key_order::<f64, _>(&Greater).is_some());
        assert!(key_order::<f64, _>(&|a: &f64, b: &f64| a < b).is_none());
    }

    #[test]
    fn multicore_backend_runs_every_cpu_strategy() {
        let backend = MultiCoreBackend::new(&SortConfig::default().with_worker_threads(2)).unwrap();
        assert_eq!(backend.threads(), 2);
        for strategy in [
            Strategy::SmallSerial,
            Strategy::SerialComparison,
            Strategy::ParallelComparison,
            Strategy::ParallelRadix,
        ] {
            let mut v: Vec<i16> = (0..500).map(|i| ((i * 7919) % 503) as i16 - 250).collect();
            let mut expected = v.clone();
            expected.sort_unstable_by(|a, b| b.cmp(a));
            backend
                .execute(v.as_sequence(), &Greater, strategy, (), &SortConfig::default())
                .unwrap();
            assert_eq!(v, expected, "{strategy}");
        }
    }
}
