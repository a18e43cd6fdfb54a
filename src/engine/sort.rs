//! # Sort Façade
//!
//! The public entry points: [`sort`], [`sort_by`], [`sort_raw_parts`] and the
//! matching methods on [`Context`].
//!
//! ## Call lifecycle
//!
//! Every call walks the [`SortPhase`] machine:
//!
//! 1. **Validating**: lengths 0 and 1 return immediately; otherwise the
//!    context's health is checked.
//! 2. **BackendResolved**: the backend picks a [`Strategy`].
//! 3. **ArtifactResolved** (GPU only): registration is checked and compiled
//!    kernels are fetched or built.
//! 4. **Dispatching**: the backend runs the strategy to completion.
//!
//! Any error moves the call to `Failed`. The sequence is left untouched:
//! host data is only written once a device job has finished, device data is
//! only overwritten by the last command of a single submission.
//!
//! ## Stability
//!
//! Sorting is **unstable**: the relative order of elements that compare
//! equivalent is unspecified and may differ between backends.

use tracing::{debug, debug_span, trace};

use crate::engine::comparator::{comparator_info, Comparator, Less};
use crate::engine::config::SortConfig;
use crate::engine::context::{Backend, Context};
use crate::engine::dispatch::SortBackend;
use crate::engine::element::SortElement;
use crate::engine::error::SortResult;
use crate::engine::sequence::{Sequence, SortTarget};
use crate::engine::types::{ComparatorInfo, ElementInfo, SortPhase};

/// Tracks and logs the phase of one call.
struct CallState {
    phase: SortPhase,
}

impl CallState {
    fn new() -> Self {
        Self { phase: SortPhase::Idle }
    }

    #[inline]
    fn advance(&mut self, next: SortPhase) {
        trace!(from = ?self.phase, to = ?next, "sort phase");
        self.phase = next;
    }
}

impl Context {
    /// Sorts `target` in ascending natural order.
    ///
    /// ## Errors
    /// See [`Context::sort_by`].

    pub fn sort<T, S>(&self, target: &mut S) -> SortResult<()>
    where
        T: SortElement + PartialOrd,
        S: SortTarget<T> + ?Sized,
    {
        self.sort_by(target, Less)
    }

    /// Sorts `target` by `comparator`.
    ///
    /// ## Errors
    /// * [`SortError::BackendUnavailable`] if the backend is (or becomes)
    ///   unusable.
    /// * [`SortError::UnregisteredType`] / [`SortError::UnsupportedComparator`]
    ///   on GPU backends when device code for the pair is missing.
    /// * [`SortError::CompilationFailure`], [`SortError::TransferFailure`],
    ///   [`SortError::CapacityExceeded`] from the GPU path.
    ///
    /// [`SortError::BackendUnavailable`]: crate::SortError::BackendUnavailable
    /// [`SortError::UnregisteredType`]: crate::SortError::UnregisteredType
    /// [`SortError::UnsupportedComparator`]: crate::SortError::UnsupportedComparator
    /// [`SortError::CompilationFailure`]: crate::SortError::CompilationFailure
    /// [`SortError::TransferFailure`]: crate::SortError::TransferFailure
    /// [`SortError::CapacityExceeded`]: crate::SortError::CapacityExceeded

    pub fn sort_by<T, S, C>(&self, target: &mut S, comparator: C) -> SortResult<()>
    where
        T: SortElement,
        S: SortTarget<T> + ?Sized,
        C: Comparator<T>,
    {
        run(self, target.as_sequence(), &comparator)
    }
}

fn run<T: SortElement, C: Comparator<T>>(ctx: &Context, sequence: Sequence<'_, T>, comparator: &C) -> SortResult<()> {
    let element = ElementInfo::of::<T>();
    let cmp_info = comparator_info(comparator);
    let len = sequence.len();

    let span = debug_span!(
        "sort",
        element = element.name,
        len,
        backend = %ctx.backend_kind(),
        domain = ?sequence.domain(),
    );
    let _enter = span.enter();

    let mut state = CallState::new();
    state.advance(SortPhase::Validating);

    if len <= 1 {
        state.advance(SortPhase::Completed);
        return Ok(());
    }

    let config = ctx.config();
    let result = ctx.ensure_healthy().and_then(|()| match ctx.backend() {
        #[cfg(feature = "gpu")]
        Backend::Gpu(backend) => drive(backend, sequence, comparator, &element, &cmp_info, config, &mut state),
        Backend::MultiCore(backend) => drive(backend, sequence, comparator, &element, &cmp_info, config, &mut state),
        Backend::Serial(backend) => drive(backend, sequence, comparator, &element, &cmp_info, config, &mut state),
    });

    match &result {
        Ok(()) => state.advance(SortPhase::Completed),
        Err(e) => {
            ctx.record_failure(e);
            debug!(error = %e, "sort failed");
            state.advance(SortPhase::Failed);
        }
    }
    result
}

fn drive<B, T, C>(
    backend: &B,
    sequence: Sequence<'_, T>,
    comparator: &C,
    element: &ElementInfo,
    cmp_info: &ComparatorInfo,
    config: &SortConfig,
    state: &mut CallState,
) -> SortResult<()>
where
    B: SortBackend,
    T: SortElement,
    C: Comparator<T>,
{
    let strategy = backend.resolve_strategy(element, cmp_info, sequence.len(), config);
    debug!(%strategy, comparator = cmp_info.name, "strategy selected");
    state.advance(SortPhase::BackendResolved);

    let artifacts = backend.resolve_artifacts(element, cmp_info, strategy, &sequence, config)?;
    if backend.kind().is_gpu_class() {
        state.advance(SortPhase::ArtifactResolved);
    }

    state.advance(SortPhase::Dispatching);
    backend.execute(sequence, comparator, strategy, artifacts, config)
}

/// Sorts `target` in ascending natural order on the default context.
///
/// ```
/// let mut v = vec![3, 1, 2];
/// hetsort::sort(&mut v).unwrap();
/// assert_eq!(v, [1, 2, 3]);
/// ```
///
/// ## Errors
/// Fails if the default context cannot be built, or as [`Context::sort_by`].

pub fn sort<T, S>(target: &mut S) -> SortResult<()>
where
    T: SortElement + PartialOrd,
    S: SortTarget<T> + ?Sized,
{
    Context::default_context()?.sort(target)
}

/// Sorts `target` by `comparator` on the default context.
///
/// On a GPU default context, closures and other custom comparators must be
/// registered first (see [`register_comparator`]).
///
/// ```
/// let mut v = vec![9u32, 4, 7];
/// hetsort::sort_by(&mut v, hetsort::Greater).unwrap();
/// assert_eq!(v, [9, 7, 4]);
/// ```
///
/// [`register_comparator`]: crate::engine::registry::register_comparator
///
/// ## Errors
/// Fails if the default context cannot be built, or as [`Context::sort_by`].

pub fn sort_by<T, S, C>(target: &mut S, comparator: C) -> SortResult<()>
where
    T: SortElement,
    S: SortTarget<T> + ?Sized,
    C: Comparator<T>,
{
    Context::default_context()?.sort_by(target, comparator)
}

/// Sorts `len` elements starting at `ptr` by `comparator` on `ctx`.
///
/// ## Safety
/// When `len > 0`, `ptr` must satisfy the requirements of
/// [`std::slice::from_raw_parts_mut`] for `len` elements, and no other
/// reference to that memory may be used for the duration of the call.
/// `ptr` is never dereferenced when `len == 0`.
///
/// ## Errors
/// As [`Context::sort_by`].

pub unsafe fn sort_raw_parts<T, C>(ctx: &Context, ptr: *mut T, len: usize, comparator: C) -> SortResult<()>
where
    T: SortElement,
    C: Comparator<T>,
{
    if len == 0 {
        return Ok(());
    }
    // SAFETY: the caller guarantees `ptr` is valid for `len` exclusive elements.
    let slice = unsafe { std::slice::from_raw_parts_mut(ptr, len) };
    ctx.sort_by(slice, comparator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::comparator::Greater;
    use crate::engine::error::SortError;
    use crate::engine::types::BackendKind;

    #[test]
    fn serial_context_sorts_every_host_target() {
        let ctx = Context::serial();

        let mut v = vec![5u64, 3, 9, 1];
        ctx.sort(&mut v).unwrap();
        assert_eq!(v, [1, 3, 5, 9]);

        let mut a = [2.5f32, -1.0, 0.0];
        ctx.sort_by(&mut a, Greater).unwrap();
        assert_eq!(a, [2.5, 0.0, -1.0]);

        let s: &mut [i8] = &mut [3, -3, 0];
        ctx.sort(s).unwrap();
        assert_eq!(s, &[-3, 0, 3]);
    }

    #[test]
    fn raw_parts_sort_in_place() {
        let ctx = Context::serial();
        let mut v = vec![4i64, -7, 2];
        unsafe { sort_raw_parts(&ctx, v.as_mut_ptr(), v.len(), Less).unwrap() };
        assert_eq!(v, [-7, 2, 4]);
        unsafe { sort_raw_parts::<u32, _>(&ctx, std::ptr::null_mut(), 0, Less).unwrap() };
    }

    #[test]
    fn disabled_context_still_accepts_trivial_inputs() {
        let ctx = Context::serial();
        let lost = SortError::backend_unavailable(BackendKind::Serial, "gone");
        ctx.record_failure(&lost);

        let mut one = [1u8];
        assert!(ctx.sort(&mut one).is_ok());
        let mut two = [2u8, 1];
        assert_eq!(ctx.sort(&mut two).unwrap_err(), lost);
        assert_eq!(two, [2, 1]);
    }
}
