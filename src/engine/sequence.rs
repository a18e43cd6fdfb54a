//! # Memory Domains
//!
//! A [`Sequence`] is the one shape every backend sorts: either a host slice
//! or a device-resident [`DeviceVector`]. Callers never build one directly;
//! anything implementing [`SortTarget`] is turned into a sequence for the
//! duration of a single call.
//!
//! ## Contract
//! * A sequence lives in exactly one memory domain for the whole call.
//! * Sorting changes the order of elements, never the length or multiset.
//! * After a call returns, every host-visible read (slice access,
//!   [`DeviceVector::get`], [`DeviceVector::to_vec`]) reflects the new order.
//!
//! Backends that cannot address the sequence's domain directly sort a host
//! mirror and write it back in one transfer.

#[cfg(feature = "gpu")]
use crate::gpu::DeviceVector;

use crate::engine::element::SortElement;
use crate::engine::error::SortResult;

/// Memory domain a sequence lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryDomain {
    /// Ordinary host memory.
    Host,
    /// A GPU buffer.
    Device,
}

/// A mutable sequence in one memory domain.
pub enum Sequence<'a, T: SortElement> {
    /// Host-resident elements, sorted in place.
    Host(&'a mut [T]),

    /// Device-resident elements.
    #[cfg(feature = "gpu")]
    Device(&'a mut DeviceVector<T>),
}

impl<'a, T: SortElement> Sequence<'a, T> {
    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Sequence::Host(s) => s.len(),
            #[cfg(feature = "gpu")]
            Sequence::Device(v) => v.len(),
        }
    }

    /// Returns `true` if the sequence has no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Memory domain of the elements.
    #[inline]
    pub fn domain(&self) -> MemoryDomain {
        match self {
            Sequence::Host(_) => MemoryDomain::Host,
            #[cfg(feature = "gpu")]
            Sequence::Device(_) => MemoryDomain::Device,
        }
    }

    /// Runs `f` over a host view of the elements.
    ///
    /// Host sequences are passed through. Device sequences are downloaded,
    /// handed to `f`, and uploaded again only if `f` succeeds.

    pub(crate) fn with_host_view<R>(self, f: impl FnOnce(&mut [T]) -> SortResult<R>) -> SortResult<R> {
        match self {
            Sequence::Host(slice) => f(slice),
            #[cfg(feature = "gpu")]
            Sequence::Device(vector) => {
                let mut mirror = vector.to_vec()?;
                let out = f(&mut mirror)?;
                vector.write_all(&mirror)?;
                Ok(out)
            }
        }
    }
}

/// Anything that can be viewed as a [`Sequence`] for one sort call.
pub trait SortTarget<T: SortElement> {
    /// Borrows `self` as a sequence.
    fn as_sequence(&mut self) -> Sequence<'_, T>;
}

impl<T: SortElement> SortTarget<T> for [T] {
    #[inline]
    fn as_sequence(&mut self) -> Sequence<'_, T> {
        Sequence::Host(self)
    }
}

impl<T: SortElement> SortTarget<T> for Vec<T> {
    #[inline]
    fn as_sequence(&mut self) -> Sequence<'_, T> {
        Sequence::Host(self.as_mut_slice())
    }
}

impl<T: SortElement, const N: usize> SortTarget<T> for [T; N] {
    #[inline]
    fn as_sequence(&mut self) -> Sequence<'_, T> {
        Sequence::Host(self.as_mut_slice())
    }
}

#[cfg(feature = "gpu")]
impl<T: SortElement> SortTarget<T> for DeviceVector<T> {
    #[inline]
    fn as_sequence(&mut self) -> Sequence<'_, T> {
        Sequence::Device(self)
    }
}
