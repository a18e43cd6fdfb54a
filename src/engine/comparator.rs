//! # Comparators
//!
//! A comparator is a pure strict-weak-ordering predicate `less(a, b)`.
//!
//! ## Identity
//! The engine identifies a comparator by its **type**, never by its value.
//! Unit structs ([`Less`], [`Greater`], user structs) and closures all have a
//! distinct `TypeId`, which keys the registry and the artifact cache.
//!
//! ## Canonical comparators
//! [`Less`] and [`Greater`] report a [`Direction`]. That lets the dispatcher
//! pick a radix sort for built-in numeric types and lets GPU code generation
//! reuse the element type's registered natural order.

use std::any::{type_name, TypeId};
use std::cmp::Ordering;

use crate::engine::types::{ComparatorInfo, Direction};

/// Strict weak ordering over `T`.
///
/// Any `Fn(&T, &T) -> bool + Send + Sync + 'static` closure is a comparator.

pub trait Comparator<T>: Send + Sync + 'static {
    /// Returns `true` if `a` must be ordered before `b`.
    fn less(&self, a: &T, b: &T) -> bool;

    /// Returns the canonical direction of this comparator.
    ///
    /// Returning `Some` asserts that [`Comparator::less`] is exactly the
    /// natural order of `T` (or its strict reverse), which allows key-based
    /// algorithms to bypass the predicate entirely.
    #[inline]
    fn direction(&self) -> Option<Direction> {
        None
    }
}

/// Natural ascending order (`a < b`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Less;

/// Natural descending order (`a > b`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Greater;

impl<T: PartialOrd> Comparator<T> for Less {
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        a < b
    }

    #[inline]
    fn direction(&self) -> Option<Direction> {
        Some(Direction::Ascending)
    }
}

impl<T: PartialOrd> Comparator<T> for Greater {
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        a > b
    }

    #[inline]
    fn direction(&self) -> Option<Direction> {
        Some(Direction::Descending)
    }
}

impl<T, F> Comparator<T> for F
where
    F: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    #[inline]
    fn less(&self, a: &T, b: &T) -> bool {
        self(a, b)
    }
}

/// Three-way comparison derived from a strict `less`.
#[inline]
pub(crate) fn ordering<T, C: Comparator<T> + ?Sized>(cmp: &C, a: &T, b: &T) -> Ordering {
    if cmp.less(a, b) {
        Ordering::Less
    } else if cmp.less(b, a) {
        Ordering::Greater
    } else {
        Ordering::Equal
    }
}

/// Builds the dispatcher's view of comparator `C`.
#[inline]
pub(crate) fn comparator_info<T, C: Comparator<T>>(cmp: &C) -> ComparatorInfo {
    ComparatorInfo {
        type_id: TypeId::of::<C>(),
        name: type_name::<C>(),
        direction: cmp.direction(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_comparators_report_direction() {
        assert_eq!(Comparator::<i32>::direction(&Less), Some(Direction::Ascending));
        assert_eq!(Comparator::<i32>::direction(&Greater), Some(Direction::Descending));
        let by_abs = |a: &i32, b: &i32| a.abs() < b.abs();
        assert_eq!(Comparator::<i32>::direction(&by_abs), None);
    }

    #[test]
    fn ordering_is_derived_from_less() {
        assert_eq!(ordering(&Less, &1, &2), Ordering::Less);
        assert_eq!(ordering(&Greater, &1, &2), Ordering::Greater);
        let by_abs = |a: &i32, b: &i32| a.abs() < b.abs();
        assert_eq!(ordering(&by_abs, &-3, &3), Ordering::Equal);
    }

    #[test]
    fn closures_have_distinct_identities() {
        let a = |x: &u32, y: &u32| x < y;
        let b = |x: &u32, y: &u32| x < y;
        assert_ne!(
            comparator_info::<u32, _>(&a).type_id,
            comparator_info::<u32, _>(&b).type_id
        );
        assert_eq!(
            comparator_info::<u32, _>(&Less).type_id,
            comparator_info::<u32, _>(&Less).type_id
        );
    }
}
