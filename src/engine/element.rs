//! # Sortable Elements
//!
//! Defines [`SortElement`], the bound every element type must satisfy, and the
//! order-preserving radix keys of the built-in numeric kinds.
//!
//! ## Radix keys
//! A radix key maps a value to an unsigned integer whose natural order equals
//! the natural order of the value:
//!
//! | kind | key |
//! |---|---|
//! | unsigned | the value itself |
//! | signed | value with the sign bit flipped |
//! | float | all bits flipped when negative, sign bit set otherwise |
//!
//! Reverse order uses the bitwise complement of the key within the kind's
//! width. Keys never exceed `bits()` significant bits.
//!
//! Floating-point NaNs have no place in a strict weak ordering; with the
//! natural comparator they are ordered by their key (positive NaNs after
//! `+inf`, negative NaNs before `-inf`) on radix paths and unspecified on
//! comparison paths.

use crate::engine::types::{Direction, PrimitiveKind};

/// An element that can be sorted by the engine.
///
/// Plain aggregates implement the trait with an empty body:
///
/// ```ignore
/// #[derive(Clone, Copy)]
/// struct Particle { mass: f32, id: u32 }
/// impl hetsort::SortElement for Particle {}
/// ```
///
/// Built-in numeric types override [`SortElement::PRIMITIVE`] and the radix
/// key hooks, which lets the dispatcher choose a radix sort for them.

pub trait SortElement: Copy + Send + Sync + 'static {
    /// Built-in numeric kind, `None` for user types.
    const PRIMITIVE: Option<PrimitiveKind> = None;

    /// Order-preserving unsigned key. Only meaningful when
    /// [`SortElement::PRIMITIVE`] is `Some`.
    #[doc(hidden)]
    #[inline]
    fn radix_key(&self) -> u64 {
        0
    }

    /// Inverse of [`SortElement::radix_key`].
    #[doc(hidden)]
    #[inline]
    fn from_radix_key(_key: u64) -> Option<Self> {
        None
    }
}

/// Returns a bit mask covering the low `bits` bits.
#[inline]
pub(crate) const fn key_mask(bits: u32) -> u64 {
    if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Radix key of `value` oriented for `direction`.
#[inline]
pub(crate) fn directed_key<T: SortElement>(value: &T, direction: Direction, bits: u32) -> u64 {
    let key = value.radix_key();
    match direction {
        Direction::Ascending => key,
        Direction::Descending => !key & key_mask(bits),
    }
}

/// Inverse of [`directed_key`].
#[inline]
pub(crate) fn from_directed_key<T: SortElement>(key: u64, direction: Direction, bits: u32) -> Option<T> {
    let key = match direction {
        Direction::Ascending => key,
        Direction::Descending => !key & key_mask(bits),
    };
    T::from_radix_key(key)
}

macro_rules! unsigned_element {
    ($($t:ty => $kind:ident),* $(,)?) => {$(
        impl SortElement for $t {
            const PRIMITIVE: Option<PrimitiveKind> = Some(PrimitiveKind::$kind);

            #[inline]
            fn radix_key(&self) -> u64 {
                *self as u64
            }

            #[inline]
            fn from_radix_key(key: u64) -> Option<Self> {
                <$t>::try_from(key).ok()
            }
        }
    )*};
}

macro_rules! signed_element {
    ($($t:ty as $u:ty => $kind:ident),* $(,)?) => {$(
        impl SortElement for $t {
            const PRIMITIVE: Option<PrimitiveKind> = Some(PrimitiveKind::$kind);

            #[inline]
            fn radix_key(&self) -> u64 {
                ((*self as $u) ^ (1 << (<$u>::BITS - 1))) as u64
            }

            #[inline]
            fn from_radix_key(key: u64) -> Option<Self> {
                let raw = <$u>::try_from(key).ok()?;
                Some((raw ^ (1 << (<$u>::BITS - 1))) as $t)
            }
        }
    )*};
}

macro_rules! float_element {
    ($($t:ty as $u:ty => $kind:ident),* $(,)?) => {$(
        impl SortElement for $t {
            const PRIMITIVE: Option<PrimitiveKind> = Some(PrimitiveKind::$kind);

            #[inline]
            fn radix_key(&self) -> u64 {
                let bits = self.to_bits();
                let sign = 1 << (<$u>::BITS - 1);
                let key = if bits & sign != 0 { !bits } else { bits | sign };
                key as u64
            }

            #[inline]
            fn from_radix_key(key: u64) -> Option<Self> {
                let key = <$u>::try_from(key).ok()?;
                let sign = 1 << (<$u>::BITS - 1);
                let bits = if key & sign != 0 { key ^ sign } else { !key };
                Some(<$t>::from_bits(bits))
            }
        }
    )*};
}

unsigned_element!(u8 => U8, u16 => U16, u32 => U32, u64 => U64);
signed_element!(i8 as u8 => I8, i16 as u16 => I16, i32 as u32 => I32, i64 as u64 => I64);
float_element!(f32 as u32 => F32, f64 as u64 => F64);

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_key_order<T: SortElement + PartialOrd + std::fmt::Debug>(sorted: &[T]) {
        for pair in sorted.windows(2) {
            assert!(pair[0].radix_key() < pair[1].radix_key(), "{:?} vs {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn signed_keys_preserve_order() {
        assert_key_order(&[i8::MIN, -1, 0, 1, i8::MAX]);
        assert_key_order(&[i32::MIN, -70_000, -1, 0, 3, i32::MAX]);
        assert_key_order(&[i64::MIN, -1, 0, i64::MAX]);
    }

    #[test]
    fn float_keys_preserve_order() {
        assert_key_order(&[f32::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-30, 7.0, f32::INFINITY]);
        assert_key_order(&[f64::MIN, -1.0, f64::MIN_POSITIVE, 1.0, f64::MAX]);
    }

    #[test]
    fn keys_invert() {
        for v in [-3.25f64, 0.0, -0.0, 1e300, f64::NEG_INFINITY] {
            let back = f64::from_radix_key(v.radix_key());
            assert_eq!(back.map(f64::to_bits), Some(v.to_bits()));
        }
        for v in [i16::MIN, -1, 0, 12, i16::MAX] {
            assert_eq!(i16::from_radix_key(v.radix_key()), Some(v));
        }
    }

    #[test]
    fn descending_keys_reverse_order_within_width() {
        let a = directed_key(&3u8, Direction::Descending, 8);
        let b = directed_key(&200u8, Direction::Descending, 8);
        assert!(a > b);
        assert!(a <= 0xff);
        assert_eq!(from_directed_key::<u8>(a, Direction::Descending, 8), Some(3));
    }

    #[test]
    fn user_types_have_no_key() {
        #[derive(Clone, Copy)]
        struct Opaque;
        impl SortElement for Opaque {}
        assert!(Opaque::PRIMITIVE.is_none());
        assert!(Opaque::from_radix_key(0).is_none());
    }
}
