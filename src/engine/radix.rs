//! CPU radix sorts over order-preserving keys.
//!
//! Both sorts work on the directed radix key of each element (see
//! [`crate::engine::element`]) with 8-bit digits, so a 32-bit kind takes at
//! most four counting passes and a 64-bit kind at most eight.
//!
//! * [`lsd_radix_sort`] is a serial least-significant-digit sort with a
//!   scratch buffer. Passes whose digit is identical for every element are
//!   skipped.
//! * [`par_radix_sort`] finds the most significant digit that actually
//!   differs, partitions on it, and runs [`lsd_radix_sort`] on every bucket
//!   in parallel. It must run inside the caller's `rayon` pool.

use rayon::prelude::*;

use crate::engine::element::{directed_key, SortElement};
use crate::engine::types::{Direction, CPU_RADIX_BITS, CPU_RADIX_BUCKETS};

/// Elements per histogram chunk in the parallel sort.
const PAR_CHUNK: usize = 1 << 14;

/// Below this length the parallel sort runs serially.
const PAR_MIN_LEN: usize = 1 << 15;

type Histogram = [usize; CPU_RADIX_BUCKETS];

#[inline]
fn digit<T: SortElement>(value: &T, direction: Direction, key_bits: u32, shift: u32) -> usize {
    ((directed_key(value, direction, key_bits) >> shift) & (CPU_RADIX_BUCKETS as u64 - 1)) as usize
}

#[inline]
fn exclusive_prefix(counts: &Histogram) -> Histogram {
    let mut offsets = [0usize; CPU_RADIX_BUCKETS];
    let mut sum = 0usize;
    for (offset, &count) in offsets.iter_mut().zip(counts.iter()) {
        *offset = sum;
        sum += count;
    }
    offsets
}

/// Sorts `data` by the full `key_bits`-wide key.
pub(crate) fn lsd_radix_sort<T: SortElement>(data: &mut [T], direction: Direction, key_bits: u32) {
    lsd_sort_low_bits(data, direction, key_bits, key_bits);
}

/// Sorts `data` by the low `sort_bits` of its key, assuming all higher bits
/// are equal across `data`.
fn lsd_sort_low_bits<T: SortElement>(data: &mut [T], direction: Direction, key_bits: u32, sort_bits: u32) {
    let len = data.len();
    if len <= 1 || sort_bits == 0 {
        return;
    }

    let mut scratch = data.to_vec();
    let mut sorted_in_data = true;
    let mut counts: Histogram = [0; CPU_RADIX_BUCKETS];

    for pass in 0..sort_bits.div_ceil(CPU_RADIX_BITS) {
        let shift = pass * CPU_RADIX_BITS;
        let (src, dst) = if sorted_in_data {
            (&data[..], &mut scratch[..])
        } else {
            (&scratch[..], &mut data[..])
        };

        counts.fill(0);
        for value in src {
            counts[digit(value, direction, key_bits, shift)] += 1;
        }
        if counts.contains(&len) {
            continue;
        }

        let mut offsets = exclusive_prefix(&counts);
        for value in src {
            let d = digit(value, direction, key_bits, shift);
            dst[offsets[d]] = *value;
            offsets[d] += 1;
        }
        sorted_in_data = !sorted_in_data;
    }

    if !sorted_in_data {
        data.copy_from_slice(&scratch);
    }
}

fn par_histogram<T: SortElement>(data: &[T], direction: Direction, key_bits: u32, shift: u32) -> Histogram {
    data.par_chunks(PAR_CHUNK)
        .map(|chunk| {
            let mut counts: Histogram = [0; CPU_RADIX_BUCKETS];
            for value in chunk {
                counts[digit(value, direction, key_bits, shift)] += 1;
            }
            counts
        })
        .reduce(
            || [0; CPU_RADIX_BUCKETS],
            |mut acc, part| {
                for (a, p) in acc.iter_mut().zip(part.iter()) {
                    *a += p;
                }
                acc
            },
        )
}

/// Parallel MSD-partitioned radix sort.
pub(crate) fn par_radix_sort<T: SortElement>(data: &mut [T], direction: Direction, key_bits: u32) {
    let len = data.len();
    if len < PAR_MIN_LEN {
        lsd_radix_sort(data, direction, key_bits);
        return;
    }

    // Highest digit that is not shared by every element.
    let mut shift = key_bits;
    let counts = loop {
        if shift == 0 {
            return;
        }
        shift = shift.saturating_sub(CPU_RADIX_BITS);
        let counts = par_histogram(data, direction, key_bits, shift);
        if !counts.contains(&len) {
            break counts;
        }
    };

    let mut scratch = data.to_vec();
    let mut offsets = exclusive_prefix(&counts);
    for value in data.iter() {
        let d = digit(value, direction, key_bits, shift);
        scratch[offsets[d]] = *value;
        offsets[d] += 1;
    }
    data.copy_from_slice(&scratch);
    drop(scratch);

    let mut buckets: Vec<&mut [T]> = Vec::with_capacity(CPU_RADIX_BUCKETS);
    let mut rest: &mut [T] = data;
    for &count in counts.iter() {
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(count);
        if head.len() > 1 {
            buckets.push(head);
        }
        rest = tail;
    }

    buckets
        .into_par_iter()
        .for_each(|bucket| lsd_sort_low_bits(bucket, direction, key_bits, shift));
}
