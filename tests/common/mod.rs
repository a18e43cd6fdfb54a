#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::Once;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hetsort::{BackendHint, Comparator, Context, SortConfig};

/// Lengths around every power-of-two and tile boundary the backends care about.
pub const SIZES: &[usize] = &[
    0, 1, 31, 32, 63, 64, 127, 128, 129, 1000, 1053, 4096, 4097, 65_535, 65_536, 65_537,
];

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber driven by `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_u32(len: usize, seed: u64) -> Vec<u32> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

pub fn random_i32(len: usize, seed: u64) -> Vec<i32> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

pub fn random_u64(len: usize, seed: u64) -> Vec<u64> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

pub fn random_i64(len: usize, seed: u64) -> Vec<i64> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

pub fn random_f32(len: usize, seed: u64) -> Vec<f32> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random_range(-1.0e6f32..1.0e6)).collect()
}

pub fn random_f64(len: usize, seed: u64) -> Vec<f64> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random_range(-1.0e12f64..1.0e12)).collect()
}

pub fn random_u8(len: usize, seed: u64) -> Vec<u8> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

pub fn random_i16(len: usize, seed: u64) -> Vec<i16> {
    let mut r = rng(seed);
    (0..len).map(|_| r.random()).collect()
}

/// Asserts that no adjacent pair is inverted under `cmp`.
pub fn assert_sorted_by<T: Debug, C: Comparator<T>>(values: &[T], cmp: &C) {
    for (i, w) in values.windows(2).enumerate() {
        assert!(
            !cmp.less(&w[1], &w[0]),
            "inversion at {i}: {:?} before {:?}",
            w[0],
            w[1]
        );
    }
}

/// Asserts that `a` and `b` hold the same elements, ignoring order.
pub fn assert_same_multiset<T: PartialOrd + Debug + Copy>(a: &[T], b: &[T]) {
    assert_eq!(a.len(), b.len(), "length changed");
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_by(|x, y| x.partial_cmp(y).expect("test data has no NaN"));
    b.sort_by(|x, y| x.partial_cmp(y).expect("test data has no NaN"));
    assert_eq!(a, b, "multiset changed");
}

/// Reference result: `values` sorted ascending by `std`.
pub fn reference_sorted<T: PartialOrd + Copy>(values: &[T]) -> Vec<T> {
    let mut out = values.to_vec();
    out.sort_by(|x, y| x.partial_cmp(y).expect("test data has no NaN"));
    out
}

/// Reference result: `values` sorted descending by `std`.
pub fn reference_sorted_desc<T: PartialOrd + Copy>(values: &[T]) -> Vec<T> {
    let mut out = values.to_vec();
    out.sort_by(|x, y| y.partial_cmp(x).expect("test data has no NaN"));
    out
}

/// Every CPU context the tests compare against each other.
pub fn cpu_contexts() -> Vec<Context> {
    vec![
        Context::serial(),
        Context::with_config(BackendHint::MultiCore, SortConfig::new().with_worker_threads(4))
            .expect("multicore context"),
    ]
}

/// GPU context, or `None` when the machine has no usable adapter.
pub fn gpu_context() -> Option<Context> {
    init_tracing();
    match Context::new(BackendHint::Gpu) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}
