// GPU backend: host and device sequences, registered types, and error paths.
//
// Every test returns early when no adapter is available.
//
// Run:
//   cargo test --test sort_gpu -- --nocapture
//
// With logs:
//   RUST_LOG=hetsort=debug cargo test --test sort_gpu -- --nocapture

#![cfg(feature = "gpu")]

mod common;

use bytemuck::{Pod, Zeroable};

use common::*;

use hetsort::{
    register_comparator, register_type, BackendKind, Comparator, ComparatorDescriptor, Context, DeviceVector,
    Greater, Less, SortElement, SortError, TypeDescriptor,
};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Pod, Zeroable)]
struct Pair {
    key: u32,
    value: f32,
}

impl SortElement for Pair {}

struct ValueDescending;

impl Comparator<Pair> for ValueDescending {
    fn less(&self, a: &Pair, b: &Pair) -> bool {
        a.value > b.value
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Pod, Zeroable)]
struct Stranger {
    v: u32,
}

impl SortElement for Stranger {}

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Pod, Zeroable)]
struct Cell {
    v: u32,
}

impl SortElement for Cell {}

struct CellDescending;

impl Comparator<Cell> for CellDescending {
    fn less(&self, a: &Cell, b: &Cell) -> bool {
        a.v > b.v
    }
}

fn register_pair() {
    register_type(
        TypeDescriptor::new::<Pair>("Pair", "struct Pair { key: u32, value: f32 }")
            .with_natural_order("return a.key < b.key;"),
    )
    .unwrap();
    register_comparator(ComparatorDescriptor::new::<Pair, ValueDescending>(
        "value_descending",
        "return a.value > b.value;",
    ))
    .unwrap();
}

fn random_pairs(len: usize, seed: u64) -> Vec<Pair> {
    let keys = random_u32(len, seed);
    let values = random_f32(len, seed + 1);
    keys.into_iter()
        .zip(values)
        .map(|(key, value)| Pair { key: key % 1000, value })
        .collect()
}

#[test]
fn host_sequences_of_every_size_sort() {
    let Some(ctx) = gpu_context() else { return };
    assert_eq!(ctx.backend_kind(), BackendKind::Gpu);

    for (i, &len) in SIZES.iter().enumerate() {
        let mut v = random_u32(len, i as u64);
        let expected = reference_sorted(&v);
        ctx.sort(&mut v).unwrap();
        assert_eq!(v, expected, "len {len}");
    }
}

#[test]
fn host_radix_matches_std_for_every_numeric_type() {
    let Some(ctx) = gpu_context() else { return };

    macro_rules! check {
        ($gen:ident) => {{
            let original = $gen(4097, 31);

            let mut v = original.clone();
            ctx.sort_by(&mut v, Less).unwrap();
            assert_eq!(v, reference_sorted(&original), stringify!($gen));

            let mut v = original.clone();
            ctx.sort_by(&mut v, Greater).unwrap();
            assert_eq!(v, reference_sorted_desc(&original), stringify!($gen));
        }};
    }

    check!(random_u8);
    check!(random_i16);
    check!(random_u32);
    check!(random_i32);
    check!(random_u64);
    check!(random_i64);
    check!(random_f32);
    check!(random_f64);
}

#[test]
fn device_vectors_sort_in_place() {
    let Some(ctx) = gpu_context() else { return };
    let device = ctx.gpu_device().unwrap();

    for &len in &[2usize, 33, 1053, 65_537] {
        let original = random_f64(len, len as u64);
        let mut on_device = DeviceVector::from_slice_on(&device, &original).unwrap();
        ctx.sort_by(&mut on_device, Greater).unwrap();
        assert_eq!(on_device.to_vec().unwrap(), reference_sorted_desc(&original), "len {len}");
    }

    let original = random_i32(4096, 77);
    let mut on_device = DeviceVector::from_slice_on(&device, &original).unwrap();
    ctx.sort(&mut on_device).unwrap();
    let sorted = on_device.to_vec().unwrap();
    assert_eq!(sorted, reference_sorted(&original));
    assert_eq!(on_device.get(0).unwrap(), sorted[0]);
}

#[test]
fn device_vector_element_access() {
    let Some(ctx) = gpu_context() else { return };
    let device = ctx.gpu_device().unwrap();

    let mut v = DeviceVector::filled_on(&device, 10, 7u32).unwrap();
    assert_eq!(v.len(), 10);
    v.set(3, 1).unwrap();
    v.set(9, 0).unwrap();
    assert_eq!(v.get(3).unwrap(), 1);
    assert_eq!(v.read_range(2..5).unwrap(), [7, 1, 7]);
    assert_eq!(v.get(10).unwrap_err(), SortError::IndexOutOfBounds { index: 10, len: 10 });

    ctx.sort(&mut v).unwrap();
    assert_eq!(v.to_vec().unwrap(), [0, 1, 7, 7, 7, 7, 7, 7, 7, 7]);

    let narrow = DeviceVector::from_slice_on(&device, &[1u8, 2, 3]);
    assert!(matches!(narrow, Err(SortError::InvalidLayout { .. })));
}

#[test]
fn registered_aggregate_sorts_through_the_network() {
    let Some(ctx) = gpu_context() else { return };
    register_pair();

    let by_key = |a: &Pair, b: &Pair| a.key < b.key;
    let original = random_pairs(5000, 3);

    let mut v = original.clone();
    ctx.sort(&mut v).unwrap();
    assert_sorted_by(&v, &by_key);
    assert_same_multiset(&v, &original);

    let mut v = original.clone();
    ctx.sort_by(&mut v, ValueDescending).unwrap();
    assert_sorted_by(&v, &ValueDescending);
    assert_same_multiset(&v, &original);

    let device = ctx.gpu_device().unwrap();
    let mut on_device = DeviceVector::from_slice_on(&device, &original).unwrap();
    ctx.sort_by(&mut on_device, ValueDescending).unwrap();
    assert_eq!(on_device.to_vec().unwrap(), v);
}

#[test]
fn registered_closure_runs_on_the_device() {
    let Some(ctx) = gpu_context() else { return };

    let by_abs = |a: &i32, b: &i32| a.unsigned_abs() < b.unsigned_abs();
    let original: Vec<i32> = random_i32(3000, 9).into_iter().map(|v| v % 100_000).collect();

    let mut v = original.clone();
    let err = ctx.sort_by(&mut v, |a: &i32, b: &i32| a % 7 < b % 7).unwrap_err();
    assert!(matches!(err, SortError::UnsupportedComparator { .. }));
    assert_eq!(v, original, "failed sort must not touch the data");

    register_comparator(ComparatorDescriptor::for_comparator::<i32, _>(
        &by_abs,
        "by_abs",
        "return abs(a) < abs(b);",
    ))
    .unwrap();
    ctx.sort_by(&mut v, by_abs).unwrap();
    assert_sorted_by(&v, &by_abs);
    assert_same_multiset(&v, &original);
}

#[test]
fn unregistered_types_fail_without_poisoning() {
    let Some(ctx) = gpu_context() else { return };

    let original: Vec<Stranger> = (0..100).rev().map(|v| Stranger { v }).collect();
    let mut v = original.clone();
    let err = ctx.sort(&mut v).unwrap_err();
    assert!(matches!(err, SortError::UnregisteredType { .. }));
    assert_eq!(v, original);

    let mut small = vec![Stranger { v: 2 }, Stranger { v: 1 }];
    assert!(matches!(ctx.sort(&mut small), Err(SortError::UnregisteredType { .. })));

    let mut single = vec![Stranger { v: 1 }];
    ctx.sort(&mut single).unwrap();

    assert!(ctx.failure().is_none());
    let mut fine = random_u32(500, 1);
    ctx.sort(&mut fine).unwrap();
}

#[test]
fn gpu_and_cpu_backends_agree() {
    let Some(ctx) = gpu_context() else { return };
    let serial = Context::serial();

    let original = random_f32(65_537, 123);
    let mut on_gpu = original.clone();
    let mut on_cpu = original.clone();
    ctx.sort(&mut on_gpu).unwrap();
    serial.sort(&mut on_cpu).unwrap();
    assert_eq!(on_gpu, on_cpu);

    let mut again = on_gpu.clone();
    ctx.sort(&mut again).unwrap();
    assert_eq!(again, on_gpu);
    assert!(hetsort::gpu::cached_artifact_count() > 0);
}

#[test]
fn caller_owned_queue_sorts_foreign_vectors() {
    let Some(shared) = gpu_context() else { return };

    let external = pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance.request_adapter(&wgpu::RequestAdapterOptions::default()).await.ok()?;
        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("caller_owned"),
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .ok()
    });
    let Some((device, queue)) = external else {
        eprintln!("skipping: no second device");
        return;
    };

    let ctx = Context::from_wgpu(device, queue).unwrap();
    assert_eq!(ctx.backend_kind(), BackendKind::Gpu);
    assert_ne!(ctx.gpu_device().unwrap().id(), shared.gpu_device().unwrap().id());

    let mut host = random_i64(2048, 5);
    let expected = reference_sorted_desc(&host);
    ctx.sort_by(&mut host, Greater).unwrap();
    assert_eq!(host, expected);

    let original = random_u32(1000, 6);
    let mut foreign = DeviceVector::from_slice_on(&shared.gpu_device().unwrap(), &original).unwrap();
    ctx.sort(&mut foreign).unwrap();
    assert_eq!(foreign.to_vec().unwrap(), reference_sorted(&original));
}

#[test]
fn signed_zeros_match_the_cpu_backends_bitwise() {
    let Some(ctx) = gpu_context() else { return };

    let mut original = random_f32(200, 41);
    original.extend((0..200).map(|i| if i % 2 == 0 { 0.0f32 } else { -0.0 }));
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();

    let mut reference = original.clone();
    Context::serial().sort(&mut reference).unwrap();

    let mut on_gpu = original.clone();
    ctx.sort(&mut on_gpu).unwrap();
    assert_eq!(bits(&on_gpu), bits(&reference));

    let mut small = original[..20].to_vec();
    let mut small_reference = small.clone();
    Context::serial().sort(&mut small_reference).unwrap();
    ctx.sort(&mut small).unwrap();
    assert_eq!(bits(&small), bits(&small_reference));
}

#[test]
fn broken_comparator_fails_alone_and_recovers_after_reregistration() {
    let Some(ctx) = gpu_context() else { return };
    register_type(
        TypeDescriptor::new::<Cell>("Cell", "struct Cell { v: u32 }").with_natural_order("return a.v < b.v;"),
    )
    .unwrap();
    register_comparator(ComparatorDescriptor::new::<Cell, CellDescending>(
        "cell_descending",
        "return a.missing_field > b.v;",
    ))
    .unwrap();

    let original: Vec<Cell> = random_u32(3000, 17).into_iter().map(|v| Cell { v }).collect();

    let mut v = original.clone();
    let first = ctx.sort_by(&mut v, CellDescending).unwrap_err();
    assert!(matches!(first, SortError::CompilationFailure { .. }), "{first:?}");
    assert_eq!(v, original);
    assert_eq!(ctx.sort_by(&mut v, CellDescending).unwrap_err(), first);
    assert!(ctx.failure().is_none());

    ctx.sort(&mut v).unwrap();
    assert_sorted_by(&v, &|a: &Cell, b: &Cell| a.v < b.v);

    register_comparator(ComparatorDescriptor::new::<Cell, CellDescending>(
        "cell_descending",
        "return a.v > b.v;",
    ))
    .unwrap();
    ctx.sort_by(&mut v, CellDescending).unwrap();
    assert_sorted_by(&v, &CellDescending);
    assert_same_multiset(&v, &original);
}
