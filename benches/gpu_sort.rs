use criterion::*;
use std::hint::black_box;

use hetsort::{
    register_type, BackendHint, Context, DeviceVector, Greater, TypeDescriptor,
};

mod common;
use common::*;

fn gpu_context() -> Option<Context> {
    match Context::new(BackendHint::Gpu) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping GPU benchmarks: {e}");
            None
        }
    }
}

fn gpu_host_benchmark(c: &mut Criterion) {
    let Some(ctx) = gpu_context() else { return };
    register_type(
        TypeDescriptor::new::<Agent>("Agent", "struct Agent { wealth: f32, id: u32 }")
            .with_natural_order("return a.wealth < b.wealth;"),
    )
    .unwrap();

    let mut group = c.benchmark_group("gpu_host");
    group.sample_size(20);

    for &len in &[ELEMENTS_MED, ELEMENTS_LARGE] {
        let keys = random_u32(len, 1);
        let agents = random_agents(len, 3);
        group.throughput(Throughput::Elements(len as u64));

        // Warm the artifact cache so only the sort itself is measured.
        ctx.sort(&mut keys.clone()).unwrap();
        ctx.sort(&mut agents.clone()).unwrap();

        group.bench_with_input(BenchmarkId::new("radix_u32", len), &keys, |b, keys| {
            b.iter_batched(
                || keys.clone(),
                |mut v| {
                    ctx.sort(&mut v).unwrap();
                    black_box(v);
                },
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("bitonic_agents", len), &agents, |b, agents| {
            b.iter_batched(
                || agents.clone(),
                |mut v| {
                    ctx.sort(&mut v).unwrap();
                    black_box(v);
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn gpu_device_benchmark(c: &mut Criterion) {
    let Some(ctx) = gpu_context() else { return };
    let Some(device) = ctx.gpu_device() else { return };

    let floats = random_f64(ELEMENTS_LARGE, 2);
    let mut on_device = DeviceVector::from_slice_on(&device, &floats).unwrap();
    ctx.sort_by(&mut on_device, Greater).unwrap();

    let mut group = c.benchmark_group("gpu_device");
    group.sample_size(20);
    group.throughput(Throughput::Elements(ELEMENTS_LARGE as u64));

    group.bench_function("radix_f64_desc_resident_4M", |b| {
        b.iter(|| {
            ctx.sort_by(&mut on_device, Greater).unwrap();
            black_box(&on_device);
        });
    });

    group.finish();
}

criterion_group!(benches, gpu_host_benchmark, gpu_device_benchmark);
criterion_main!(benches);
