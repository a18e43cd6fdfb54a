use criterion::*;
use std::hint::black_box;

use hetsort::{select_strategy, BackendKind, ComparatorInfo, Direction, ElementInfo, SortConfig};

mod common;
use common::*;

fn strategy_benchmark(c: &mut Criterion) {
    let config = SortConfig::default();
    let element = ElementInfo::of::<u32>();
    let aggregate = ElementInfo::of::<Agent>();
    let natural = ComparatorInfo {
        type_id: std::any::TypeId::of::<hetsort::Less>(),
        name: "Less",
        direction: Some(Direction::Ascending),
    };
    let custom = ComparatorInfo {
        type_id: std::any::TypeId::of::<()>(),
        name: "custom",
        direction: None,
    };

    c.bench_function("select_strategy_all_backends", |b| {
        b.iter(|| {
            for backend in [BackendKind::Gpu, BackendKind::MultiCore, BackendKind::Serial] {
                for len in [0usize, 16, 4096, ELEMENTS_LARGE] {
                    black_box(select_strategy(&element, &natural, len, backend, &config));
                    black_box(select_strategy(&aggregate, &custom, len, backend, &config));
                }
            }
        });
    });
}

criterion_group!(benches, strategy_benchmark);
criterion_main!(benches);
