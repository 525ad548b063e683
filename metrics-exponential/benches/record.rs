use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use metrics_exponential::indexer::ExponentialHistogramIndexer;
use metrics_exponential::{
    Aggregator, Attributes, Context, HistogramStorage, InstrumentDescriptor, Temporality,
};

fn indexer_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Indexer");
    for scale in [-4, 0, 3, 10, 20] {
        let indexer = ExponentialHistogramIndexer::get(scale);
        group.bench_function(format!("compute index (scale {scale})"), |b| {
            let mut value = 1.0f64;
            b.iter(|| {
                value = if value > 1e9 { 1.0 } else { value * 1.37 };
                indexer.compute_index(value)
            })
        });
    }
    group.finish();
}

fn handle_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Handle");
    group.bench_function("record (narrow range)", |b| {
        let bound = Aggregator::default().create_handle();
        let attrs = Attributes::empty();
        let ctx = Context::none();
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            bound.record_double(100.0 + (i % 50) as f64, &attrs, &ctx);
        })
    });
    group.bench_function("record (downscaling)", |b| {
        let aggregator = Aggregator::default();
        let attrs = Attributes::empty();
        let ctx = Context::none();
        b.iter_batched(
            || aggregator.create_handle(),
            |bound| {
                for exponent in -30..30 {
                    bound.record_double(10f64.powi(exponent), &attrs, &ctx);
                }
                bound
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

fn storage_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("Storage");
    group.bench_function("record (existing series)", |b| {
        let aggregator = Aggregator::builder().with_temporality(Temporality::Delta).build();
        let storage = HistogramStorage::new(InstrumentDescriptor::new("bench"), aggregator);
        let attrs = Attributes::from(&[("service", "bench"), ("route", "/")][..]);
        let ctx = Context::none();
        b.iter(|| storage.record_double(0.25, &attrs, &ctx))
    });
    group.bench_function("collect (100 series)", |b| {
        let aggregator = Aggregator::builder().with_temporality(Temporality::Delta).build();
        let storage = HistogramStorage::new(InstrumentDescriptor::new("bench"), aggregator);
        let series: Vec<Attributes> = (0..100)
            .map(|i| Attributes::from(vec![metrics::Label::new("id", i.to_string())]))
            .collect();
        let ctx = Context::none();
        b.iter(|| {
            for attrs in &series {
                storage.record_double(1.5, attrs, &ctx);
            }
            storage.collect()
        })
    });
    group.finish();
}

criterion_group!(benches, indexer_benchmark, handle_benchmark, storage_benchmark);
criterion_main!(benches);
