use criterion::{black_box, criterion_group, criterion_main, Criterion};
use overlord::balancer::weight_for_load;
use overlord::queen::survey::aggregate;
use overlord::{FleetSnapshot, Worker};

fn test_fleet(count: u64) -> FleetSnapshot {
    FleetSnapshot {
        workers: (0..count)
            .map(|i| {
                Worker::new(
                    i,
                    format!("web{}", i),
                    format!("10.0.{}.{}", i / 250, i % 250),
                    format!("203.0.{}.{}", i / 250, i % 250),
                )
            })
            .collect(),
        ..FleetSnapshot::default()
    }
}

pub fn bench_weights(c: &mut Criterion) {
    let loads: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();

    c.bench_function("weights for 100 workers", |b| {
        b.iter(|| {
            for load in &loads {
                let _ = weight_for_load(black_box(*load), 0.7);
            }
        })
    });
}

pub fn bench_aggregate(c: &mut Criterion) {
    let fleet = test_fleet(100);
    let payloads: Vec<Vec<u8>> = fleet
        .workers
        .iter()
        .map(|w| format!("{},0.5", w.private_address).into_bytes())
        .collect();

    c.bench_function("aggregate 100 responses", |b| {
        b.iter(|| {
            let _ = aggregate(black_box(&payloads).iter().map(Vec::as_slice), &fleet);
        })
    });
}

criterion_group!{
    name = benches;
    config = Criterion::default();
    targets = bench_weights, bench_aggregate
}
criterion_main!(benches);
