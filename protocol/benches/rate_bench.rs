// Exchange-rate and formatting benchmarks.
//
// These run on every reserve poll and every view render, so they should stay
// in the tens of nanoseconds. Covers PPS computation, share/asset
// conversion on both the direct and the split (overflow-avoiding) paths,
// decoding of ledger decimals, and display formatting.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use nova_credit_sync::config::SCALE;
use nova_credit_sync::exchange::{
    assets_to_shares, compute_pps, shares_to_assets, yield_from_samples, ReserveSnapshot, YieldSample,
};
use nova_credit_sync::format::{format_amount, format_fixed9, group_thousands};
use nova_credit_sync::numeric::decimal_raw;

fn pool() -> ReserveSnapshot {
    ReserveSnapshot {
        total_shares: 987_654_321_000,
        available_cash: 600_000_000_000,
        initial_exchange_rate: SCALE,
        reserve_amount: 12_345_000_000_000,
        total_borrowed: 450_000_000_000_000_000_000,
    }
}

fn bench_compute_pps(c: &mut Criterion) {
    let snapshot = pool();
    c.bench_function("rate/compute_pps", |b| {
        b.iter(|| compute_pps(black_box(&snapshot)));
    });
}

fn bench_conversions(c: &mut Criterion) {
    let pps = compute_pps(&pool()).unwrap_or(SCALE);
    let mut group = c.benchmark_group("rate/shares_to_assets");

    // u64-sized balances take the direct path, u128::MAX / 2 takes the split one
    for shares in [1_000u128, u64::MAX as u128, u128::MAX / 2] {
        group.bench_with_input(BenchmarkId::from_parameter(shares), &shares, |b, &shares| {
            b.iter(|| shares_to_assets(black_box(shares), pps, SCALE));
        });
    }
    group.finish();

    c.bench_function("rate/assets_to_shares", |b| {
        b.iter(|| assets_to_shares(black_box(1_234_567_890_123), pps, SCALE));
    });
}

fn bench_yield(c: &mut Criterion) {
    let first = YieldSample::new(1_000_000_000, 0);
    let second = YieldSample::new(1_000_136_986, 86_400);
    c.bench_function("rate/yield_from_samples", |b| {
        b.iter(|| yield_from_samples(black_box(&first), black_box(&second), 300));
    });
}

fn bench_decode(c: &mut Criterion) {
    let shapes = [
        ("bare", json!("1500000000")),
        ("wrapped", json!([{ "value": "1500000000" }])),
        ("nested", json!({ "inner": { "raw": 1500000000u64 } })),
    ];
    let mut group = c.benchmark_group("numeric/decimal_raw");
    for (name, value) in &shapes {
        group.bench_with_input(BenchmarkId::from_parameter(name), value, |b, value| {
            b.iter(|| decimal_raw(black_box(value)));
        });
    }
    group.finish();
}

fn bench_format(c: &mut Criterion) {
    c.bench_function("format/amount", |b| {
        b.iter(|| format_amount(black_box(123_456_789_012_345), 6));
    });
    c.bench_function("format/fixed9", |b| {
        b.iter(|| format_fixed9(black_box(1_000_136_986)));
    });
    c.bench_function("format/group_thousands", |b| {
        b.iter(|| group_thousands(black_box("340282366920938463463374607431768211455")));
    });
}

criterion_group!(
    benches,
    bench_compute_pps,
    bench_conversions,
    bench_yield,
    bench_decode,
    bench_format,
);
criterion_main!(benches);
