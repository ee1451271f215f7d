use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

use exhibit::database::Database;
use exhibit::range::{RangeIndex, RangeValue};
use exhibit::set::Set;

fn numbered(from: usize, to: usize) -> Set {
    (from..to).map(|n| format!("item{}", n)).collect()
}

pub fn intersection_benchmark(c: &mut Criterion) {
    for size in [1, 1_000, 100_000] {
        let a = numbered(0, size);
        let b = numbered(size / 2, size + size / 2);
        c.bench_function(&format!("intersect {}", size), |bench| {
            bench.iter(|| Set::create_intersection(black_box(&a), black_box(&b), None))
        });
    }
}

pub fn range_benchmark(c: &mut Criterion) {
    let items = numbered(0, 100_000);
    let index = RangeIndex::new(&items, |item| {
        let n: f64 = item.trim_start_matches("item").parse().unwrap_or(0.0);
        vec![RangeValue::Number(n % 1_000.0)]
    });
    let (from, to) = (RangeValue::Number(250.0), RangeValue::Number(260.0));
    c.bench_function("range count 100k", |bench| bench.iter(|| index.count_range(black_box(&from), &to, false)));
    c.bench_function("range subjects 100k", |bench| {
        bench.iter(|| index.get_subjects_in_range(black_box(&from), &to, false, None, None))
    });

    let mut database = Database::new();
    let people: Vec<_> = (0..10_000).map(|n| json!({ "label": format!("p{}", n), "age": n % 90 })).collect();
    database.load_data(&json!({ "items": people }), "http://localhost/").unwrap();
    let (young, old) = (RangeValue::Number(20.0), RangeValue::Number(30.0));
    c.bench_function("database range 10k", |bench| {
        bench.iter(|| database.get_subjects_in_range("age", black_box(&young), &old, true, None, None))
    });
}

criterion_group!(benches, intersection_benchmark, range_benchmark);
criterion_main!(benches);
