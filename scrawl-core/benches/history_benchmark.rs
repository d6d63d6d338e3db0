use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use scrawl_core::{BoardHistory, Point, StrokeInput};
use uuid::Uuid;

fn test_stroke(points: usize) -> StrokeInput {
    StrokeInput {
        path: (0..points)
            .map(|i| Point::new(i as f32, (i * 2) as f32))
            .collect(),
        color: [0.2, 0.4, 0.8, 1.0],
        width: 2.0,
    }
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("History Operations");
    group.throughput(Throughput::Elements(1));

    group.bench_function("append_64_point_stroke", |b| {
        // Measures appending to an ever-growing history, which is the
        // steady-state shape of a live board.
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();
        let input = test_stroke(64);

        b.iter(|| {
            let record = history
                .append(history.epoch(), author, black_box(input.clone()))
                .unwrap();
            black_box(record);
        })
    });

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("History Operations");
    group.throughput(Throughput::Elements(1));

    // A board with 1k strokes is a busy but realistic session.
    let mut history = BoardHistory::new();
    let author = Uuid::new_v4();
    for _ in 0..1_000 {
        history.append(0, author, test_stroke(64)).unwrap();
    }

    group.bench_function("snapshot_1k_strokes", |b| {
        b.iter(|| {
            let (epoch, strokes) = history.snapshot();
            black_box((epoch, strokes));
        })
    });

    group.finish();
}

fn bench_clear(c: &mut Criterion) {
    let mut group = c.benchmark_group("History Operations");
    group.throughput(Throughput::Elements(1));

    group.bench_function("clear_then_append", |b| {
        let mut history = BoardHistory::new();
        let author = Uuid::new_v4();
        let input = test_stroke(16);

        b.iter(|| {
            let epoch = history.clear();
            history
                .append(epoch, author, black_box(input.clone()))
                .unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, bench_append, bench_snapshot, bench_clear);
criterion_main!(benches);
