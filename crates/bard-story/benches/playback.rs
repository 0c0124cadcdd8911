//! Playback performance benchmarks
//!
//! Benchmarks for the hot paths of a replay:
//! - Building the dependency graph
//! - Scheduling capture and shuffled orders
//! - Playing a log against the simulated backdrop
//! - Log encoding and decoding
//!
//! Run with: cargo bench -p bard-story

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use bard_core::SimulatedBackdrop;
use bard_storage::EventLog;
use bard_story::{
    DependencyGraph, PlayOrder, StatsCollector, StoryConfig, StoryTeller, SynthConfig, synth,
};

fn trace(events: usize) -> Arc<EventLog> {
    Arc::new(synth::synthesize(
        SynthConfig::default().with_events(events).with_seed(17),
    ))
}

// ============================================================================
// Scheduling
// ============================================================================

fn bench_dependency_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("dependency_graph");

    for events in [1_000, 10_000] {
        let log = trace(events);
        group.bench_with_input(BenchmarkId::new("build", events), &log, |b, log| {
            b.iter(|| DependencyGraph::build(black_box(log)))
        });

        let graph = DependencyGraph::build(&log);
        group.bench_with_input(BenchmarkId::new("shuffle", events), &graph, |b, graph| {
            b.iter(|| {
                PlayOrder::Shuffled { seed: 3 }
                    .resolve(black_box(graph))
                    .unwrap()
            })
        });
    }

    group.finish();
}

// ============================================================================
// Playback
// ============================================================================

fn bench_playback(c: &mut Criterion) {
    let mut group = c.benchmark_group("playback");
    let log = trace(10_000);

    for (name, order) in [
        ("capture", PlayOrder::Capture),
        ("shuffled", PlayOrder::Shuffled { seed: 3 }),
    ] {
        let config = StoryConfig::default().with_record_durations(false);
        let mut teller = StoryTeller::with_config(Arc::clone(&log), config);
        let stats = StatsCollector::new();

        group.bench_function(name, |b| {
            b.iter(|| {
                teller.reset();
                let mut backdrop = SimulatedBackdrop::new();
                teller.run(&order, &mut backdrop, &stats).unwrap()
            })
        });
    }

    let mut teller = StoryTeller::new(Arc::clone(&log));
    let stats = StatsCollector::new();
    group.bench_function("capture_timed", |b| {
        b.iter(|| {
            teller.reset();
            teller
                .run(&PlayOrder::Capture, &mut SimulatedBackdrop::new(), &stats)
                .unwrap()
        })
    });

    group.finish();
}

// ============================================================================
// Log format
// ============================================================================

fn bench_log_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_codec");
    let log = trace(10_000);
    let bytes = log.encode().unwrap();

    group.bench_function("encode_10k", |b| b.iter(|| black_box(&log).encode().unwrap()));
    group.bench_function("decode_10k", |b| {
        b.iter(|| EventLog::decode(black_box(&bytes)).unwrap())
    });

    group.finish();
}

criterion_group!(benches, bench_dependency_graph, bench_playback, bench_log_codec);
criterion_main!(benches);
