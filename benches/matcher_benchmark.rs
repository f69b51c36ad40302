//! Criterion benchmarks for signature matching
//!
//! These benchmarks measure:
//! - Ranking a crash against a growing bucket population
//! - Ranking with the top-frame prefilter enabled
//! - Foreign-match analysis over bucket representatives

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crash_triage::{
    matching::{ForeignMatchAnalyzer, ForeignMatchConfig, Matcher, MatchingConfig, Representative},
    models::Bucket,
    normalizer::{NormalizedCrash, StackFrame},
    signature::Signature,
};
use std::collections::HashSet;

fn crash(id: u64, frames: &[String]) -> NormalizedCrash {
    NormalizedCrash {
        crash_id: id,
        frames: frames.iter().map(|f| StackFrame::new(f.as_str())).collect(),
        crash_address: Some(0x10),
        output: Vec::new(),
    }
}

/// Buckets sharing a common root frame with varying tails
fn population(size: usize) -> (Vec<Bucket>, Vec<Representative>) {
    let mut buckets = Vec::with_capacity(size);
    let mut representatives = Vec::with_capacity(size);

    for i in 0..size {
        let frames: Vec<String> = (0..8)
            .map(|depth| match depth {
                0 => format!("module{}::entry", i % 16),
                d => format!("fn_{}_{}", d, (i + d) % 32),
            })
            .collect();
        let member = crash(i as u64 + 1, &frames);
        let mut bucket = Bucket::new(
            i as u64 + 1,
            format!("Crash in {}", frames[0]),
            Signature::from_crash(&member, 8),
        );
        bucket.add_member();

        representatives.push(Representative {
            bucket_id: bucket.id,
            crash: member,
        });
        buckets.push(bucket);
    }

    (buckets, representatives)
}

fn query() -> NormalizedCrash {
    let frames: Vec<String> = (0..8)
        .map(|depth| match depth {
            0 => "module3::entry".to_string(),
            d => format!("fn_{}_{}", d, (3 + d) % 32),
        })
        .collect();
    crash(0, &frames)
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");
    let crash = query();

    for size in [100, 1_000, 5_000] {
        let (buckets, _) = population(size);
        group.throughput(Throughput::Elements(size as u64));

        let matcher = Matcher::new(MatchingConfig::default());
        group.bench_with_input(BenchmarkId::new("edit_distance", size), &buckets, |b, buckets| {
            b.iter(|| matcher.rank(black_box(&crash), black_box(buckets)));
        });

        let prefiltered = Matcher::new(MatchingConfig {
            prefilter_top_frame: true,
            ..MatchingConfig::default()
        });
        group.bench_with_input(BenchmarkId::new("prefiltered", size), &buckets, |b, buckets| {
            b.iter(|| prefiltered.rank(black_box(&crash), black_box(buckets)));
        });
    }

    group.finish();
}

fn bench_foreign_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("foreign_analysis");
    let crash = query();
    let analyzer = ForeignMatchAnalyzer::new(ForeignMatchConfig::default());

    for size in [100, 1_000, 5_000] {
        let (buckets, representatives) = population(size);
        let candidate = &buckets[3];
        let exact: HashSet<u64> = [candidate.id].into_iter().collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            &representatives,
            |b, representatives| {
                b.iter(|| {
                    analyzer.analyze(
                        black_box(candidate),
                        black_box(&crash),
                        black_box(representatives),
                        black_box(&exact),
                    )
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_rank, bench_foreign_analysis);
criterion_main!(benches);
