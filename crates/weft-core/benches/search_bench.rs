//! # Search Benchmarks
//!
//! Performance benchmarks for weft-core template search.
//!
//! Run with: `cargo bench -p weft-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use weft_core::{CorpusBuilder, FeatureValue, MemoryCorpus, NodeId, Session, Strategy};

const LETTERS: [&str; 5] = ["a", "b", "c", "d", "e"];

/// A synthetic corpus of `sentences` sentences, each of 4 words of 3
/// letters, with a `next` edge between consecutive letters of a word.
fn create_corpus(sentences: u64) -> MemoryCorpus {
    let slots = sentences * 12;
    let mut b = CorpusBuilder::new("letter", slots);
    b.declare_edge_feature("next", None);
    for s in 0..sentences {
        let first = s * 12 + 1;
        for w in 0..4 {
            let word: Vec<u64> = (0..3).map(|i| first + w * 3 + i).collect();
            for (i, slot) in word.iter().enumerate() {
                let letter = LETTERS[(*slot as usize * 7 + i) % LETTERS.len()];
                b.set_value("g", NodeId(*slot), FeatureValue::text(letter))
                    .expect("letter");
                if i > 0 {
                    b.add_edge("next", NodeId(slot - 1), NodeId(*slot), None)
                        .expect("edge");
                }
            }
            b.add_node("word", &word).expect("word");
        }
        let all: Vec<u64> = (first..first + 12).collect();
        b.add_node("sentence", &all).expect("sentence");
    }
    b.build().expect("corpus")
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_study(c: &mut Criterion) {
    let mut group = c.benchmark_group("study");
    let template = "sentence\n  w1:word\n  < w2:word\n    letter g=a";

    for size in [100, 1000].iter() {
        let session = Session::new(create_corpus(*size));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(session.study(template, None).expect("study")));
        });
    }

    group.finish();
}

fn bench_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fetch");
    let template = "sentence\n  word\n    l1:letter g=a\n    -next> l2:letter";

    for size in [100, 1000].iter() {
        let session = Session::new(create_corpus(*size));
        let query = session.study(template, None).expect("study");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(query.fetch(None)));
        });
    }

    group.finish();
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategies");
    let session = Session::new(create_corpus(500));
    let template = "s:sentence\n  w1:word\n  w2:word\n    letter g=b\nw1 << w2";

    for strategy in Strategy::ALL {
        group.bench_function(strategy.name(), |b| {
            b.iter(|| {
                let query = session
                    .study(template, Some(strategy.name()))
                    .expect("study");
                black_box(query.count(None, Some(0)))
            });
        });
    }

    group.finish();
}

fn bench_quantifiers(c: &mut Criterion) {
    let session = Session::new(create_corpus(500));
    let template = "word\n/without/\n  letter g=c\n/-/";

    c.bench_function("quantifier_without", |b| {
        b.iter(|| black_box(session.search(template, None).expect("search")));
    });
}

criterion_group!(
    benches,
    bench_study,
    bench_fetch,
    bench_strategies,
    bench_quantifiers
);
criterion_main!(benches);
