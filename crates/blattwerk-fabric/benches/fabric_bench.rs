// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for closure computation and dispatch in the
// blattwerk-fabric crate.

use std::any::Any;
use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use blattwerk_core::types::Location;
use blattwerk_fabric::{Node, NodeId, Notice, Router};

/// Minimal node: answers id→location when primed, ignores notices.
struct BenchNode {
    answer: Option<Location>,
}

impl BenchNode {
    fn arc(answer: Option<&str>) -> Arc<dyn Node> {
        Arc::new(Self {
            answer: answer.map(Location::new),
        })
    }
}

impl Node for BenchNode {
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn location_for_id(&self, _id: &str) -> Option<Location> {
        self.answer.clone()
    }

    fn on_notice(&self, _from: NodeId, _notice: &Notice) -> bool {
        true
    }
}

/// Chain of `len` nodes: n0 → n1 → … — the worst case for closure depth.
fn build_chain(router: &Router, len: usize, tail_answers: bool) -> Vec<Arc<dyn Node>> {
    let nodes: Vec<Arc<dyn Node>> = (0..len)
        .map(|i| BenchNode::arc((tail_answers && i == len - 1).then_some("tail.djvu")))
        .collect();
    for pair in nodes.windows(2) {
        router.add_route(&pair[0], &pair[1]);
    }
    nodes
}

/// Benchmark BFS closure computation over chains of increasing depth.
fn bench_closure(c: &mut Criterion) {
    let mut group = c.benchmark_group("closure_chain");
    for &len in &[8usize, 64, 256] {
        let router = Router::new();
        let nodes = build_chain(&router, len, false);
        group.bench_function(format!("{len} hops"), |b| {
            b.iter(|| {
                let closure = router.closure(black_box(&nodes[0]), true);
                assert_eq!(closure.len(), len - 1);
                black_box(closure);
            });
        });
    }
    group.finish();
}

/// Benchmark request dispatch where only the farthest node answers — the
/// full closure is walked and every intermediate candidate declines.
fn bench_request_dispatch(c: &mut Criterion) {
    let router = Router::new();
    let nodes = build_chain(&router, 64, true);

    c.bench_function("location_for_id (answer at hop 63)", |b| {
        b.iter(|| {
            let answer = router.location_for_id(black_box(&nodes[0]), "member");
            assert!(answer.is_some());
            black_box(answer);
        });
    });
}

/// Benchmark notification fan-out to a flat set of listeners.
fn bench_notify(c: &mut Criterion) {
    let router = Router::new();
    let src = BenchNode::arc(None);
    let listeners: Vec<Arc<dyn Node>> = (0..32).map(|_| BenchNode::arc(None)).collect();
    for listener in &listeners {
        router.add_route(&src, listener);
    }

    let notice = Notice::Progress {
        percent: 50,
        status: "decoding".into(),
    };
    c.bench_function("notify (32 listeners)", |b| {
        b.iter(|| {
            let handled = router.notify(black_box(&src), &notice);
            assert!(handled);
        });
    });
}

criterion_group!(benches, bench_closure, bench_request_dispatch, bench_notify);
criterion_main!(benches);
