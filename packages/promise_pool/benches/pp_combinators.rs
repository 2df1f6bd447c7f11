#![expect(missing_docs, reason = "benchmarks")]

use std::hint::black_box;
use std::pin::pin;
use std::task;
use std::task::Waker;

use criterion::{Criterion, criterion_group, criterion_main};
use promise_pool::{Promise, PromisePool, Rejection};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

fn entrypoint(c: &mut Criterion) {
    let mut g = c.benchmark_group("pp_deferred");

    // Steady state: the state object comes from the free list.
    let pool = PromisePool::new();

    g.bench_function("resolve_then_wait", |b| {
        b.iter(|| {
            let (resolver, promise) = pool.deferred::<u64>();
            resolver.resolve(black_box(42));
            black_box(promise.wait());
        });
    });

    g.bench_function("poll_resolve_poll", |b| {
        b.iter(|| {
            let (resolver, promise) = pool.deferred::<u64>();
            let mut promise = pin!(promise);

            let mut cx = task::Context::from_waker(Waker::noop());

            _ = black_box(promise.as_mut().poll(&mut cx));
            resolver.resolve(42);
            _ = black_box(promise.as_mut().poll(&mut cx));
        });
    });

    g.bench_function("continuation_chain_3", |b| {
        b.iter(|| {
            let (resolver, promise) = pool.deferred::<u64>();

            let chained = promise
                .on_resolve(|v| Ok(v + 1))
                .on_resolve(|v| Ok(v * 2))
                .on_resolve(|v| Ok(v - 1));

            resolver.resolve(black_box(20));
            black_box(chained.wait());
        });
    });

    g.finish();

    let mut g = c.benchmark_group("pp_combinators");

    for sources in [2_usize, 16, 128] {
        g.bench_function(format!("all_pending_{sources}"), |b| {
            b.iter(|| {
                let (resolvers, promises): (Vec<_>, Vec<_>) =
                    (0..sources).map(|_| pool.deferred::<usize>()).unzip();

                let joined = pool.all(promises);

                for (index, resolver) in resolvers.into_iter().enumerate() {
                    resolver.resolve(index);
                }

                black_box(joined.wait());
            });
        });

        g.bench_function(format!("all_settled_{sources}"), |b| {
            b.iter(|| {
                let joined = pool.all((0..sources).map(Promise::resolved));
                black_box(joined.wait());
            });
        });

        g.bench_function(format!("race_pending_{sources}"), |b| {
            b.iter(|| {
                let (resolvers, promises): (Vec<_>, Vec<_>) =
                    (0..sources).map(|_| pool.deferred::<usize>()).unzip();

                let raced = pool.race(promises).unwrap();

                for (index, resolver) in resolvers.into_iter().enumerate() {
                    resolver.resolve(index);
                }

                black_box(raced.wait());
            });
        });

        g.bench_function(format!("first_after_failures_{sources}"), |b| {
            b.iter(|| {
                let (resolvers, promises): (Vec<_>, Vec<_>) =
                    (0..sources).map(|_| pool.deferred::<usize>()).unzip();

                let winner = pool.first(promises).unwrap();

                for (index, resolver) in resolvers.into_iter().enumerate() {
                    if index + 1 == sources {
                        resolver.resolve(index);
                    } else {
                        resolver.reject(Rejection::msg("not this one"));
                    }
                }

                black_box(winner.wait());
            });
        });
    }

    g.bench_function("merge_3_pending", |b| {
        b.iter(|| {
            let (a, pa) = pool.deferred::<u64>();
            let (s, ps) = pool.deferred::<&'static str>();
            let (f, pf) = pool.deferred::<bool>();

            let merged = pool.merge((pa, ps, pf));

            a.resolve(1);
            s.resolve("two");
            f.resolve(true);

            black_box(merged.wait());
        });
    });

    g.finish();

    let mut g = c.benchmark_group("pp_cold");

    // Fresh pool every iteration, so every state object is allocated.
    g.bench_function("deferred_fresh_pool", |b| {
        b.iter(|| {
            let pool = PromisePool::new();
            let (resolver, promise) = pool.deferred::<u64>();
            resolver.resolve(black_box(42));
            black_box(promise.wait());
        });
    });

    g.finish();
}
