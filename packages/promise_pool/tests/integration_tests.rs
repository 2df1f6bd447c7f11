//! Integration tests for the promise pool, exercising the public API end to end on a single
//! thread. Concurrency is covered in `thread_safety_tests.rs`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::executor::block_on;
use promise_pool::{
    CancellationToken, Error, Inline, Outcome, Promise, PromisePool, Rejection,
};

fn counting_pool() -> (PromisePool, Arc<AtomicUsize>) {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&reported);

    let pool = PromisePool::builder()
        .on_unhandled_rejection(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        })
        .build();

    (pool, reported)
}

#[test]
fn handle_is_invalid_after_recycle() {
    let pool = PromisePool::new();
    let (resolver, promise) = pool.deferred::<u32>();
    let handle = promise.handle().unwrap();

    resolver.resolve(1);
    assert_eq!(promise.wait(), Outcome::Resolved(1));
    drop(promise);

    assert!(!handle.is_valid());
    assert!(matches!(handle.state(), Err(Error::StaleHandle { .. })));

    // The recycled state object now serves an unrelated operation.
    let (resolver, promise) = pool.deferred::<u32>();
    resolver.resolve(2);

    assert!(!handle.is_valid());
    assert!(handle.upgrade().is_none());
    assert_eq!(promise.handle().unwrap().state().unwrap(), Some(Outcome::Resolved(2)));
}

#[test]
fn all_preserves_input_order() {
    let pool = PromisePool::new();

    let (resolvers, promises): (Vec<_>, Vec<_>) =
        (0..5).map(|_| pool.deferred::<usize>()).unzip();

    let joined = pool.all(promises);

    // Complete in reverse order.
    for (index, resolver) in resolvers.into_iter().enumerate().rev() {
        resolver.resolve(index * 10);
    }

    assert_eq!(joined.wait(), Outcome::Resolved(vec![0, 10, 20, 30, 40]));
}

#[test]
fn all_first_failure_tie_break_follows_input_order() {
    let pool = PromisePool::new();
    let early = Rejection::msg("early");
    let late = Rejection::msg("late");

    let joined = pool.all([
        Promise::resolved(1),
        Promise::rejected(early.clone()),
        Promise::rejected(late),
    ]);

    assert_eq!(joined.wait(), Outcome::Rejected(early));
}

#[test]
fn all_later_rejections_are_not_reported() {
    let (pool, reported) = counting_pool();
    let (a, pa) = pool.deferred::<u32>();
    let (b, pb) = pool.deferred::<u32>();

    let joined = pool.all([pa, pb]);

    a.reject(Rejection::msg("first"));
    b.reject(Rejection::msg("second"));

    assert!(joined.wait().is_rejected());
    drop(joined);

    assert_eq!(reported.load(Ordering::Relaxed), 0);
}

#[test]
fn empty_all_does_not_allocate() {
    let pool = PromisePool::new();

    let joined = pool.all(std::iter::empty::<Promise<String>>());

    assert_eq!(joined.wait(), Outcome::Resolved(Vec::new()));
    assert_eq!(pool.stats().allocated, 0);
}

#[test]
fn race_resolution_wins_and_loser_is_suppressed() {
    let (pool, reported) = counting_pool();
    let (a, pa) = pool.deferred::<&str>();
    let (b, pb) = pool.deferred::<&str>();

    let raced = pool.race([pa, pb]).unwrap();

    a.resolve("winner");
    b.reject(Rejection::msg("loser"));

    assert_eq!(raced.wait(), Outcome::Resolved("winner"));
    drop(raced);

    assert_eq!(reported.load(Ordering::Relaxed), 0);
}

#[test]
fn race_and_first_reject_empty_input() {
    let pool = PromisePool::new();

    assert!(matches!(
        pool.race(Vec::<Promise<u8>>::new()),
        Err(Error::NoSources { .. })
    ));
    assert!(matches!(
        pool.first(Vec::<Promise<u8>>::new()),
        Err(Error::NoSources { .. })
    ));
}

#[test]
fn first_waits_out_rejection() {
    let pool = PromisePool::new();
    let (a, pa) = pool.deferred::<u32>();
    let (b, pb) = pool.deferred::<u32>();

    let winner = pool.first([pa, pb]).unwrap();

    a.reject(Rejection::msg("x"));
    assert!(winner.try_outcome().is_none());

    b.resolve(9);
    assert_eq!(winner.wait(), Outcome::Resolved(9));
}

#[test]
fn first_all_fail_fallback_is_last_source() {
    let pool = PromisePool::new();
    let (a, pa) = pool.deferred::<u32>();
    let (b, pb) = pool.deferred::<u32>();
    let (c, pc) = pool.deferred::<u32>();
    let last = Rejection::msg("c failed");

    let winner = pool.first([pa, pb, pc]).unwrap();

    c.reject(last.clone());
    a.reject(Rejection::msg("a failed"));
    b.cancel();

    assert_eq!(winner.wait(), Outcome::Rejected(last));
}

#[test]
fn merge_joins_heterogeneous_values() {
    let pool = PromisePool::new();
    let (id, id_promise) = pool.deferred::<u64>();
    let (name, name_promise) = pool.deferred::<String>();

    let joined = pool.merge((id_promise, name_promise, Promise::resolved(true)));

    name.resolve("alpha".to_string());
    id.resolve(7);

    assert_eq!(
        joined.wait(),
        Outcome::Resolved((7, "alpha".to_string(), true))
    );
}

#[test]
fn merge_adopts_first_failure() {
    let pool = PromisePool::new();
    let (id, id_promise) = pool.deferred::<u64>();
    let (_name, name_promise) = pool.deferred::<String>();

    let joined = pool.merge((id_promise, name_promise));
    id.cancel();

    assert_eq!(joined.wait(), Outcome::Canceled);
}

#[test]
fn continuation_cancellation_never_invokes_callback() {
    let pool = PromisePool::new();
    let token = CancellationToken::new();
    let invoked = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&invoked);

    let (resolver, promise) = pool.deferred::<u32>();
    let downstream = promise.on_settle(
        move |outcome| {
            counter.fetch_add(1, Ordering::Relaxed);
            outcome
        },
        Some(&token),
    );

    token.cancel();
    assert_eq!(downstream.try_outcome(), Some(Outcome::Canceled));

    resolver.resolve(1);

    assert_eq!(downstream.wait(), Outcome::Canceled);
    assert_eq!(invoked.load(Ordering::Relaxed), 0);
}

#[test]
fn panicking_callback_rejects_downstream() {
    let pool = PromisePool::new();
    let (resolver, promise) = pool.deferred::<u32>();

    let downstream = promise.finally(|| panic!("cleanup failed"));
    resolver.resolve(1);

    assert!(downstream.wait().is_rejected());
}

#[test]
fn unhandled_rejection_reported_exactly_once() {
    let (pool, reported) = counting_pool();

    let (resolver, promise) = pool.deferred::<u32>();
    let clone = promise.clone();
    resolver.reject(Rejection::msg("nobody listens"));

    drop(promise);
    assert_eq!(reported.load(Ordering::Relaxed), 0);

    drop(clone);
    assert_eq!(reported.load(Ordering::Relaxed), 1);

    // The recycled state object starts with a clean slate.
    let (resolver, promise) = pool.deferred::<u32>();
    resolver.resolve(1);
    drop(promise);

    assert_eq!(reported.load(Ordering::Relaxed), 1);
}

#[test]
fn observed_or_suppressed_rejection_is_not_reported() {
    let (pool, reported) = counting_pool();

    let (resolver, promise) = pool.deferred::<u32>();
    resolver.reject(Rejection::msg("seen"));
    assert!(promise.wait().is_rejected());
    drop(promise);

    let (resolver, promise) = pool.deferred::<u32>();
    promise.suppress_unhandled_report();
    resolver.reject(Rejection::msg("ignored on purpose"));
    drop(promise);

    assert_eq!(reported.load(Ordering::Relaxed), 0);
}

#[test]
fn rejection_propagated_through_continuation_is_reported_downstream() {
    let (pool, reported) = counting_pool();

    let (resolver, promise) = pool.deferred::<u32>();
    let downstream = promise.on_resolve(|v| Ok(v + 1));
    resolver.reject(Rejection::msg("passes through"));

    assert_eq!(reported.load(Ordering::Relaxed), 0);

    drop(downstream);
    assert_eq!(reported.load(Ordering::Relaxed), 1);
}

#[test]
fn dropped_resolver_cancels() {
    let pool = PromisePool::new();
    let (resolver, promise) = pool.deferred::<Vec<u8>>();

    drop(resolver);

    assert_eq!(block_on(promise), Outcome::Canceled);
}

#[test]
fn await_combined_promise() {
    let pool = PromisePool::new();
    let (a, pa) = pool.deferred::<u32>();
    let (b, pb) = pool.deferred::<u32>();

    let joined = pool.all([pa, pb]);

    a.resolve(1);
    b.resolve(2);

    let outcome = block_on(async { joined.await });
    assert_eq!(outcome, Outcome::Resolved(vec![1, 2]));
}

#[test]
fn steady_state_reuses_state_objects() {
    let pool = PromisePool::new();

    for round in 0..10_u32 {
        let (a, pa) = pool.deferred::<u32>();
        let (b, pb) = pool.deferred::<u32>();
        let joined = pool.all([pa, pb]);

        a.resolve(round);
        b.resolve(round);

        assert_eq!(joined.wait(), Outcome::Resolved(vec![round, round]));
    }

    let stats = pool.stats();

    // Two deferred state objects plus one combinator, allocated once and reused after.
    assert_eq!(stats.allocated, 3);
    assert_eq!(stats.reused, 27);
}

#[test]
fn inline_dispatcher_configured_explicitly() {
    let pool = PromisePool::builder().dispatch(Inline::new()).build();
    let (resolver, promise) = pool.deferred::<u32>();

    let doubled = promise.on_resolve(|v| Ok(v * 2));
    resolver.resolve(4);

    // Inline dispatch runs the callback during `resolve()`.
    assert_eq!(doubled.try_outcome(), Some(Outcome::Resolved(8)));
}

#[test]
fn race_prefers_already_resolved_source() {
    let pool = PromisePool::new();

    let raced = pool
        .race([Promise::rejected(Rejection::msg("r")), Promise::resolved(5)])
        .unwrap();

    assert_eq!(raced.wait(), Outcome::Resolved(5));
}

#[test]
fn handle_state_does_not_count_as_handling() {
    let (pool, reported) = counting_pool();
    let (resolver, promise) = pool.deferred::<u32>();
    let handle = promise.handle().unwrap();

    resolver.reject(Rejection::msg("only inspected"));
    assert!(handle.state().unwrap().as_ref().is_some_and(Outcome::is_rejected));

    drop(promise);
    assert_eq!(reported.load(Ordering::Relaxed), 1);
}
