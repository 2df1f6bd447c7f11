//! Basic usage of `PromisePool`: deferred operations, continuations and combinators.
//!
//! Producers run on worker threads while the main thread waits on the combined result.

use std::thread;
use std::time::Duration;

use promise_pool::{Outcome, PromisePool, Rejection};

fn main() {
    println!("=== Promise Pool Basic Example ===");

    let pool = PromisePool::new();

    // Start three "downloads" that finish at different times.
    let downloads = (1..=3_u64)
        .map(|id| {
            let (resolver, promise) = pool.deferred::<u64>();

            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * id));
                resolver.resolve(id * 100);
            });

            promise.on_resolve(|bytes| Ok(bytes / 100))
        })
        .collect::<Vec<_>>();

    let all = pool.all(downloads);

    match all.wait() {
        Outcome::Resolved(sizes) => println!("All downloads done: {sizes:?}"),
        other => println!("Downloads did not complete: {other:?}"),
    }

    // A mirror that fails does not stop `first()` from taking the one that works.
    let (broken, broken_promise) = pool.deferred::<&str>();
    let (working, working_promise) = pool.deferred::<&str>();

    let mirror = pool
        .first([broken_promise, working_promise])
        .expect("two sources were given");

    broken.reject(Rejection::msg("mirror offline"));
    working.resolve("https://mirror.example/file");

    println!("Using mirror: {:?}", mirror.wait());

    // Heterogeneous results join into a tuple.
    let (name, name_promise) = pool.deferred::<String>();
    let (size, size_promise) = pool.deferred::<usize>();

    let summary = pool.merge((name_promise, size_promise));

    name.resolve("report.pdf".to_string());
    size.resolve(4096);

    println!("Summary: {:?}", summary.wait());

    let stats = pool.stats();
    println!(
        "State objects allocated: {}, reused: {}",
        stats.allocated, stats.reused
    );

    println!("Example completed successfully!");
}
