#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing the `promise_pool` package.

use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::Duration;

/// Runs a test with a timeout to prevent infinite hangs.
///
/// A lost wakeup or a combinator that never settles shows up as a hang rather than a failure,
/// so every multithreaded test runs under this watchdog. If the test takes longer than the
/// timeout to complete, the watchdog panics instead of letting CI hang.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where thread
/// synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly, so mutation testing can detect hanging
/// mutations through its own timeout.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode) and resumes the
/// panic of the test itself if it panicked.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::spawn(move || {
        let result = test_fn();
        // If this fails, the receiver has already timed out.
        drop(tx.send(result));
    });

    let timeout = if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    };

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("Test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("Test exceeded {timeout:?} timeout - likely a lost wakeup or deadlock");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("Test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

/// Runs `work` on `threads` threads at once, returning the results in thread index order.
///
/// All threads are released together from a barrier to maximize the chance of the racing
/// interleavings that concurrency tests want to provoke. A panic on any thread is resumed on
/// the caller.
///
/// # Example
///
/// ```rust
/// use testing::run_concurrently;
///
/// let squares = run_concurrently(4, |index| index * index);
///
/// assert_eq!(squares, vec![0, 1, 4, 9]);
/// ```
pub fn run_concurrently<F, R>(threads: usize, work: F) -> Vec<R>
where
    F: Fn(usize) -> R + Send + Sync + 'static,
    R: Send + 'static,
{
    let barrier = Arc::new(Barrier::new(threads));
    let work = Arc::new(work);

    let handles = (0..threads)
        .map(|index| {
            let barrier = Arc::clone(&barrier);
            let work = Arc::clone(&work);

            thread::spawn(move || {
                barrier.wait();
                work(index)
            })
        })
        .collect::<Vec<_>>();

    handles
        .into_iter()
        .map(|handle| match handle.join() {
            Ok(result) => result,
            Err(e) => std::panic::resume_unwind(e),
        })
        .collect()
}

/// How many iterations a stress test should run.
///
/// Miri executes each iteration orders of magnitude slower, so it gets a token amount.
#[must_use]
pub fn stress_iterations(normal: usize) -> usize {
    if cfg!(miri) { normal.min(4) } else { normal }
}
