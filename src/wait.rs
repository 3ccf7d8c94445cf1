//! Cooperative polling primitive
//!
//! Every readiness wait in the fleet goes through [`poll`] or
//! [`poll_with_result`]. Hundreds of tasks may be waiting at once across
//! clusters, so waits must not hold an OS thread each: the caller's async
//! task suspends between checks and the runtime multiplexes the timers.
//!
//! A check that returns an error counts as a negative observation and is
//! trace-logged, never propagated; only the timeout budget produces a
//! non-success outcome.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Poll `condition` every `interval` until it returns `true` or `timeout`
/// elapses.
///
/// The first evaluation happens after an initial delay equal to `interval`;
/// use [`poll_with_initial_delay`] to control it. Errors from the condition
/// are treated as `false` observations. Returns `true` as soon as the
/// condition holds, `false` once the timeout elapses.
pub async fn poll<F, Fut, E>(interval: Duration, timeout: Duration, condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, E>>,
    E: Display,
{
    poll_with_initial_delay(interval, interval, timeout, condition).await
}

/// [`poll`] with an explicit delay before the first evaluation.
pub async fn poll_with_initial_delay<F, Fut, E>(
    initial_delay: Duration,
    interval: Duration,
    timeout: Duration,
    mut condition: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<bool, E>>,
    E: Display,
{
    let deadline = Instant::now() + timeout;
    let mut delay = initial_delay;

    loop {
        let wake = Instant::now() + delay;
        if wake >= deadline {
            // Out of budget: sleep out the remainder so the externally
            // observed wait is never shorter than the timeout.
            tokio::time::sleep_until(deadline).await;
            return false;
        }
        tokio::time::sleep_until(wake).await;

        match condition().await {
            Ok(true) => return true,
            Ok(false) => trace!("condition not yet met, retrying"),
            Err(e) => trace!(error = %e, "condition check failed, treated as not met"),
        }
        delay = interval;
    }
}

/// Poll `supplier` until it produces a value, an error, or `timeout` elapses.
///
/// Scheduling matches [`poll_with_initial_delay`]. The first `Ok(Some(v))`
/// is returned as `Some(Ok(v))`. An error raised inside the supplier is
/// captured and returned as `Some(Err(e))` so the caller can distinguish
/// "timed out" from "failed". Returns `None` on timeout.
pub async fn poll_with_result<F, Fut, T, E>(
    initial_delay: Duration,
    interval: Duration,
    timeout: Duration,
    mut supplier: F,
) -> Option<std::result::Result<T, E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, E>>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = initial_delay;

    loop {
        let wake = Instant::now() + delay;
        if wake >= deadline {
            tokio::time::sleep_until(deadline).await;
            return None;
        }
        tokio::time::sleep_until(wake).await;

        match supplier().await {
            Ok(Some(value)) => return Some(Ok(value)),
            Ok(None) => trace!("supplier produced nothing, retrying"),
            Err(e) => return Some(Err(e)),
        }
        delay = interval;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // The paused clock auto-advances on sleep, so these tests measure the
    // scheduling contract without wall-clock flakiness.

    #[tokio::test(start_paused = true)]
    async fn returns_true_on_first_success() {
        let ok = poll(
            Duration::from_millis(50),
            Duration::from_millis(500),
            || async { Ok::<_, Infallible>(true) },
        )
        .await;
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn always_false_returns_false_at_the_timeout() {
        let start = Instant::now();
        let ok = poll(
            Duration::from_millis(50),
            Duration::from_millis(200),
            || async { Ok::<_, Infallible>(false) },
        )
        .await;
        let elapsed = start.elapsed();
        assert!(!ok);
        // never before the timeout, and within one interval after it
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed <= Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn condition_errors_count_as_false() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let ok = poll(
            Duration::from_millis(10),
            Duration::from_millis(100),
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err("api unavailable")
                    } else {
                        Ok(true)
                    }
                }
            },
        )
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_waits_for_the_initial_delay() {
        let start = Instant::now();
        let ok = poll_with_initial_delay(
            Duration::from_millis(80),
            Duration::from_millis(10),
            Duration::from_millis(500),
            || async { Ok::<_, Infallible>(true) },
        )
        .await;
        assert!(ok);
        assert!(start.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn with_result_returns_first_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = poll_with_result(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(500),
            move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Ok::<_, Infallible>(None)
                    } else {
                        Ok(Some(42u32))
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Some(Ok(42)));
    }

    #[tokio::test(start_paused = true)]
    async fn with_result_times_out_to_none() {
        let result: Option<Result<u32, Infallible>> = poll_with_result(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(50),
            || async { Ok(None) },
        )
        .await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn with_result_captures_supplier_errors() {
        let result: Option<Result<u32, &str>> = poll_with_result(
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(500),
            || async { Err("quota exceeded") },
        )
        .await;
        assert_eq!(result, Some(Err("quota exceeded")));
    }
}
