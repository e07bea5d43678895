use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use notification_relay::utils::{RetrySettings, retry_with_backoff};
use tokio::time::timeout;

fn fast_settings(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> RetrySettings {
    RetrySettings {
        max_attempts,
        initial_delay_ms,
        max_delay_ms,
        backoff_multiplier: 2,
    }
}

/// A dependency that refuses its first `accept_after` calls and records
/// when each call arrived, the shape of a broker or cache still coming up
/// while the process retries its startup connects.
struct FlakyDependency {
    accept_after: u32,
    calls: Mutex<Vec<Instant>>,
}

impl FlakyDependency {
    fn new(accept_after: u32) -> Arc<Self> {
        Arc::new(Self {
            accept_after,
            calls: Mutex::new(Vec::new()),
        })
    }

    async fn try_connect(&self) -> Result<u32, String> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            calls.len() as u32
        };

        if call <= self.accept_after {
            Err(format!("connection refused on attempt {call}"))
        } else {
            Ok(call)
        }
    }

    fn call_count(&self) -> u32 {
        self.calls.lock().unwrap().len() as u32
    }

    /// Milliseconds between consecutive calls.
    fn gaps_ms(&self) -> Vec<u128> {
        let calls = self.calls.lock().unwrap();
        calls
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

/// Test: a healthy dependency is called exactly once and the value comes
/// straight back.
#[tokio::test]
async fn test_healthy_dependency_connects_on_first_call() {
    let dependency = FlakyDependency::new(0);
    let settings = fast_settings(5, 500, 5000);

    let result = retry_with_backoff(&settings, || {
        let dependency = Arc::clone(&dependency);
        async move { dependency.try_connect().await }
    })
    .await;

    assert_eq!(result, Ok(1));
    assert_eq!(dependency.call_count(), 1);
}

/// Test: startup connects keep probing until the dependency comes up, then
/// stop spending the budget.
#[tokio::test]
async fn test_connect_recovers_once_dependency_comes_up() {
    let dependency = FlakyDependency::new(3);
    let settings = fast_settings(5, 10, 80);

    let result = retry_with_backoff(&settings, || {
        let dependency = Arc::clone(&dependency);
        async move { dependency.try_connect().await }
    })
    .await;

    assert_eq!(result, Ok(4));
    assert_eq!(dependency.call_count(), 4);
}

/// Test: an exhausted budget surfaces the error from the final attempt, not
/// the first one.
#[tokio::test]
async fn test_exhausted_budget_returns_final_error() {
    let dependency = FlakyDependency::new(u32::MAX);
    let settings = fast_settings(3, 5, 20);

    let result = retry_with_backoff(&settings, || {
        let dependency = Arc::clone(&dependency);
        async move { dependency.try_connect().await }
    })
    .await;

    assert_eq!(result, Err("connection refused on attempt 3".to_string()));
    assert_eq!(dependency.call_count(), 3);
}

/// Test: a budget of one means a single attempt with no backoff sleep. The
/// delay here is far longer than the timeout, so any sleep trips it.
#[tokio::test]
async fn test_single_attempt_budget_fails_without_sleeping() {
    let dependency = FlakyDependency::new(u32::MAX);
    let settings = fast_settings(1, 5_000, 5_000);

    let result = timeout(
        Duration::from_millis(500),
        retry_with_backoff(&settings, || {
            let dependency = Arc::clone(&dependency);
            async move { dependency.try_connect().await }
        }),
    )
    .await
    .expect("Single-attempt budget should return without backing off");

    assert_eq!(result, Err("connection refused on attempt 1".to_string()));
    assert_eq!(dependency.call_count(), 1);
}

/// Test: gaps between attempts double from the initial delay and then hold
/// at the cap.
#[tokio::test]
async fn test_backoff_gaps_double_then_hold_at_cap() {
    let dependency = FlakyDependency::new(u32::MAX);
    let settings = fast_settings(4, 20, 30);

    let _ = retry_with_backoff(&settings, || {
        let dependency = Arc::clone(&dependency);
        async move { dependency.try_connect().await }
    })
    .await;

    let gaps = dependency.gaps_ms();
    assert_eq!(gaps.len(), 3, "Four attempts leave three gaps");

    // Nominal schedule is 20ms, then 40ms capped to 30ms, then 30ms again.
    // Jitter is +-10%; upper bounds leave room for scheduler lag. An uncapped
    // third gap would be 80ms and fail the band check.
    assert!(
        gaps[0] >= 17 && gaps[0] <= 45,
        "First gap should sit near 20ms, was {}ms",
        gaps[0]
    );
    for (i, gap) in gaps.iter().enumerate().skip(1) {
        assert!(
            *gap >= 25 && *gap <= 55,
            "Gap {i} should hold near the 30ms cap, was {gap}ms"
        );
    }
}

/// Test: call sites that wrap errors into anyhow retry the same way, and the
/// whole loop runs inside a spawned task.
#[tokio::test]
async fn test_anyhow_call_sites_retry_the_same_way() -> Result<()> {
    let dependency = FlakyDependency::new(2);
    let settings = fast_settings(3, 5, 20);

    let connected = tokio::spawn(async move {
        let connected = retry_with_backoff(&settings, || {
            let dependency = Arc::clone(&dependency);
            async move { dependency.try_connect().await.map_err(|e| anyhow!(e)) }
        })
        .await?;

        assert_eq!(dependency.call_count(), 3);
        Ok::<_, anyhow::Error>(connected)
    })
    .await??;

    assert_eq!(connected, 3);

    Ok(())
}
