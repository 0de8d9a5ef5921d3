use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use inventory_notifier::{
    errors::PublishError,
    models::retry::RetryConfig,
    utils::{retry_with_backoff, retry_with_backoff_when},
};
use tokio::time::Instant;

fn fast_config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 10,
        max_delay_ms: 40,
        backoff_multiplier: 2,
    }
}

/// Test: Each wait is longer than the previous one until the cap
#[tokio::test]
async fn test_attempt_gaps_grow_with_multiplier() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 20,
        max_delay_ms: 500,
        backoff_multiplier: 3,
    };
    let attempts = Arc::new(Mutex::new(Vec::<Instant>::new()));
    let log = Arc::clone(&attempts);

    let publish_id = retry_with_backoff(&config, || {
        let log = Arc::clone(&log);
        async move {
            let mut log = log.lock().unwrap();
            log.push(Instant::now());
            if log.len() < 3 {
                Err(anyhow!("Throttling"))
            } else {
                Ok("publish-1")
            }
        }
    })
    .await?;

    assert_eq!(publish_id, "publish-1");

    let attempts = attempts.lock().unwrap();
    assert_eq!(attempts.len(), 3);

    // Roughly 20ms then 60ms, each within 10% jitter.
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap.as_millis() >= 18, "first gap {:?}", first_gap);
    assert!(second_gap.as_millis() >= 54, "second gap {:?}", second_gap);
    assert!(second_gap > first_gap);

    Ok(())
}

/// Test: Rejections that cannot succeed on retry are surfaced immediately
#[tokio::test]
async fn test_non_retryable_errors_are_not_retried() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff_when(&fast_config(5), PublishError::is_transient, || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(PublishError::Rejected("Invalid parameter".to_string()))
        }
    })
    .await;

    assert!(matches!(result, Err(PublishError::Rejected(_))));
    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);

    Ok(())
}

/// Test: A rejection after an outage ends the retries with the rejection
#[tokio::test]
async fn test_rejection_after_outage_stops_retrying() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff_when(&fast_config(5), PublishError::is_transient, || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err::<String, _>(PublishError::Unavailable("Throttling".to_string()))
            } else {
                Err(PublishError::Rejected("Topic does not exist".to_string()))
            }
        }
    })
    .await;

    assert!(matches!(result, Err(PublishError::Rejected(_))));
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);

    Ok(())
}

/// Test: A single-attempt configuration reports the first error as is
#[tokio::test]
async fn test_single_attempt_returns_first_error() -> Result<()> {
    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&fast_config(1), || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            Err::<String, _>(anyhow!("attempt {} failed", attempt))
        }
    })
    .await;

    assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    assert_eq!(
        result.map_err(|e| e.to_string()).unwrap_err(),
        "attempt 0 failed"
    );

    Ok(())
}

/// Test: Total backoff stays within the configured cap
#[tokio::test]
async fn test_backoff_is_capped() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 6,
        initial_delay_ms: 20,
        max_delay_ms: 40,
        backoff_multiplier: 4,
    };

    let start = Instant::now();

    let _ = retry_with_backoff(&config, || async {
        Err::<String, _>(anyhow!("Throttling"))
    })
    .await;

    // 20 + 40 * 4 = 180ms of sleeping, plus up to 10% jitter.
    let elapsed = start.elapsed().as_millis();
    assert!(elapsed >= 160, "Backoff should have slept, took {}ms", elapsed);
    assert!(elapsed < 1_000, "Backoff exceeded its cap, took {}ms", elapsed);

    Ok(())
}
