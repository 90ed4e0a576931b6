//! Tests for the cancellation helper shared by all providers.

use super::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_cancellable_returns_operation_result() {
    let cancel = CancellationToken::new();

    let result = cancellable(&cancel, async { Ok::<_, QueueError>(42) }).await;

    assert_eq!(result.unwrap(), 42);
}

#[tokio::test]
async fn test_cancellable_propagates_operation_error() {
    let cancel = CancellationToken::new();

    let result = cancellable(&cancel, async {
        Err::<(), _>(QueueError::ConnectionFailed {
            message: "reset".to_string(),
        })
    })
    .await;

    assert!(matches!(result, Err(QueueError::ConnectionFailed { .. })));
}

#[tokio::test]
async fn test_already_cancelled_token_skips_operation() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let started = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&started);

    let result = cancellable(&cancel, async move {
        flag.store(true, Ordering::SeqCst);
        Ok::<_, QueueError>(())
    })
    .await;

    assert!(matches!(result, Err(QueueError::Cancelled)));
    assert!(!started.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_interrupts_pending_operation() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = cancellable(&cancel, async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, QueueError>(())
    })
    .await;

    assert!(matches!(result, Err(QueueError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_deadline_after_adds_the_wait() {
    let before = tokio::time::Instant::now();

    let deadline = deadline_after(Duration::from_secs(5));

    assert!(deadline >= before + Duration::from_secs(5));
}

#[tokio::test]
async fn test_deadline_after_clamps_huge_waits() {
    let before = tokio::time::Instant::now();

    let deadline = deadline_after(Duration::MAX);

    assert!(deadline > before + Duration::from_secs(86400 * 365));
}
