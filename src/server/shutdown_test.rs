//! Tests for shutdown signalling

use super::shutdown::*;
use std::time::Duration;

#[tokio::test]
async fn test_shutdown_channel_initially_not_shutdown() {
    let (controller, signal) = shutdown_channel();

    assert!(!signal.is_shutdown());
    assert!(!controller.is_requested());
}

#[tokio::test]
async fn test_shutdown_flips_exactly_once() {
    let (controller, signal) = shutdown_channel();

    assert!(controller.shutdown(), "first request flips the flag");
    assert!(!controller.shutdown(), "second request is a no-op");

    assert!(signal.is_shutdown());
    assert!(controller.is_requested());
}

#[tokio::test]
async fn test_shutdown_wait_completes_on_signal() {
    let (controller, mut signal) = shutdown_channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.shutdown();
        // keep the sender alive until the waiter observed the value
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;

    assert!(result.is_ok(), "wait() should complete when shutdown requested");
    assert!(signal.is_shutdown());
}

#[tokio::test]
async fn test_wait_returns_when_controller_dropped() {
    let (controller, mut signal) = shutdown_channel();
    drop(controller);

    let result = tokio::time::timeout(Duration::from_secs(1), signal.wait()).await;

    assert!(result.is_ok(), "dropped controller must release waiters");
}

#[tokio::test]
async fn test_shutdown_signal_clones_share_state() {
    let (controller, signal) = shutdown_channel();
    let signal2 = signal.clone();

    controller.shutdown();

    assert!(signal.is_shutdown());
    assert!(signal2.is_shutdown());
}
