//! Readiness probing against fake deployments

mod common;

use common::*;
use oneko_catnip::clock::ManualClock;
use oneko_catnip::monitor::{DeploymentStatus, ReadinessMonitor};
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_unavailable_backend_is_pending() {
    let backend = MockBackend::start(BackendMode::Starting).await;
    let monitor = ReadinessMonitor::new(PROBE_TIMEOUT).unwrap();

    let status = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(status.status, DeploymentStatus::Pending);
    assert_eq!(status.redirect_url, backend.url());
    assert!(status.error_message.is_empty());
}

#[tokio::test]
async fn test_response_from_catnip_is_pending() {
    let backend = MockBackend::start(BackendMode::Catnip).await;
    let monitor = ReadinessMonitor::new(PROBE_TIMEOUT).unwrap();

    let status = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(status.status, DeploymentStatus::Pending);
}

#[tokio::test]
async fn test_answering_backend_is_ready() {
    let backend = MockBackend::start(BackendMode::Ready).await;
    let monitor = ReadinessMonitor::new(PROBE_TIMEOUT).unwrap();

    let status = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(status.status, DeploymentStatus::Ready);
    assert!(status.error_message.is_empty());
}

#[tokio::test]
async fn test_unreachable_backend_is_error() {
    let url = closed_url().await;
    let monitor = ReadinessMonitor::new(PROBE_TIMEOUT).unwrap();

    let status = monitor.deployment_status(&url).await.unwrap();
    assert_eq!(status.status, DeploymentStatus::Error);
    assert!(!status.error_message.is_empty());
}

#[tokio::test]
async fn test_status_is_reused_until_expiry() {
    let backend = MockBackend::start(BackendMode::Starting).await;
    let clock = ManualClock::new();
    let monitor = ReadinessMonitor::with_clock(PROBE_TIMEOUT, clock.clone()).unwrap();

    let first = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Pending);

    backend.set_mode(BackendMode::Ready);
    clock.advance(Duration::from_secs(2));
    let cached = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(cached.status, DeploymentStatus::Pending);
    assert_eq!(backend.hits(), 1);

    clock.advance(Duration::from_secs(4));
    let fresh = monitor.deployment_status(&backend.url()).await.unwrap();
    assert_eq!(fresh.status, DeploymentStatus::Ready);
    assert_eq!(backend.hits(), 2);
}

#[tokio::test]
async fn test_concurrent_checks_probe_once() {
    let backend = MockBackend::start(BackendMode::Ready).await;
    let monitor = ReadinessMonitor::new(PROBE_TIMEOUT).unwrap();

    let url = backend.url();
    let results = futures::future::join_all((0..5).map(|_| monitor.deployment_status(&url))).await;
    for result in results {
        assert_eq!(result.unwrap().status, DeploymentStatus::Ready);
    }
    assert_eq!(backend.hits(), 1);
}
