//! Deployment readiness probing
//!
//! A deployment counts as ready once a HEAD request to its URL is answered by
//! the deployment itself. While it is starting, the ingress answers with a
//! 5xx, or the request is routed back to catnip, which marks every response
//! with the [`MARKER_HEADER`]. Results are cached for [`STATUS_TTL`] so that
//! polling wakeup pages do not hammer the backend.

use crate::cache::TtlCache;
use crate::clock::{system_clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Header carried by every response catnip itself produces
pub const MARKER_HEADER: &str = "oneko-catnip";

/// How long a probe result is reused
pub const STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentStatus {
    Pending,
    Ready,
    Error,
}

/// Probe outcome as reported to wakeup pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatusResponse {
    pub status: DeploymentStatus,
    pub redirect_url: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("could not find item in cache and loader did not load item for deployment url {0}")]
    NotFound(String),
}

/// What a successful HEAD request told us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub has_marker: bool,
}

/// Turn a probe outcome into a status. Transport errors come first, then
/// server errors, then responses that came from catnip itself.
pub fn classify(url: &str, outcome: Result<ProbeResponse, String>) -> DeploymentStatusResponse {
    let (status, error_message) = match outcome {
        Err(message) => (DeploymentStatus::Error, message),
        Ok(response) if response.status >= 500 => (DeploymentStatus::Pending, String::new()),
        Ok(response) if response.has_marker => (DeploymentStatus::Pending, String::new()),
        Ok(_) => (DeploymentStatus::Ready, String::new()),
    };

    DeploymentStatusResponse {
        status,
        redirect_url: url.to_string(),
        error_message,
    }
}

async fn probe(client: &reqwest::Client, url: &str) -> DeploymentStatusResponse {
    let outcome = client
        .head(url)
        .send()
        .await
        .map(|response| ProbeResponse {
            status: response.status().as_u16(),
            has_marker: response.headers().contains_key(MARKER_HEADER),
        })
        .map_err(|e| e.to_string());

    let result = classify(url, outcome);
    debug!(url = %url, status = ?result.status, "Probed deployment");
    result
}

/// Cached readiness checks for deployment URLs
#[derive(Clone)]
pub struct ReadinessMonitor {
    statuses: TtlCache<String, DeploymentStatusResponse, MonitorError>,
}

impl ReadinessMonitor {
    pub fn new(probe_timeout: Duration) -> anyhow::Result<Self> {
        Self::with_clock(probe_timeout, system_clock())
    }

    pub fn with_clock(probe_timeout: Duration, clock: SharedClock) -> anyhow::Result<Self> {
        let client = Arc::new(reqwest::Client::builder().timeout(probe_timeout).build()?);

        let statuses = TtlCache::with_clock(STATUS_TTL, clock, move |url: String| {
            let client = Arc::clone(&client);
            async move {
                // A panicking probe becomes a miss instead of unwinding into
                // every waiter. The probe is bounded by the client timeout.
                let task_url = url.clone();
                tokio::spawn(async move { probe(&client, &task_url).await })
                    .await
                    .map_err(|_| MonitorError::NotFound(url))
            }
        });

        Ok(Self { statuses })
    }

    /// Current readiness of `url`, probing at most once per [`STATUS_TTL`]
    pub async fn deployment_status(
        &self,
        url: &str,
    ) -> Result<DeploymentStatusResponse, MonitorError> {
        self.statuses.get(&url.to_string()).await
    }
}
