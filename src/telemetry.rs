//! Logging and metrics setup

use crate::config::{Config, Mode};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::str::FromStr;
use std::sync::Once;
use std::time::Instant;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Prometheus default buckets, in seconds
const LATENCY_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Development mode logs in a
/// compact human format, production mode as JSON lines.
pub fn init_logging(config: &Config) -> anyhow::Result<()> {
    let level = LevelFilter::from_str(&config.logging.level)
        .map_err(|e| anyhow::anyhow!("Invalid log level '{}': {}", config.logging.level, e))?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let fmt_layer = match config.mode {
        Mode::Production => fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .boxed(),
        Mode::Development => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}

/// Renders the Prometheus exposition and keeps the uptime series current
pub struct MetricsExporter {
    handle: PrometheusHandle,
    started: Instant,
}

impl MetricsExporter {
    /// Install the global metrics recorder. Call once per process.
    pub fn install(version: &str) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .set_buckets(&LATENCY_BUCKETS)?
            .install_recorder()?;

        describe_metrics();
        gauge!("oneko_catnip_info", "version" => version.to_string()).set(1.0);
        gauge!("oneko_catnip_api_connected").set(0.0);

        Ok(Self {
            handle,
            started: Instant::now(),
        })
    }

    /// An exporter backed by a recorder that is not installed globally
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
            started: Instant::now(),
        }
    }

    pub fn render(&self) -> String {
        gauge!("oneko_catnip_uptime_duration_seconds").set(self.started.elapsed().as_secs_f64());
        self.handle.render()
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "oneko_catnip_wakeups_total",
            Unit::Count,
            "The number of wakeup API requests done."
        );
        describe_histogram!(
            "oneko_catnip_api_call_duration_seconds",
            Unit::Seconds,
            "O-Neko API call duration."
        );
        describe_histogram!(
            "oneko_catnip_api_ping_duration_seconds",
            Unit::Seconds,
            "Ping duration to the O-Neko base application."
        );
        describe_gauge!(
            "oneko_catnip_api_connected",
            "1 if the API is connected, 0 if not."
        );
        describe_gauge!(
            "oneko_catnip_cache_size",
            Unit::Count,
            "The number of cached projects."
        );
        describe_gauge!(
            "oneko_catnip_oneko_projectversion_domains",
            Unit::Count,
            "The number of unique domains across all O-Neko projects and versions."
        );
        describe_gauge!(
            "oneko_catnip_uptime_duration_seconds",
            Unit::Seconds,
            "The uptime of the application."
        );
        describe_gauge!(
            "oneko_catnip_info",
            "Information about this application."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_exporter_renders() {
        let exporter = MetricsExporter::detached();
        // Nothing is recorded into a detached recorder
        assert!(!exporter.render().contains("oneko_catnip_info"));
    }

    #[test]
    fn test_describe_metrics_is_idempotent() {
        describe_metrics();
        describe_metrics();
    }
}
