use oneko_catnip::admin::{AdminServer, PKG_NAME, VERSION};
use oneko_catnip::client::OnekoClient;
use oneko_catnip::config::Config;
use oneko_catnip::directory::DomainDirectory;
use oneko_catnip::gateway::Gateway;
use oneko_catnip::monitor::ReadinessMonitor;
use oneko_catnip::server::{load_tls_acceptor, CatnipServer};
use oneko_catnip::telemetry::{self, MetricsExporter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Extra time granted to listeners on top of the connection grace period
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path)?;
    telemetry::init_logging(&config)?;
    info!(path = %config_path.display(), "Configuration loaded");

    print_startup_banner(&config);

    let metrics = Arc::new(MetricsExporter::install(VERSION)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let client = Arc::new(OnekoClient::from_config(&config.api)?);
    let directory = Arc::new(DomainDirectory::new(client, config.api.cache_duration()));
    let ping_handle = directory.start(shutdown_rx.clone());

    let monitor = ReadinessMonitor::new(config.api.request_timeout())?;

    let mut gateway = Gateway::new(Arc::clone(&directory), monitor, config.catnip_url.clone())
        .with_oneko_url(config.api.base_url.clone())
        .with_request_timeout(config.server.request_timeout());
    if config.server.metrics_on_main_port() {
        gateway = gateway.with_metrics(Arc::clone(&metrics));
    }

    let main_addr = socket_addr(&config.server.bind, config.server.port)?;
    let mut server = CatnipServer::new(main_addr, Arc::new(gateway), shutdown_rx.clone())
        .with_grace_period(config.server.shutdown_grace_period());

    if let (Some(cert), Some(key)) = (&config.server.tls_cert, &config.server.tls_key) {
        server = server.with_tls(load_tls_acceptor(cert, key)?);
        info!(cert = %cert, key = %key, "TLS enabled with provided certificates");
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Catnip server error");
        }
    });

    let admin_handle = if config.server.metrics_on_main_port() {
        None
    } else {
        let admin_addr = socket_addr(&config.server.bind, config.server.metrics_port)?;
        let admin_server = AdminServer::new(admin_addr, Arc::clone(&metrics), shutdown_rx.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = admin_server.run().await {
                error!(error = %e, "Metrics server error");
            }
        }))
    };

    wait_for_signal().await?;

    let _ = shutdown_tx.send(true);

    let wait = config.server.shutdown_grace_period() + SHUTDOWN_MARGIN;
    let drained = tokio::time::timeout(wait, async {
        let _ = server_handle.await;
        if let Some(handle) = admin_handle {
            let _ = handle.await;
        }
        if let Some(handle) = ping_handle {
            let _ = handle.await;
        }
    })
    .await;

    if drained.is_err() {
        error!(timeout_secs = wait.as_secs(), "Shutdown timed out");
    }

    info!("Shutdown complete");
    Ok(())
}

fn socket_addr(bind: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{}:{}", bind, port).parse().map_err(|e| {
        error!(bind = %bind, port, error = %e, "Invalid bind address");
        anyhow::anyhow!("Invalid bind address {}:{}: {}", bind, port, e)
    })
}

/// Wait for Ctrl+C or SIGTERM
async fn wait_for_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down...");
    }

    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting catnip");
    info!(
        mode = ?config.mode,
        catnip_url = %config.catnip_url,
        bind = %config.server.bind,
        port = config.server.port,
        metrics_port = config.server.metrics_port,
        tls = config.server.tls_enabled(),
        "Server configuration"
    );
    info!(
        oneko_url = %config.api.base_url,
        cache_duration_secs = config.api.cache_duration_secs,
        request_timeout_secs = config.api.request_timeout_secs,
        "O-Neko API settings"
    );
}
