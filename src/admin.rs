use crate::telemetry::MetricsExporter;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Version information for catnip
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a response with a content type
fn typed_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

/// Ops listener for `/metrics` and `/up` when they get their own port
pub struct AdminServer {
    bind_addr: SocketAddr,
    metrics: Arc<MetricsExporter>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AdminServer {
    pub fn new(
        bind_addr: SocketAddr,
        metrics: Arc<MetricsExporter>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            metrics,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        info!(addr = %listener.local_addr()?, "Metrics server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let metrics = Arc::clone(&self.metrics);
                            tokio::spawn(async move {
                                if let Err(e) = serve_admin_connection(stream, metrics).await {
                                    debug!(addr = %addr, error = %e, "Metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept metrics connection");
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Metrics server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_admin_connection<S>(stream: S, metrics: Arc<MetricsExporter>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let metrics = Arc::clone(&metrics);
        async move { handle_admin_request(req, metrics).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Metrics connection error: {}", e))?;

    Ok(())
}

async fn handle_admin_request<B>(
    req: Request<B>,
    metrics: Arc<MetricsExporter>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    let method = req.method();

    let response = match (method, path) {
        (&Method::GET, "/up") | (&Method::HEAD, "/up") => response(StatusCode::OK, ""),

        (&Method::GET, "/metrics") => typed_response(
            StatusCode::OK,
            "text/plain; version=0.0.4",
            metrics.render(),
        ),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            typed_response(StatusCode::OK, "application/json", version_info.to_string())
        }

        _ => {
            debug!(%method, %path, "Unknown metrics server path");
            response(StatusCode::NOT_FOUND, "not found")
        }
    };

    Ok(response)
}
