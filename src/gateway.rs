//! Request handling for both pipelines
//!
//! Requests whose Host belongs to a managed deployment are answered with a
//! redirect to catnip's wakeup page for that deployment, triggering the
//! deployment on the way. Everything else is catnip's own surface: home page,
//! wakeup pages, the status API and ops endpoints.

use crate::admin::VERSION;
use crate::directory::DomainDirectory;
use crate::error::{json_error_response, CatnipErrorCode};
use crate::monitor::{ReadinessMonitor, MARKER_HEADER};
use crate::mux::{Admission, AdmissionMux};
use crate::oneko::{Project, ProjectVersion};
use crate::pages;
use crate::telemetry::MetricsExporter;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, HOST, LOCATION};
use hyper::{Method, Request, Response, StatusCode, Uri};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Paths that are polled by infrastructure and not worth a log line
const QUIET_PATHS: [&str; 2] = ["/up", "/metrics"];

pub type GatewayResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// The parts of a request routing looks at. Bodies are never read.
struct RequestHead {
    method: Method,
    uri: Uri,
    host: Option<String>,
    scheme: &'static str,
}

impl RequestHead {
    fn from_request<B>(req: &Request<B>, is_tls: bool) -> Self {
        Self {
            method: req.method().clone(),
            uri: req.uri().clone(),
            host: request_host(req),
            scheme: request_scheme(req, is_tls),
        }
    }

    fn is_get_or_head(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }
}

/// Routes requests into the managed or pass-through pipeline
pub struct Gateway {
    mux: AdmissionMux,
    directory: Arc<DomainDirectory>,
    monitor: ReadinessMonitor,
    catnip_url: String,
    oneko_url: String,
    request_timeout: Duration,
    metrics: Option<Arc<MetricsExporter>>,
}

impl Gateway {
    pub fn new(
        directory: Arc<DomainDirectory>,
        monitor: ReadinessMonitor,
        catnip_url: impl Into<String>,
    ) -> Self {
        Self {
            mux: AdmissionMux::new(Arc::clone(&directory)),
            directory,
            monitor,
            catnip_url: catnip_url.into(),
            oneko_url: String::new(),
            request_timeout: Duration::from_secs(30),
            metrics: None,
        }
    }

    /// Link target for "Go to O-Neko" on rendered pages
    pub fn with_oneko_url(mut self, url: impl Into<String>) -> Self {
        self.oneko_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Serve `/metrics` from this gateway
    pub fn with_metrics(mut self, metrics: Arc<MetricsExporter>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replace the admission multiplexer
    pub fn with_mux(mut self, mux: AdmissionMux) -> Self {
        self.mux = mux;
        self
    }

    /// Handle one request. Never fails: errors become error responses.
    pub async fn handle<B>(&self, req: Request<B>, is_tls: bool) -> GatewayResponse {
        let start = Instant::now();
        let request_id = req
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let head = RequestHead::from_request(&req, is_tls);
        drop(req);
        let method = head.method.clone();
        let path = head.uri.path().to_string();
        let quiet = QUIET_PATHS.contains(&path.as_str());

        let mut response =
            match tokio::time::timeout(self.request_timeout, self.route(&head)).await {
                Ok(response) => response,
                Err(_) => {
                    warn!(
                        method = %method,
                        path = %path,
                        request_id = %request_id,
                        timeout_secs = self.request_timeout.as_secs(),
                        "Request timed out"
                    );
                    json_error_response(
                        CatnipErrorCode::RequestTimeout,
                        format!(
                            "Request timed out after {} seconds",
                            self.request_timeout.as_secs()
                        ),
                    )
                }
            };

        let headers = response.headers_mut();
        headers.insert(MARKER_HEADER, HeaderValue::from_static(VERSION));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(X_REQUEST_ID, value);
        }

        if !quiet {
            info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                request_id = %request_id,
                "Request handled"
            );
        }

        response
    }

    async fn route(&self, head: &RequestHead) -> GatewayResponse {
        match (self.mux.admit(head.host.as_deref()).await, head.host.as_deref()) {
            (Admission::Managed, Some(host)) => self.handle_managed(head, host).await,
            _ => self.handle_pass_through(head).await,
        }
    }

    async fn handle_managed(&self, head: &RequestHead, host: &str) -> GatewayResponse {
        if !head.is_get_or_head() {
            return json_error_response(
                CatnipErrorCode::MethodNotAllowed,
                format!("Method {} is not supported", head.method),
            );
        }

        let path_and_query = head
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = format!("{}{}", host, path_and_query);
        debug!(host = %host, url = %url, "Request to managed host");

        let (project, version) = match self.directory.resolve_by_host(&url).await {
            Ok(found) => found,
            Err(e) => {
                warn!(url = %url, error = %e, "Could not resolve managed host");
                return self.error_page(StatusCode::BAD_REQUEST, &e.to_string());
            }
        };

        if let Err(response) = self.ensure_deployed(&project, &version).await {
            return response;
        }

        let scheme = head.scheme;
        let location = format!(
            "{scheme}://{catnip}/{project}/{version}?redirectTo={scheme}://{host}{path}",
            scheme = scheme,
            catnip = self.catnip_url,
            project = project.uuid,
            version = version.uuid,
            host = host,
            path = head.uri.path(),
        );
        debug!(project = %project.name, version = %version.name, location = %location, "Redirecting to wakeup page");
        redirect(&location)
    }

    /// Trigger a deployment unless O-Neko already wants the version running
    async fn ensure_deployed(
        &self,
        project: &Project,
        version: &ProjectVersion,
    ) -> Result<(), GatewayResponse> {
        if version.is_deployed() {
            return Ok(());
        }

        self.directory
            .trigger_deployment(&project.uuid, &version.uuid)
            .await
            .map_err(|e| self.error_page(StatusCode::BAD_REQUEST, &e.to_string()))
    }

    async fn handle_pass_through(&self, head: &RequestHead) -> GatewayResponse {
        if !head.is_get_or_head() {
            return redirect("/");
        }

        let path = head.uri.path();
        let query = head.uri.query();

        match path {
            "/" => html_response(StatusCode::OK, pages::home_page(&self.oneko_url)),
            "/up" => empty_response(StatusCode::OK),
            "/metrics" => match &self.metrics {
                Some(metrics) => text_response(StatusCode::OK, metrics.render()),
                None => redirect("/"),
            },
            "/api/status" => self.handle_status(query).await,
            "/wakeup" => {
                match (
                    query_param(query, "projectId"),
                    query_param(query, "versionId"),
                ) {
                    (Some(project_id), Some(version_id)) => {
                        let redirect_to = query_param(query, "redirectTo");
                        self.handle_wakeup(&project_id, &version_id, redirect_to.as_deref())
                            .await
                    }
                    _ => redirect("/"),
                }
            }
            _ => match wakeup_ids(path) {
                Some((project_id, version_id)) => {
                    let redirect_to = query_param(query, "redirectTo");
                    self.handle_wakeup(project_id, version_id, redirect_to.as_deref())
                        .await
                }
                None => redirect("/"),
            },
        }
    }

    async fn handle_wakeup(
        &self,
        project_id: &str,
        version_id: &str,
        redirect_to: Option<&str>,
    ) -> GatewayResponse {
        let (project, version) = match self.directory.resolve_by_ids(project_id, version_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(project_id = %project_id, version_id = %version_id, error = %e, "Wakeup for unknown version");
                return self.error_page(StatusCode::BAD_REQUEST, &e.to_string());
            }
        };

        if let Err(response) = self.ensure_deployed(&project, &version).await {
            return response;
        }

        html_response(
            StatusCode::OK,
            pages::wakeup_page(&project, &version, redirect_to, &self.oneko_url),
        )
    }

    async fn handle_status(&self, query: Option<&str>) -> GatewayResponse {
        let Some(deployment_url) = query_param(query, "deploymentUrl") else {
            return json_error_response(
                CatnipErrorCode::MissingParameter,
                "Missing query parameter deploymentUrl",
            );
        };

        let (project, version) = match self.directory.resolve_by_host(&deployment_url).await {
            Ok(found) => found,
            Err(e) => {
                return json_error_response(CatnipErrorCode::ResolutionFailed, e.to_string());
            }
        };

        if !version.is_deployed() {
            if let Err(e) = self
                .directory
                .trigger_deployment(&project.uuid, &version.uuid)
                .await
            {
                return json_error_response(CatnipErrorCode::DeploymentFailed, e.to_string());
            }
        }

        match self.monitor.deployment_status(&deployment_url).await {
            Ok(status) => match serde_json::to_string(&status) {
                Ok(body) => json_response(StatusCode::OK, body),
                Err(e) => json_error_response(CatnipErrorCode::InternalError, e.to_string()),
            },
            Err(e) => json_error_response(CatnipErrorCode::StatusUnavailable, e.to_string()),
        }
    }

    fn error_page(&self, status: StatusCode, message: &str) -> GatewayResponse {
        html_response(status, pages::error_page(message, &self.oneko_url))
    }
}

/// Host the request was addressed to: the Host header, or the URI authority
/// for HTTP/2
fn request_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .map(String::from)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
        .filter(|h| !h.is_empty())
}

/// `https` for TLS connections or when a front proxy says so
fn request_scheme<B>(req: &Request<B>, is_tls: bool) -> &'static str {
    let forwarded_https = req
        .headers()
        .get(X_FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("https"));

    if is_tls || forwarded_https {
        "https"
    } else {
        "http"
    }
}

/// Split `/{projectId}/{versionId}` into its ids
fn wakeup_ids(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.trim_start_matches('/').split('/');
    let project_id = segments.next().filter(|s| !s.is_empty())?;
    let version_id = segments.next().filter(|s| !s.is_empty())?;
    if segments.next().is_some() {
        return None;
    }
    Some((project_id, version_id))
}

/// Decode one query parameter. The first occurrence wins.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key != name {
            return None;
        }
        let value = value.replace('+', " ");
        urlencoding::decode(&value).ok().map(|v| v.into_owned())
    })
}

fn full_body(body: impl Into<Bytes>) -> BoxBody<Bytes, hyper::Error> {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

fn html_response(status: StatusCode, body: String) -> GatewayResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static header")
}

fn json_response(status: StatusCode, body: String) -> GatewayResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static header")
}

fn text_response(status: StatusCode, body: String) -> GatewayResponse {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static header")
}

fn empty_response(status: StatusCode) -> GatewayResponse {
    Response::builder()
        .status(status)
        .body(full_body(Bytes::new()))
        .expect("valid response with StatusCode enum")
}

fn redirect(location: &str) -> GatewayResponse {
    match HeaderValue::from_str(location) {
        Ok(value) => Response::builder()
            .status(StatusCode::TEMPORARY_REDIRECT)
            .header(LOCATION, value)
            .body(full_body(Bytes::new()))
            .expect("valid response with StatusCode enum"),
        Err(_) => json_error_response(
            CatnipErrorCode::InternalError,
            "Could not build redirect location",
        ),
    }
}
