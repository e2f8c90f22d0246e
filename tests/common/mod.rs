//! In-process stand-ins for the O-Neko API and for deployment backends

#![allow(dead_code)]

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::AUTHORIZATION;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use oneko_catnip::client::OnekoClient;
use oneko_catnip::oneko::{DesiredState, Project, ProjectVersion};
use parking_lot::Mutex;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const USERNAME: &str = "admin";
pub const PASSWORD: &str = "s3cr3t";
const EXPECTED_AUTH: &str = "Basic YWRtaW46czNjcjN0";

pub const DEMO_PROJECT_ID: &str = "63638583-a9e7-4c0a-9a1b-0f3a4b7b1e0d";
pub const DEMO_VERSION_ID: &str = "5eb9c99f-8f7e-4a67-b0a4-6c2f1a9d3e21";
pub const DEMO_HOST: &str = "my-test-instance.oneko.company.cloud";
pub const CATNIP_HOST: &str = "catnip.oneko.company.cloud";

pub fn version(uuid: &str, name: &str, urls: &[&str], desired_state: DesiredState) -> ProjectVersion {
    ProjectVersion {
        uuid: uuid.to_string(),
        name: name.to_string(),
        urls: urls.iter().map(|u| u.to_string()).collect(),
        image_updated_date: None,
        desired_state,
        deployment: Default::default(),
    }
}

pub fn project(uuid: &str, name: &str, versions: Vec<ProjectVersion>) -> Project {
    Project {
        uuid: uuid.to_string(),
        name: name.to_string(),
        image_name: "docker.mycompany.com/demoproject".to_string(),
        versions,
    }
}

/// "Demo Project" with one sleeping version served at `url`
pub fn demo_project(url: &str) -> Project {
    project(
        DEMO_PROJECT_ID,
        "Demo Project",
        vec![version(
            DEMO_VERSION_ID,
            "demoversion-for-unittest",
            &[url],
            DesiredState::NotDeployed,
        )],
    )
}

#[derive(Default)]
struct MockState {
    projects: Mutex<Vec<Project>>,
    /// Status forced onto every project endpoint
    fail_with: Mutex<Option<StatusCode>>,
    /// Body of a 404 returned by the deploy endpoint
    deploy_not_found: Mutex<Option<String>>,
    session_calls: AtomicUsize,
    list_calls: AtomicUsize,
    by_url_calls: AtomicUsize,
    by_id_calls: AtomicUsize,
    deploy_calls: AtomicUsize,
}

/// A fake O-Neko API that counts calls per endpoint
pub struct MockOneko {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockOneko {
    pub async fn start(projects: Vec<Project>) -> Self {
        let state = Arc::new(MockState::default());
        *state.projects.lock() = projects;

        let service_state = Arc::clone(&state);
        let (addr, handle) = serve(move |req| {
            let state = Arc::clone(&service_state);
            async move { Ok(handle_api(req, &state)) }
        })
        .await;

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn client(&self) -> Arc<OnekoClient> {
        Arc::new(
            OnekoClient::new(&self.url(), USERNAME, PASSWORD, Duration::from_secs(5))
                .expect("valid client"),
        )
    }

    pub fn fail_with(&self, status: Option<StatusCode>) {
        *self.state.fail_with.lock() = status;
    }

    pub fn deploy_not_found(&self, body: &str) {
        *self.state.deploy_not_found.lock() = Some(body.to_string());
    }

    pub fn set_projects(&self, projects: Vec<Project>) {
        *self.state.projects.lock() = projects;
    }

    pub fn session_calls(&self) -> usize {
        self.state.session_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.state.list_calls.load(Ordering::SeqCst)
    }

    pub fn by_url_calls(&self) -> usize {
        self.state.by_url_calls.load(Ordering::SeqCst)
    }

    pub fn by_id_calls(&self) -> usize {
        self.state.by_id_calls.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.state.deploy_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockOneko {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn handle_api(req: Request<Incoming>, state: &MockState) -> Response<Full<Bytes>> {
    let authorized = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == EXPECTED_AUTH);
    if !authorized {
        return response(StatusCode::UNAUTHORIZED, "");
    }

    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();
    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();

    match (req.method(), segments.as_slice()) {
        (&Method::GET, ["api", "session"]) => {
            state.session_calls.fetch_add(1, Ordering::SeqCst);
            response(StatusCode::OK, "{}")
        }
        (&Method::GET, ["api", "project"]) => {
            state.list_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = *state.fail_with.lock() {
                return response(status, "");
            }
            json(&*state.projects.lock())
        }
        (&Method::GET, ["api", "project", "byDeploymentUrl"]) => {
            state.by_url_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = *state.fail_with.lock() {
                return response(status, "");
            }
            let wanted = query
                .split('&')
                .find_map(|pair| pair.strip_prefix("deploymentUrl="))
                .and_then(|v| urlencoding::decode(v).ok())
                .map(|v| v.into_owned())
                .unwrap_or_default();
            let projects = state.projects.lock();
            match projects
                .iter()
                .find(|p| p.version_matching_url(&wanted).is_some())
            {
                Some(project) => json(project),
                None => response(StatusCode::NOT_FOUND, ""),
            }
        }
        (&Method::GET, ["api", "project", project_id]) => {
            state.by_id_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = *state.fail_with.lock() {
                return response(status, "");
            }
            let projects = state.projects.lock();
            match projects.iter().find(|p| p.uuid == *project_id) {
                Some(project) => json(project),
                None => response(StatusCode::NOT_FOUND, ""),
            }
        }
        (&Method::POST, ["api", "project", project_id, "version", version_id, "deploy"]) => {
            state.deploy_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(body) = state.deploy_not_found.lock().clone() {
                return response(StatusCode::NOT_FOUND, body);
            }
            if let Some(status) = *state.fail_with.lock() {
                return response(status, "");
            }
            let mut projects = state.projects.lock();
            let version = projects
                .iter_mut()
                .filter(|p| p.uuid == *project_id)
                .flat_map(|p| p.versions.iter_mut())
                .find(|v| v.uuid.eq_ignore_ascii_case(version_id));
            match version {
                Some(version) => {
                    version.desired_state = DesiredState::Deployed;
                    response(StatusCode::OK, "")
                }
                None => response(StatusCode::NOT_FOUND, "version not found"),
            }
        }
        _ => response(StatusCode::NOT_FOUND, ""),
    }
}

/// How a fake deployment answers readiness probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendMode {
    /// Ingress reports the backend as unavailable
    Starting,
    /// Traffic is still routed to catnip
    Catnip,
    Ready,
}

/// A fake deployment whose answers can be switched between probes
pub struct MockBackend {
    addr: SocketAddr,
    mode: Arc<Mutex<BackendMode>>,
    hits: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start(mode: BackendMode) -> Self {
        let mode = Arc::new(Mutex::new(mode));
        let hits = Arc::new(AtomicUsize::new(0));

        let service_mode = Arc::clone(&mode);
        let service_hits = Arc::clone(&hits);
        let (addr, handle) = serve(move |_req| {
            let mode = *service_mode.lock();
            service_hits.fetch_add(1, Ordering::SeqCst);
            async move {
                let response = match mode {
                    BackendMode::Starting => response(StatusCode::SERVICE_UNAVAILABLE, ""),
                    BackendMode::Catnip => {
                        let mut response = response(StatusCode::OK, "");
                        response
                            .headers_mut()
                            .insert("oneko-catnip", "0.1.0".parse().expect("valid header"));
                        response
                    }
                    BackendMode::Ready => response(StatusCode::OK, "hello"),
                };
                Ok(response)
            }
        })
        .await;

        Self {
            addr,
            mode,
            hits,
            handle,
        }
    }

    /// `host:port` of the backend
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_mode(&self, mode: BackendMode) {
        *self.mode.lock() = mode;
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A URL nothing listens on
pub async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{}", addr)
}

async fn serve<F, Fut>(handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response<Full<Bytes>>, Infallible>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                continue;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let _ = AutoBuilder::new(TokioExecutor::new())
                    .serve_connection(io, service_fn(handler))
                    .await;
            });
        }
    });

    (addr, handle)
}

fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response")
}

fn json<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    let mut response = response(
        StatusCode::OK,
        serde_json::to_string(value).expect("serializable"),
    );
    response
        .headers_mut()
        .insert("content-type", "application/json".parse().expect("valid header"));
    response
}
