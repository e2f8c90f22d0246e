//! HTTP client for the O-Neko orchestration API
//!
//! Every call authenticates with HTTP basic auth against the configured base
//! URL and records its duration in the `oneko_catnip_api_*` histograms.

use crate::config::ApiConfig;
use crate::oneko::Project;
use metrics::{counter, histogram};
use reqwest::{RequestBuilder, Response, StatusCode};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Errors returned by [`OnekoClient`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OnekoError {
    #[error("API url must not be empty")]
    MissingBaseUrl,

    #[error("API username and password must be set")]
    MissingCredentials,

    /// The API answered 404; carries the message to show
    #[error("{0}")]
    NotFound(String),

    #[error("encountered an error calling O-Neko API: {reason} ({status})")]
    Status { status: u16, reason: String },

    #[error("encountered an error calling O-Neko API: {0}")]
    Transport(String),

    #[error("encountered an error parsing the response from the O-Neko API: {0}")]
    Decode(String),
}

impl OnekoError {
    fn from_status(status: StatusCode) -> Self {
        OnekoError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        }
    }
}

impl From<reqwest::Error> for OnekoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            OnekoError::Decode(err.to_string())
        } else {
            OnekoError::Transport(err.to_string())
        }
    }
}

/// Client for the O-Neko REST API
pub struct OnekoClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl OnekoClient {
    /// Build a client. Refuses an empty base URL or incomplete credentials.
    pub fn new(
        base_url: &str,
        username: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, OnekoError> {
        if base_url.trim().is_empty() {
            return Err(OnekoError::MissingBaseUrl);
        }
        if username.is_empty() || password.is_empty() {
            return Err(OnekoError::MissingCredentials);
        }

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self, OnekoError> {
        Self::new(
            &config.base_url,
            &config.username,
            &config.password,
            config.request_timeout(),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, OnekoError> {
        let response = request
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        Ok(response)
    }

    /// Check that the API is reachable and accepts our credentials
    pub async fn ping(&self) -> Result<(), OnekoError> {
        let start = Instant::now();
        let result = self.send(self.http.get(self.url("/api/session"))).await;
        histogram!("oneko_catnip_api_ping_duration_seconds").record(start.elapsed().as_secs_f64());

        let response = result?;
        if !response.status().is_success() {
            return Err(OnekoError::from_status(response.status()));
        }
        Ok(())
    }

    pub async fn get_project_by_id(&self, project_id: &str) -> Result<Project, OnekoError> {
        let start = Instant::now();
        let result = self.fetch_project_by_id(project_id).await;
        record_call_duration(start);
        result
    }

    async fn fetch_project_by_id(&self, project_id: &str) -> Result<Project, OnekoError> {
        debug!(project_id = %project_id, "Fetching project from O-Neko");
        let response = self
            .send(self.http.get(self.url(&format!("/api/project/{}", project_id))))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<Project>().await?),
            StatusCode::NOT_FOUND => Err(OnekoError::NotFound(format!(
                "no project found with id {}",
                project_id
            ))),
            status => Err(OnekoError::from_status(status)),
        }
    }

    pub async fn get_all_projects(&self) -> Result<Vec<Project>, OnekoError> {
        let start = Instant::now();
        let result = self.fetch_all_projects().await;
        record_call_duration(start);
        result
    }

    async fn fetch_all_projects(&self) -> Result<Vec<Project>, OnekoError> {
        debug!("Fetching all projects from O-Neko");
        let response = self.send(self.http.get(self.url("/api/project"))).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OnekoError::from_status(status));
        }
        Ok(response.json::<Vec<Project>>().await?)
    }

    /// Look up the project owning a deployment hostname
    pub async fn get_project_by_deployment_url(&self, host: &str) -> Result<Project, OnekoError> {
        let start = Instant::now();
        let result = self.fetch_project_by_deployment_url(host).await;
        record_call_duration(start);
        result
    }

    async fn fetch_project_by_deployment_url(&self, host: &str) -> Result<Project, OnekoError> {
        debug!(host = %host, "Looking up project by deployment url");
        let request = self
            .http
            .get(self.url("/api/project/byDeploymentUrl"))
            .query(&[("deploymentUrl", host)]);
        let response = self.send(request).await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<Project>().await?),
            StatusCode::NOT_FOUND => Err(OnekoError::NotFound(
                "no version matching this url found".to_string(),
            )),
            status => Err(OnekoError::from_status(status)),
        }
    }

    /// Ask O-Neko to deploy a version
    pub async fn deploy(&self, project_id: &str, version_id: &str) -> Result<(), OnekoError> {
        let start = Instant::now();
        let result = self.request_deploy(project_id, version_id).await;
        record_call_duration(start);

        let success = if result.is_ok() { "true" } else { "false" };
        counter!("oneko_catnip_wakeups_total", "success" => success).increment(1);
        result
    }

    async fn request_deploy(&self, project_id: &str, version_id: &str) -> Result<(), OnekoError> {
        let path = format!("/api/project/{}/version/{}/deploy", project_id, version_id);
        let response = self.send(self.http.post(self.url(&path))).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                let body = response.text().await.unwrap_or_default();
                Err(OnekoError::NotFound(body))
            }
            status => Err(OnekoError::from_status(status)),
        }
    }
}

fn record_call_duration(start: Instant) {
    histogram!("oneko_catnip_api_call_duration_seconds").record(start.elapsed().as_secs_f64());
}
