//! Resolves deployment hostnames and ids to O-Neko projects
//!
//! Two caches sit in front of the API, both with the configured TTL:
//! projects by id, and hostnames to (project id, version id). Hostname
//! lookups that miss call `byDeploymentUrl` and store the returned project
//! as a side effect, so resolving a freshly seen host costs one API call.

use crate::cache::TtlCache;
use crate::client::{OnekoClient, OnekoError};
use crate::clock::{system_clock, SharedClock};
use crate::oneko::{canonical_host, Project, ProjectVersion};
use crate::periodic::spawn_periodic;
use metrics::gauge;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How often the API connection is checked
pub const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Identifies one version of one project
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRef {
    pub project_id: String,
    pub version_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Api(#[from] OnekoError),

    #[error("no version matching this url found")]
    NoVersionMatchingUrl,

    #[error("did not find version with id {version_id} in project with id {project_id}")]
    VersionNotFound {
        project_id: String,
        version_id: String,
    },
}

pub struct DomainDirectory {
    client: Arc<OnekoClient>,
    projects: TtlCache<String, Arc<Project>, DirectoryError>,
    hosts: TtlCache<String, VersionRef, DirectoryError>,
    ping_started: AtomicBool,
}

impl DomainDirectory {
    pub fn new(client: Arc<OnekoClient>, ttl: Duration) -> Self {
        Self::with_clock(client, ttl, system_clock())
    }

    pub fn with_clock(client: Arc<OnekoClient>, ttl: Duration, clock: SharedClock) -> Self {
        let projects_client = Arc::clone(&client);
        let projects = TtlCache::with_clock(ttl, clock.clone(), move |project_id: String| {
            let client = Arc::clone(&projects_client);
            async move {
                info!(project_id = %project_id, "No cached project, calling O-Neko API");
                let project = client.get_project_by_id(&project_id).await?;
                Ok::<_, DirectoryError>(Arc::new(project))
            }
        });

        let hosts_client = Arc::clone(&client);
        let project_cache = projects.clone();
        let hosts = TtlCache::with_clock(ttl, clock, move |host: String| {
            let client = Arc::clone(&hosts_client);
            let projects = project_cache.clone();
            async move {
                info!(host = %host, "No cached host, calling O-Neko API");
                let project = client
                    .get_project_by_deployment_url(&host)
                    .await
                    .map_err(|e| match e {
                        OnekoError::NotFound(_) => DirectoryError::NoVersionMatchingUrl,
                        other => DirectoryError::Api(other),
                    })?;

                let version = project
                    .version_matching_url(&host)
                    .ok_or(DirectoryError::NoVersionMatchingUrl)?;
                let ids = VersionRef {
                    project_id: project.uuid.clone(),
                    version_id: version.uuid.clone(),
                };

                projects.set(project.uuid.clone(), Arc::new(project));
                record_cache_size(&projects);
                Ok::<_, DirectoryError>(ids)
            }
        });

        Self {
            client,
            projects,
            hosts,
            ping_started: AtomicBool::new(false),
        }
    }

    /// Resolve a request URL (host plus optional scheme and path) to the
    /// version serving it
    pub async fn resolve_by_host(
        &self,
        url: &str,
    ) -> Result<(Arc<Project>, ProjectVersion), DirectoryError> {
        if let Some(found) = self.find_in_cached_projects(url) {
            debug!(url = %url, "Serving project from cache");
            return Ok(found);
        }

        let host = canonical_host(url).to_string();
        let ids = self.hosts.get(&host).await?;
        self.resolve_by_ids(&ids.project_id, &ids.version_id).await
    }

    fn find_in_cached_projects(&self, url: &str) -> Option<(Arc<Project>, ProjectVersion)> {
        self.projects.live_values().into_iter().find_map(|project| {
            let version = project.version_matching_url(url)?.clone();
            Some((project, version))
        })
    }

    /// Resolve explicit ids. Version ids compare case-insensitively.
    pub async fn resolve_by_ids(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<(Arc<Project>, ProjectVersion), DirectoryError> {
        let project = self.projects.get(&project_id.to_string()).await?;
        record_cache_size(&self.projects);

        let version = project.version_by_id(version_id).cloned().ok_or_else(|| {
            DirectoryError::VersionNotFound {
                project_id: project_id.to_string(),
                version_id: version_id.to_string(),
            }
        })?;
        Ok((project, version))
    }

    /// Ask O-Neko to deploy a version. The cached project is dropped whether
    /// or not the call succeeded, so the next lookup sees the new state.
    pub async fn trigger_deployment(
        &self,
        project_id: &str,
        version_id: &str,
    ) -> Result<(), DirectoryError> {
        let result = self.client.deploy(project_id, version_id).await;
        self.projects.delete(&project_id.to_string());
        record_cache_size(&self.projects);

        match &result {
            Ok(()) => info!(project_id = %project_id, version_id = %version_id, "Triggered deployment"),
            Err(e) => error!(project_id = %project_id, version_id = %version_id, error = %e, "Deployment request failed"),
        }
        result.map_err(DirectoryError::from)
    }

    /// Every hostname of every version O-Neko knows about.
    ///
    /// Also seeds the hostname cache. When two versions claim the same
    /// hostname the first one listed wins.
    pub async fn all_known_hostnames(&self) -> Result<HashSet<String>, DirectoryError> {
        let projects = self.client.get_all_projects().await?;

        let mut hostnames = HashSet::new();
        for project in &projects {
            for version in &project.versions {
                for url in &version.urls {
                    let host = canonical_host(url);
                    if host.is_empty() || !hostnames.insert(host.to_string()) {
                        continue;
                    }
                    self.hosts.set_if_absent(
                        host.to_string(),
                        VersionRef {
                            project_id: project.uuid.clone(),
                            version_id: version.uuid.clone(),
                        },
                    );
                }
            }
        }

        debug!(count = hostnames.len(), "Collected known hostnames");
        Ok(hostnames)
    }

    /// Cached ids for a hostname, if any
    pub fn cached_host(&self, host: &str) -> Option<VersionRef> {
        self.hosts.peek(&host.to_string())
    }

    /// Number of cached projects, expired ones included
    pub fn cached_project_count(&self) -> usize {
        self.projects.len()
    }

    /// Start the background API connection check. Later calls do nothing.
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.ping_started.swap(true, Ordering::SeqCst) {
            return None;
        }

        gauge!("oneko_catnip_api_connected").set(0.0);
        let client = Arc::clone(&self.client);
        Some(spawn_periodic("oneko-ping", PING_INTERVAL, shutdown_rx, move || {
            let client = Arc::clone(&client);
            async move {
                match client.ping().await {
                    Ok(()) => gauge!("oneko_catnip_api_connected").set(1.0),
                    Err(e) => {
                        error!(error = %e, "Error reaching O-Neko");
                        gauge!("oneko_catnip_api_connected").set(0.0);
                    }
                }
            }
        }))
    }
}

fn record_cache_size(projects: &TtlCache<String, Arc<Project>, DirectoryError>) {
    gauge!("oneko_catnip_cache_size").set(projects.len() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        assert_eq!(
            DirectoryError::NoVersionMatchingUrl.to_string(),
            "no version matching this url found"
        );
    }

    #[test]
    fn test_api_errors_are_transparent() {
        let err = DirectoryError::from(OnekoError::NotFound(
            "no project found with id abc".to_string(),
        ));
        assert_eq!(err.to_string(), "no project found with id abc");
    }

    #[test]
    fn test_version_not_found_message() {
        let err = DirectoryError::VersionNotFound {
            project_id: "p".to_string(),
            version_id: "v".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "did not find version with id v in project with id p"
        );
    }
}
