//! O-Neko domain types as returned by the O-Neko API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A project known to O-Neko
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub image_name: String,
    #[serde(default)]
    pub versions: Vec<ProjectVersion>,
}

/// A deployable version of a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectVersion {
    pub uuid: String,
    pub name: String,
    /// Hostnames routed to this version, sometimes with a scheme
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub image_updated_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub desired_state: DesiredState,
    #[serde(default)]
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredState {
    Deployed,
    #[default]
    NotDeployed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub status: DeployableStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployableStatus {
    Pending,
    Running,
    Failed,
    #[default]
    Unknown,
    NotScheduled,
}

impl Project {
    /// Find the first version owning a URL that is a prefix of `url`.
    ///
    /// Schemes are ignored on both sides. This is a plain prefix comparison,
    /// so `foo.example.com` also claims `foo.example.com.evil.com`.
    pub fn version_matching_url(&self, url: &str) -> Option<&ProjectVersion> {
        let wanted = strip_protocol(url);
        self.versions.iter().find(|version| {
            version
                .urls
                .iter()
                .any(|candidate| wanted.starts_with(strip_protocol(candidate)))
        })
    }

    /// Find a version by id, ignoring ASCII case
    pub fn version_by_id(&self, version_id: &str) -> Option<&ProjectVersion> {
        self.versions
            .iter()
            .find(|version| version.uuid.eq_ignore_ascii_case(version_id))
    }
}

impl ProjectVersion {
    /// Whether O-Neko intends this version to run. Says nothing about
    /// whether the backend actually answers yet.
    pub fn is_deployed(&self) -> bool {
        self.desired_state == DesiredState::Deployed
    }
}

/// Strip a leading `http://` or `https://`
pub fn strip_protocol(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

/// Reduce a URL to its host part: no scheme, no path
pub fn canonical_host(url: &str) -> &str {
    let without_protocol = strip_protocol(url);
    match without_protocol.find('/') {
        Some(idx) => &without_protocol[..idx],
        None => without_protocol,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(uuid: &str, urls: &[&str]) -> ProjectVersion {
        ProjectVersion {
            uuid: uuid.to_string(),
            name: format!("version-{}", uuid),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            image_updated_date: None,
            desired_state: DesiredState::NotDeployed,
            deployment: Deployment::default(),
        }
    }

    fn project(versions: Vec<ProjectVersion>) -> Project {
        Project {
            uuid: "p1".to_string(),
            name: "Demo Project".to_string(),
            image_name: "docker.mycompany.com/demoproject".to_string(),
            versions,
        }
    }

    #[test]
    fn test_canonical_host() {
        assert_eq!(canonical_host("https://foo.example.com/bar/baz"), "foo.example.com");
        assert_eq!(canonical_host("http://foo.example.com"), "foo.example.com");
        assert_eq!(canonical_host("foo.example.com:8443/x"), "foo.example.com:8443");
        assert_eq!(canonical_host("foo.example.com"), "foo.example.com");
        assert_eq!(canonical_host(""), "");
    }

    #[test]
    fn test_strip_protocol_only_strips_http_schemes() {
        assert_eq!(strip_protocol("https://a/b"), "a/b");
        assert_eq!(strip_protocol("ftp://a/b"), "ftp://a/b");
    }

    #[test]
    fn test_version_matching_url_with_path() {
        let p = project(vec![
            version("v1", &["https://one.example.com"]),
            version("v2", &["two.example.com"]),
        ]);

        assert_eq!(
            p.version_matching_url("https://two.example.com/foo/index.html").unwrap().uuid,
            "v2"
        );
        assert_eq!(p.version_matching_url("one.example.com").unwrap().uuid, "v1");
        assert!(p.version_matching_url("three.example.com").is_none());
    }

    #[test]
    fn test_version_matching_url_is_a_prefix_match() {
        let p = project(vec![version("v1", &["foo.example.com"])]);
        assert_eq!(
            p.version_matching_url("foo.example.com.evil.com").unwrap().uuid,
            "v1"
        );
    }

    #[test]
    fn test_version_by_id_ignores_case() {
        let p = project(vec![version("5EB9C99F-abc", &[])]);
        assert!(p.version_by_id("5eb9c99f-ABC").is_some());
        assert!(p.version_by_id("other").is_none());
    }

    #[test]
    fn test_parse_project_json() {
        let json = r#"{
            "uuid": "63638583-a9e7-4c0a-9a1b-0f3a4b7b1e0d",
            "name": "Demo Project",
            "imageName": "docker.mycompany.com/demoproject",
            "versions": [{
                "uuid": "5eb9c99f-8f7e-4a67-b0a4-6c2f1a9d3e21",
                "name": "demoversion-for-unittest",
                "urls": ["my-test-instance.oneko.company.cloud"],
                "imageUpdatedDate": "2024-03-01T12:00:00Z",
                "desiredState": "Deployed",
                "deployment": {"status": "Running", "timestamp": "2024-03-01T12:05:00Z"}
            }]
        }"#;

        let project: Project = serde_json::from_str(json).unwrap();
        assert_eq!(project.name, "Demo Project");
        let version = &project.versions[0];
        assert!(version.is_deployed());
        assert_eq!(version.deployment.status, DeployableStatus::Running);
        assert!(version.image_updated_date.is_some());
    }

    #[test]
    fn test_parse_minimal_version_defaults() {
        let json = r#"{"uuid": "p", "name": "n", "versions": [{"uuid": "v", "name": "m"}]}"#;
        let project: Project = serde_json::from_str(json).unwrap();
        let version = &project.versions[0];
        assert!(!version.is_deployed());
        assert_eq!(version.deployment.status, DeployableStatus::Unknown);
        assert!(version.urls.is_empty());
    }
}
