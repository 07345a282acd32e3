//! Argo CD application types
//!
//! Only the subset of the Argo CD `Application` resource needed for
//! summaries is modeled; full resources are passed through as JSON.

use serde::{Deserialize, Serialize};

/// Application name wrapper used for API paths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ApplicationName(String);

impl ApplicationName {
    pub fn new(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Percent-encoded form for use as a single path segment
    pub fn encoded(&self) -> String {
        urlencoding::encode(&self.0).into_owned()
    }
}

impl std::fmt::Display for ApplicationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ApplicationName {
    fn from(s: &str) -> Self {
        ApplicationName::new(s.to_string())
    }
}

impl From<String> for ApplicationName {
    fn from(s: String) -> Self {
        ApplicationName::new(s)
    }
}

/// Response body of `GET /api/v1/applications`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationList {
    #[serde(default)]
    pub items: Option<Vec<ApplicationResource>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationResource {
    #[serde(default)]
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceMetadata {
    #[serde(default)]
    pub name: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationSpec {
    pub project: Option<String>,
    pub source: Option<ApplicationSource>,
    pub destination: Option<ApplicationDestination>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: Option<String>,
    pub path: Option<String>,
    pub target_revision: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationDestination {
    pub server: Option<String>,
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationStatus {
    pub sync: Option<StatusField>,
    pub health: Option<StatusField>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusField {
    pub status: Option<String>,
}

/// Flattened view of an application used by `list_applications`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationSummary {
    pub name: ApplicationName,
    pub namespace: Option<String>,
    pub project: Option<String>,
    pub sync_status: Option<String>,
    pub health_status: Option<String>,
    pub repo_url: Option<String>,
    pub target_revision: Option<String>,
    pub destination_namespace: Option<String>,
}

impl From<ApplicationResource> for ApplicationSummary {
    fn from(app: ApplicationResource) -> Self {
        let source = app.spec.source.unwrap_or_default();
        Self {
            name: ApplicationName::new(app.metadata.name),
            namespace: app.metadata.namespace,
            project: app.spec.project,
            sync_status: app.status.sync.and_then(|s| s.status),
            health_status: app.status.health.and_then(|h| h.status),
            repo_url: source.repo_url,
            target_revision: source.target_revision,
            destination_namespace: app.spec.destination.and_then(|d| d.namespace),
        }
    }
}

impl ApplicationList {
    pub fn into_summaries(self) -> Vec<ApplicationSummary> {
        self.items
            .unwrap_or_default()
            .into_iter()
            .map(ApplicationSummary::from)
            .collect()
    }
}
