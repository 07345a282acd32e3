use crate::argocd::error::ArgocdError;
use crate::types::{ApplicationList, ApplicationName, ApplicationSummary, ArgocdCredentials};

use serde::Serialize;
use serde_json::Value;
use tokio::time::{Duration, sleep};
use tracing::{debug, warn};
use url::Url;

/// Default maximum number of attempts for idempotent API reads
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Options for `POST /api/v1/applications/{name}/sync`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prune: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

/// Thin client for the Argo CD REST API
#[derive(Clone)]
pub struct ArgocdClient {
    http: reqwest::Client,
    base_url: Url,
    api_token: String,
    max_attempts: u32,
}

impl ArgocdClient {
    /// Builds a client from credentials.
    ///
    /// Fails when the base URL is empty or unparsable or the token is empty.
    pub fn new(
        credentials: &ArgocdCredentials,
        timeout: Option<Duration>,
    ) -> Result<Self, ArgocdError> {
        let base_url = parse_base_url(&credentials.base_url)?;
        if credentials.api_token.is_empty() {
            return Err(ArgocdError::MissingToken);
        }

        let http = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()?;

        Ok(Self {
            http,
            base_url,
            api_token: credentials.api_token.clone(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    /// Overrides the number of attempts made for read requests
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Lists applications, optionally filtered by Argo CD's `search` query
    pub async fn list_applications(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<ApplicationSummary>, ArgocdError> {
        let query: Vec<(&str, &str)> = search.map(|s| vec![("search", s)]).unwrap_or_default();
        let body = self.get_json("api/v1/applications", &query).await?;
        let list: ApplicationList = serde_json::from_value(body)?;
        Ok(list.into_summaries())
    }

    pub async fn get_application(&self, name: &ApplicationName) -> Result<Value, ArgocdError> {
        self.get_json(&format!("api/v1/applications/{}", name.encoded()), &[])
            .await
    }

    pub async fn get_application_resource_tree(
        &self,
        name: &ApplicationName,
    ) -> Result<Value, ArgocdError> {
        self.get_json(
            &format!("api/v1/applications/{}/resource-tree", name.encoded()),
            &[],
        )
        .await
    }

    pub async fn get_application_managed_resources(
        &self,
        name: &ApplicationName,
    ) -> Result<Value, ArgocdError> {
        self.get_json(
            &format!("api/v1/applications/{}/managed-resources", name.encoded()),
            &[],
        )
        .await
    }

    /// Triggers a sync. Not retried, since a sync is not idempotent.
    pub async fn sync_application(
        &self,
        name: &ApplicationName,
        options: &SyncOptions,
    ) -> Result<Value, ArgocdError> {
        let url = self.endpoint(&format!("api/v1/applications/{}/sync", name.encoded()))?;
        debug!("POST {}", url);
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_token)
            .json(options)
            .send()
            .await?;
        decode_response(response).await
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, ArgocdError> {
        let url = self.endpoint(path)?;
        let mut attempt = 1;
        loop {
            debug!(attempt, "GET {}", url);
            let result = match self
                .http
                .get(url.clone())
                .bearer_auth(&self.api_token)
                .query(query)
                .send()
                .await
            {
                Ok(response) => decode_response(response).await,
                Err(e) => Err(ArgocdError::from(e)),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "Argo CD request failed - will retry");
                    sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ArgocdError> {
        self.base_url
            .join(path)
            .map_err(|_| ArgocdError::InvalidBaseUrl(self.base_url.to_string()))
    }
}

async fn decode_response(response: reqwest::Response) -> Result<Value, ArgocdError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ArgocdError::Status {
            status: status.as_u16(),
            body,
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Parses the base URL, forcing a trailing slash so relative joins keep any path prefix
fn parse_base_url(raw: &str) -> Result<Url, ArgocdError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ArgocdError::InvalidBaseUrl(raw.to_string()));
    }
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&normalized).map_err(|_| ArgocdError::InvalidBaseUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ArgocdError::InvalidBaseUrl(raw.to_string())),
    }
}
