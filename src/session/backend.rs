//! Collaborator seam: where the channel lives and where snapshots come from.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tracing::debug;

use super::SessionKey;
use crate::errors::SnapshotError;
use crate::progress::PersistedSnapshot;

pub const CHANNEL_PATH: &str = "/v1/codebase-agent-rules";
pub const SNAPSHOT_PATH: &str = "/v1/repository-agent-snapshot";

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// URL of the generation channel for a repository and its codebases.
    fn channel_url(&self, key: &SessionKey, codebase_ids: &[String]) -> String;

    /// Stored snapshot for a repository; `Ok(None)` when none exists.
    async fn fetch_snapshot(
        &self,
        key: &SessionKey,
    ) -> Result<Option<PersistedSnapshot>, SnapshotError>;
}

/// Backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    fn channel_url(&self, key: &SessionKey, codebase_ids: &[String]) -> String {
        let raw = format!("{}{}", self.base_url, CHANNEL_PATH);
        match Url::parse(&raw) {
            Ok(mut url) => {
                url.query_pairs_mut()
                    .append_pair("owner_name", &key.owner)
                    .append_pair("repo_name", &key.repo)
                    .append_pair("codebase_ids", &codebase_ids.join(","));
                url.to_string()
            }
            // an unparseable base surfaces as a transport error on open
            Err(_) => raw,
        }
    }

    async fn fetch_snapshot(
        &self,
        key: &SessionKey,
    ) -> Result<Option<PersistedSnapshot>, SnapshotError> {
        let url = format!("{}{}", self.base_url, SNAPSHOT_PATH);
        debug!(%url, session = %key, "Fetching snapshot");
        let response = self
            .client
            .get(&url)
            .query(&[("owner_name", &key.owner), ("repo_name", &key.repo)])
            .send()
            .await
            .map_err(SnapshotError::Request)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SnapshotError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(SnapshotError::Request)?;
        let snapshot = serde_json::from_slice(&body).map_err(SnapshotError::Decode)?;
        Ok(Some(snapshot))
    }
}
