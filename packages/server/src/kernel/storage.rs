//! Object storage adapter.
//!
//! The broker and pipeline only see the [`ObjectStorage`] trait. The real
//! implementation speaks plain authenticated HTTP against any S3-compatible
//! gateway; when credentials are absent the placeholder store takes its
//! place and returns deterministic URLs without performing any I/O, which is
//! what dev and test environments run with.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::ObjectStoreConfig;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a local file, returning its public URL.
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// URL a client can PUT to directly, valid for `ttl`.
    async fn presigned_put(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String>;

    fn public_url(&self, key: &str) -> String;

    /// Reachability probe for readiness checks.
    async fn ping(&self) -> Result<()>;
}

/// Storage key for a render output.
pub fn output_key(owner_id: uuid::Uuid, job_id: uuid::Uuid, extension: &str) -> String {
    format!("renders/{owner_id}/{job_id}/output.{extension}")
}

/// Storage key for an uploaded user asset.
pub fn asset_key(owner_id: uuid::Uuid, asset_id: uuid::Uuid, filename: &str) -> String {
    format!("users/{owner_id}/assets/{asset_id}/{filename}")
}

// =============================================================================
// HTTP-backed store
// =============================================================================

/// Store speaking authenticated HTTP against an S3-compatible endpoint.
pub struct HttpObjectStore {
    client: reqwest::Client,
    config: ObjectStoreConfig,
}

impl HttpObjectStore {
    pub fn new(config: ObjectStoreConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key
        )
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStore {
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String> {
        let body = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("reading render output {}", local_path.display()))?;
        let size = body.len();

        let url = self.object_url(key);
        let response = self
            .client
            .put(&url)
            .basic_auth(&self.config.access_key, Some(&self.config.secret_key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .context("object store upload request failed")?;
        response
            .error_for_status()
            .context("object store rejected upload")?;

        info!(key = %key, size_bytes = size, "uploaded render output");
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key);
        self.client
            .delete(&url)
            .basic_auth(&self.config.access_key, Some(&self.config.secret_key))
            .send()
            .await
            .context("object store delete request failed")?
            .error_for_status()
            .context("object store rejected delete")?;
        Ok(())
    }

    async fn presigned_put(&self, key: &str, content_type: &str, ttl: Duration) -> Result<String> {
        // The gateway accepts expiry and content-type as query parameters and
        // enforces them server-side.
        Ok(format!(
            "{}?expires={}&content-type={}",
            self.object_url(key),
            ttl.as_secs(),
            content_type,
        ))
    }

    fn public_url(&self, key: &str) -> String {
        self.object_url(key)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .head(self.config.endpoint.trim_end_matches('/'))
            .basic_auth(&self.config.access_key, Some(&self.config.secret_key))
            .send()
            .await
            .context("object store unreachable")?;
        Ok(())
    }
}

// =============================================================================
// Placeholder store (no credentials)
// =============================================================================

/// No-op store used when object store credentials are absent.
pub struct PlaceholderStore {
    base_url: String,
}

impl PlaceholderStore {
    pub fn new() -> Self {
        Self {
            base_url: "https://storage.invalid".to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for PlaceholderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStorage for PlaceholderStore {
    async fn upload(&self, local_path: &Path, key: &str, content_type: &str) -> Result<String> {
        debug!(
            key = %key,
            content_type = %content_type,
            path = %local_path.display(),
            "placeholder store: skipping upload"
        );
        Ok(self.public_url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        debug!(key = %key, "placeholder store: skipping delete");
        Ok(())
    }

    async fn presigned_put(&self, key: &str, _content_type: &str, _ttl: Duration) -> Result<String> {
        Ok(self.public_url(key))
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
