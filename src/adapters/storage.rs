//! Object-store adapter over an S3-compatible HTTP endpoint.
//!
//! Only the two capabilities the pipeline needs: PUT a local file under a
//! key, and HEAD a key for existence. Bucket policy, signing, and lifecycle
//! belong to the storage layer behind the endpoint.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::PipelineError;

use super::ObjectStore;

/// S3-style object store client
pub struct HttpObjectStore {
    endpoint: String,
    bucket: String,
    /// Optional bearer token for gateway-fronted buckets
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>, token: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bucket: bucket.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket,
            key
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<(), PipelineError> {
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            PipelineError::TransientService(format!(
                "failed to read '{}' for upload: {}",
                local_path.display(),
                e
            ))
        })?;

        debug!(key, bytes = bytes.len(), "Uploading object");

        let response = self
            .authorize(self.client.put(self.object_url(key)))
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| PipelineError::TransientService(format!("storage put failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(PipelineError::TransientService(format!(
                "storage put of '{}' returned {}",
                key,
                response.status()
            )));
        }

        info!(key, "Object stored");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, PipelineError> {
        let response = self
            .authorize(self.client.head(self.object_url(key)))
            .send()
            .await
            .map_err(|e| PipelineError::TransientService(format!("storage head failed: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            reqwest::StatusCode::NOT_FOUND => Ok(false),
            status => Err(PipelineError::TransientService(format!(
                "storage head of '{}' returned {}",
                key, status
            ))),
        }
    }
}
