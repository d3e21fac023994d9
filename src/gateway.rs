//! Object-store gateway.
//!
//! Contract (spec section 4.1): `fetch` returns the exact generation
//! requested and fails `NotFound` if it no longer exists; `upload` writes a
//! new object. Bytes are materialized to a working area owned by the
//! orchestrator and released on every exit path via [`WorkingArea`]'s Drop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone, Default)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    /// Client-controlled display name, carried in the `originalfilename`
    /// user-metadata attribute when present.
    pub original_filename: Option<String>,
    pub generation: i64,
}

#[async_trait]
pub trait ObjectStoreGateway: Send + Sync {
    async fn fetch(&self, bucket: &str, name: &str, generation: i64) -> CoreResult<(Vec<u8>, ObjectMetadata)>;
    /// Looks up an object's current metadata, in particular its live
    /// generation number, without downloading its bytes. Ingestion callers
    /// use this to learn the real generation to claim and fetch against —
    /// the idempotency protocol is keyed on it (spec section 3/4.1).
    async fn stat(&self, bucket: &str, name: &str) -> CoreResult<ObjectMetadata>;
    async fn upload(&self, bucket: &str, name: &str, bytes: &[u8], content_type: &str) -> CoreResult<ObjectMetadata>;
}

/// GCS JSON API-backed gateway. Timeouts default to 30s per spec section 5.
pub struct GcsGateway {
    client: reqwest::Client,
}

impl GcsGateway {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self { client }
    }
}

impl Default for GcsGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStoreGateway for GcsGateway {
    async fn fetch(&self, bucket: &str, name: &str, generation: i64) -> CoreResult<(Vec<u8>, ObjectMetadata)> {
        let encoded_name = urlencode(name);
        let url = format!(
            "https://storage.googleapis.com/download/storage/v1/b/{}/o/{}?alt=media&generation={}",
            bucket, encoded_name, generation
        );

        let resp = self.client.get(&url).send().await?;

        if resp.status().as_u16() == 404 {
            return Err(CoreError::NotFound(format!(
                "{}/{} generation {}",
                bucket, name, generation
            )));
        }
        if !resp.status().is_success() {
            return Err(CoreError::Upstream(format!(
                "gcs fetch {}/{} generation {}: status {}",
                bucket, name, generation, resp.status()
            )));
        }

        let original_filename = resp
            .headers()
            .get("x-goog-meta-originalfilename")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = resp.bytes().await?.to_vec();

        Ok((
            bytes,
            ObjectMetadata {
                content_type,
                original_filename,
                generation,
            },
        ))
    }

    async fn stat(&self, bucket: &str, name: &str) -> CoreResult<ObjectMetadata> {
        let encoded_name = urlencode(name);
        let url = format!("https://storage.googleapis.com/storage/v1/b/{}/o/{}", bucket, encoded_name);

        let resp = self.client.get(&url).send().await?;

        if resp.status().as_u16() == 404 {
            return Err(CoreError::NotFound(format!("{}/{}", bucket, name)));
        }
        if !resp.status().is_success() {
            return Err(CoreError::Upstream(format!("gcs stat {}/{}: status {}", bucket, name, resp.status())));
        }

        let json: serde_json::Value = resp.json().await?;
        let generation = json
            .get("generation")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| CoreError::Upstream(format!("gcs stat {}/{}: response missing generation", bucket, name)))?;
        let content_type = json.get("contentType").and_then(|v| v.as_str()).map(String::from);
        let original_filename = json
            .get("metadata")
            .and_then(|m| m.get("originalfilename"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Ok(ObjectMetadata {
            content_type,
            original_filename,
            generation,
        })
    }

    async fn upload(&self, bucket: &str, name: &str, bytes: &[u8], content_type: &str) -> CoreResult<ObjectMetadata> {
        let encoded_name = urlencode(name);
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            bucket, encoded_name
        );

        let resp = self
            .client
            .post(&url)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CoreError::Upstream(format!(
                "gcs upload {}/{}: status {}",
                bucket, name, resp.status()
            )));
        }

        let json: serde_json::Value = resp.json().await?;
        let generation = json
            .get("generation")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);

        Ok(ObjectMetadata {
            content_type: Some(content_type.to_string()),
            original_filename: None,
            generation,
        })
    }
}

fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

/// Per-document scratch directory, deleted on every exit path (including
/// panics) via `TempDir`'s Drop impl.
pub struct WorkingArea {
    dir: TempDir,
}

impl WorkingArea {
    pub fn new() -> CoreResult<Self> {
        let dir = tempfile::tempdir()
            .map_err(|e| CoreError::Fatal(format!("failed to create working area: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write_file(&self, relative: &str, bytes: &[u8]) -> CoreResult<PathBuf> {
        let path = self.dir.path().join(relative);
        std::fs::write(&path, bytes)
            .map_err(|e| CoreError::Fatal(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_area_deletes_on_drop() {
        let path;
        {
            let area = WorkingArea::new().unwrap();
            path = area.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
