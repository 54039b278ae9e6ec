//! Blob storage for receipt images
//!
//! # Architecture
//!
//! - `BlobStore` trait: upload, short-lived signed URLs, and reads
//! - `LocalBlobStore`: files under a local directory, URLs signed with
//!   HMAC-SHA256 under a server secret and served by the API's `/files` route
//!
//! Object paths are relative, slash-separated keys such as `616c696365/42.jpg`.

use async_trait::async_trait;

use crate::error::{Error, Result};

mod local;

pub use local::{LocalBlobStore, SignedUrlParams};

/// Interface for blob storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &str;

    /// Store `bytes` under `path`, replacing any existing object
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    /// URL granting read access to `path` for `ttl_secs` seconds
    async fn sign_url(&self, path: &str, ttl_secs: u64) -> Result<String>;

    /// Read the object at `path`
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
}

/// Reject keys that could escape the storage root or are not plain relative paths
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.len() > 512 {
        return Err(Error::Storage(format!("Invalid object path length: {}", path.len())));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(Error::Storage(format!("Object path must be relative: {}", path)));
    }
    for segment in path.split('/') {
        let allowed = segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'));
        if segment.is_empty() || segment == "." || segment == ".." || !allowed {
            return Err(Error::Storage(format!("Invalid object path: {}", path)));
        }
    }
    Ok(())
}

/// Content type for a stored image extension
pub fn content_type_for(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}
