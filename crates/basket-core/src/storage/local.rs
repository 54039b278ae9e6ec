//! Local filesystem blob store with signed download URLs

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info};

use super::{validate_path, BlobStore};
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Query parameters carried by a signed URL
#[derive(Debug, Clone, Deserialize)]
pub struct SignedUrlParams {
    /// Unix timestamp after which the URL is rejected
    pub expires: i64,
    /// Hex HMAC-SHA256 signature
    pub signature: String,
}

/// Blob store backed by a local directory
///
/// Signed URLs point at `{public_base_url}/files/{path}` and are served by the
/// API server, which checks them with [`LocalBlobStore::verify_signature`].
pub struct LocalBlobStore {
    root: PathBuf,
    public_base_url: String,
    signing_key: Vec<u8>,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(
        root: impl Into<PathBuf>,
        public_base_url: &str,
        signing_key: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let root = root.into();
        let signing_key = signing_key.as_ref().to_vec();
        if signing_key.is_empty() {
            return Err(Error::Config("Blob signing key must not be empty".into()));
        }

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| {
                Error::Storage(format!(
                    "Failed to create storage directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
            info!("Created storage directory: {}", root.display());
        }

        Ok(Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            signing_key,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    /// MAC over `path\nexpires`
    fn mac(&self, path: &str, expires: i64) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| Error::Config(format!("Invalid signing key: {}", e)))?;
        mac.update(path.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn signature(&self, path: &str, expires: i64) -> Result<String> {
        Ok(hex::encode(self.mac(path, expires)?.finalize().into_bytes()))
    }

    /// Build a signed URL that expires `ttl_secs` after `now` (unix seconds)
    pub fn sign_url_at(&self, path: &str, ttl_secs: u64, now: i64) -> Result<String> {
        validate_path(path)?;
        let ttl = i64::try_from(ttl_secs)
            .map_err(|_| Error::Storage(format!("Signed URL TTL too large: {}", ttl_secs)))?;
        let expires = now.saturating_add(ttl);
        Ok(format!(
            "{}/files/{}?expires={}&signature={}",
            self.public_base_url,
            path,
            expires,
            self.signature(path, expires)?
        ))
    }

    /// Check a signed URL's parameters against `now` (unix seconds)
    pub fn verify_signature(&self, path: &str, params: &SignedUrlParams, now: i64) -> Result<()> {
        validate_path(path)?;
        let provided = hex::decode(&params.signature)
            .map_err(|_| Error::Storage("Invalid URL signature".into()))?;
        // verify_slice compares in constant time
        self.mac(path, params.expires)?
            .verify_slice(&provided)
            .map_err(|_| Error::Storage("Invalid URL signature".into()))?;
        if now > params.expires {
            return Err(Error::Storage("Signed URL expired".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let dest = self.object_path(path)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write to a temp file first so readers never see a partial image
        let tmp = dest.with_extension("part");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &dest).await?;

        debug!(path, content_type, size = bytes.len(), "Stored blob");
        Ok(())
    }

    async fn sign_url(&self, path: &str, ttl_secs: u64) -> Result<String> {
        self.sign_url_at(path, ttl_secs, Utc::now().timestamp())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let src = self.object_path(path)?;
        match tokio::fs::read(&src).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", path)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> LocalBlobStore {
        LocalBlobStore::new(dir.join("blobs"), "http://localhost:3000/", "secret").unwrap()
    }

    fn params_from(url: &str) -> SignedUrlParams {
        let query = url.split_once('?').unwrap().1;
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "signature" => signature = v.to_string(),
                _ => {}
            }
        }
        SignedUrlParams { expires, signature }
    }

    #[tokio::test]
    async fn test_upload_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.upload("alice/1.jpg", b"image", "image/jpeg").await.unwrap();
        assert_eq!(store.read("alice/1.jpg").await.unwrap(), b"image");

        // Re-upload replaces
        store.upload("alice/1.jpg", b"newer", "image/jpeg").await.unwrap();
        assert_eq!(store.read("alice/1.jpg").await.unwrap(), b"newer");

        assert!(matches!(
            store.read("alice/2.jpg").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.upload("../escape.jpg", b"x", "image/jpeg").await.is_err());
    }

    #[test]
    fn test_signed_url_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let url = store.sign_url_at("alice/1.jpg", 60, 1_000).unwrap();
        assert!(url.starts_with("http://localhost:3000/files/alice/1.jpg?expires=1060&signature="));

        let params = params_from(&url);
        assert!(store.verify_signature("alice/1.jpg", &params, 1_030).is_ok());
        assert!(store.verify_signature("alice/1.jpg", &params, 1_060).is_ok());

        // Expired
        assert!(store.verify_signature("alice/1.jpg", &params, 1_061).is_err());
        // Signature bound to the path
        assert!(store.verify_signature("bob/1.jpg", &params, 1_030).is_err());
        // Tampered expiry
        let tampered = SignedUrlParams {
            expires: 9_999,
            ..params.clone()
        };
        assert!(store.verify_signature("alice/1.jpg", &tampered, 1_030).is_err());
    }

    #[test]
    fn test_signature_is_hmac_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let url = store.sign_url_at("616c696365/1.jpg", 60, 1_000).unwrap();
        let params = params_from(&url);
        assert_eq!(
            params.signature,
            "4d8ef59dee09199d6ad5669b32806e0a60dc90290a7ff37d2a72f7913dc7e2ab"
        );

        // Hex case does not matter, malformed hex is rejected
        let upper = SignedUrlParams {
            signature: params.signature.to_ascii_uppercase(),
            ..params.clone()
        };
        assert!(store.verify_signature("616c696365/1.jpg", &upper, 1_000).is_ok());
        let garbage = SignedUrlParams {
            signature: "zz".into(),
            ..params
        };
        assert!(store.verify_signature("616c696365/1.jpg", &garbage, 1_000).is_err());
    }

    #[test]
    fn test_different_keys_produce_different_signatures() {
        let dir = tempfile::tempdir().unwrap();
        let a = LocalBlobStore::new(dir.path().join("a"), "http://x", "key-a").unwrap();
        let b = LocalBlobStore::new(dir.path().join("b"), "http://x", "key-b").unwrap();
        let url = a.sign_url_at("alice/1.jpg", 60, 0).unwrap();
        assert!(b.verify_signature("alice/1.jpg", &params_from(&url), 0).is_err());
    }

    #[test]
    fn test_empty_signing_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LocalBlobStore::new(dir.path(), "http://x", "").is_err());
    }
}
