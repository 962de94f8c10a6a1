//! Filesystem object storage with HMAC-signed, expiring URLs.
//!
//! Objects live at `{root}/{bucket}/{path}`. A signed URL carries an
//! `expires` Unix timestamp and a hex HMAC-SHA256 over
//! `"{bucket}/{path}\n{expires}"`, keyed by the secret named in
//! `storage.signing_key_env`. Whatever serves the files verifies the
//! signature with [`FsBlobStore::verify_signature`].

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use case_knowledge_core::blob::BlobStore;

use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

pub struct FsBlobStore {
    root: PathBuf,
    bucket: String,
    public_base_url: Option<String>,
    signing_key: Option<Vec<u8>>,
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        bucket: impl Into<String>,
        public_base_url: Option<String>,
        signing_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.map(|u| u.trim_end_matches('/').to_string()),
            signing_key,
        }
    }

    /// Builds the store from `[storage]`, reading the signing key from the
    /// environment. Signed URLs are unavailable when the key is unset.
    pub fn from_config(config: &StorageConfig) -> Self {
        let signing_key = std::env::var(&config.signing_key_env)
            .ok()
            .filter(|k| !k.is_empty())
            .map(String::into_bytes);
        if signing_key.is_none() {
            tracing::debug!(
                env = %config.signing_key_env,
                "signing key not set; signed URLs disabled"
            );
        }
        Self::new(
            config.root.clone(),
            config.bucket.clone(),
            config.public_base_url.clone(),
            signing_key,
        )
    }

    /// Resolves an object path inside the bucket, rejecting traversal.
    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid object path: {:?}", path);
        }
        Ok(self.root.join(&self.bucket).join(relative))
    }

    fn public_url(&self, path: &str, full_path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}/{}", base, self.bucket, path),
            None => format!("file://{}", full_path.display()),
        }
    }

    fn signature(&self, key: &[u8], path: &str, expires: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(format!("{}/{}\n{}", self.bucket, path, expires).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a signature produced by `create_signed_url` and that it has
    /// not expired at `now` (Unix seconds).
    pub fn verify_signature(&self, path: &str, expires: i64, signature: &str, now: i64) -> bool {
        let Some(key) = &self.signing_key else {
            return false;
        };
        if now > expires {
            return false;
        }
        let Ok(sig) = hex::decode(signature) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(format!("{}/{}\n{}", self.bucket, path, expires).as_bytes());
        mac.verify_slice(&sig).is_ok()
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        let full = self.object_path(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .with_context(|| format!("Failed to write {}", full.display()))?;
        tracing::debug!(path, content_type, size = bytes.len(), "stored object");
        Ok(self.public_url(path, &full))
    }

    async fn create_signed_url(&self, path: &str, ttl_secs: u64) -> Result<String> {
        let Some(key) = &self.signing_key else {
            bail!("no signing key configured; cannot create signed URLs");
        };
        let full = self.object_path(path)?;
        if !tokio::fs::try_exists(&full).await.unwrap_or(false) {
            bail!("object not found: {}", path);
        }
        let expires = chrono::Utc::now().timestamp() + ttl_secs as i64;
        let signature = self.signature(key, path, expires);
        Ok(format!(
            "{}?expires={}&signature={}",
            self.public_url(path, &full),
            expires,
            signature
        ))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.object_path(path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", full.display()))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let full = self.object_path(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", full.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir, key: Option<&str>) -> FsBlobStore {
        FsBlobStore::new(
            dir.path(),
            "construction_files",
            Some("https://files.example.com/".to_string()),
            key.map(|k| k.as_bytes().to_vec()),
        )
    }

    #[tokio::test]
    async fn upload_download_remove() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, None);
        let url = s
            .upload("cases/c1/documents/plan.pdf", b"%PDF", "application/pdf")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://files.example.com/construction_files/cases/c1/documents/plan.pdf"
        );
        assert!(dir
            .path()
            .join("construction_files/cases/c1/documents/plan.pdf")
            .exists());
        assert_eq!(s.download("cases/c1/documents/plan.pdf").await.unwrap(), b"%PDF");
        s.remove("cases/c1/documents/plan.pdf").await.unwrap();
        s.remove("cases/c1/documents/plan.pdf").await.unwrap();
        assert!(s.download("cases/c1/documents/plan.pdf").await.is_err());
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, None);
        assert!(s.upload("../escape.txt", b"x", "text/plain").await.is_err());
        assert!(s.upload("/etc/passwd", b"x", "text/plain").await.is_err());
    }

    #[tokio::test]
    async fn signed_url_verifies_until_expiry() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, Some("secret"));
        s.upload("cases/c1/images/a.png", b"png", "image/png")
            .await
            .unwrap();
        let url = s
            .create_signed_url("cases/c1/images/a.png", 60)
            .await
            .unwrap();

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=').unwrap() {
                ("expires", v) => expires = v.parse().unwrap(),
                ("signature", v) => signature = v.to_string(),
                _ => {}
            }
        }

        let now = chrono::Utc::now().timestamp();
        assert!(s.verify_signature("cases/c1/images/a.png", expires, &signature, now));
        assert!(!s.verify_signature("cases/c1/images/b.png", expires, &signature, now));
        assert!(!s.verify_signature("cases/c1/images/a.png", expires, &signature, expires + 1));
    }

    #[tokio::test]
    async fn signing_requires_key() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, None);
        s.upload("p.txt", b"x", "text/plain").await.unwrap();
        let err = s.create_signed_url("p.txt", 60).await.unwrap_err();
        assert!(err.to_string().contains("signing key"));
    }
}
