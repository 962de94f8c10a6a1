//! Object storage for uploaded files.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` at `path`, replacing any existing object, and returns
    /// its URL.
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String>;

    /// A URL granting read access to `path` for `ttl_secs` seconds.
    async fn create_signed_url(&self, path: &str, ttl_secs: u64) -> Result<String>;

    async fn download(&self, path: &str) -> Result<Vec<u8>>;

    async fn remove(&self, path: &str) -> Result<()>;
}

/// In-memory object storage for tests.
pub struct InMemoryBlobStore {
    bucket: String,
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    fail_removals: RwLock<bool>,
}

impl InMemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
            fail_removals: RwLock::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().unwrap().contains_key(path)
    }

    pub fn content_type(&self, path: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap()
            .get(path)
            .map(|(_, ct)| ct.clone())
    }

    /// Makes every later `remove` fail.
    pub fn fail_removals(&self, fail: bool) {
        *self.fail_removals.write().unwrap() = fail;
    }

    fn url(&self, path: &str) -> String {
        format!("memory://{}/{}", self.bucket, path)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<String> {
        self.objects
            .write()
            .unwrap()
            .insert(path.to_string(), (bytes.to_vec(), content_type.to_string()));
        Ok(self.url(path))
    }

    async fn create_signed_url(&self, path: &str, ttl_secs: u64) -> Result<String> {
        if !self.contains(path) {
            bail!("object not found: {}", path);
        }
        Ok(format!("{}?expires_in={}", self.url(path), ttl_secs))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .unwrap()
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| anyhow!("object not found: {}", path))
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if *self.fail_removals.read().unwrap() {
            bail!("storage unavailable while removing {}", path);
        }
        self.objects.write().unwrap().remove(path);
        Ok(())
    }
}
