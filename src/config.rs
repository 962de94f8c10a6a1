//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! API keys and the URL signing key are read from the environment, never
//! from the file.
//!
//! ```toml
//! [db]
//! path = "./data/casekb.sqlite"
//!
//! [storage]
//! root = "./data/blobs"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Environment variable holding the HMAC key for signed URLs.
    #[serde(default = "default_signing_key_env")]
    pub signing_key_env: String,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
    /// Prefix for generated URLs; `file://` URLs are produced when unset.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            bucket: default_bucket(),
            signing_key_env: default_signing_key_env(),
            signed_url_ttl_secs: default_signed_url_ttl(),
            public_base_url: None,
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_bucket() -> String {
    "construction_files".to_string()
}
fn default_signing_key_env() -> String {
    "CASEKB_SIGNING_KEY".to_string()
}
fn default_signed_url_ttl() -> u64 {
    86_400
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama`, `local` or `hashing`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: Some("text-embedding-3-small".to_string()),
            dims: Some(1536),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_max_tokens")]
    pub max_tokens: u32,
    /// Model used to clean raw transcripts.
    #[serde(default = "default_completion_model")]
    pub clean_model: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    #[serde(default = "default_caption_model")]
    pub caption_model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_completion_retries")]
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: default_completion_model(),
            temperature: default_temperature(),
            max_tokens: default_completion_max_tokens(),
            clean_model: default_completion_model(),
            transcription_model: default_transcription_model(),
            caption_model: default_caption_model(),
            base_url: default_base_url(),
            timeout_secs: default_completion_timeout(),
            max_retries: default_completion_retries(),
        }
    }
}

fn default_completion_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_completion_max_tokens() -> u32 {
    1000
}
fn default_transcription_model() -> String {
    "gpt-4o-transcribe".to_string()
}
fn default_caption_model() -> String {
    "gpt-4.1".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_completion_timeout() -> u64 {
    120
}
fn default_completion_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Upper bound on files processed concurrently within one case.
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Timeout applied to each store, registry and blob call.
    #[serde(default = "default_store_timeout")]
    pub store_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_files: default_max_concurrent_files(),
            store_timeout_secs: default_store_timeout(),
        }
    }
}

fn default_max_concurrent_files() -> usize {
    4
}
fn default_store_timeout() -> u64 {
    30
}

impl Config {
    /// A configuration rooted at `dir` with offline defaults: hashing
    /// embeddings and every other section at its default.
    pub fn offline(dir: &Path) -> Self {
        Self {
            db: DbConfig {
                path: dir.join("casekb.sqlite"),
            },
            storage: StorageConfig {
                root: dir.join("blobs"),
                ..StorageConfig::default()
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig {
                provider: "hashing".to_string(),
                model: None,
                dims: Some(256),
                ..EmbeddingConfig::default()
            },
            completion: CompletionConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parses and validates configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "local" | "hashing" => {
            if config.embedding.dims == Some(0) {
                bail!("embedding.dims must be > 0");
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, local, or hashing.",
            other
        ),
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    if !(0.0..=2.0).contains(&config.completion.temperature) {
        bail!("completion.temperature must be in [0.0, 2.0]");
    }

    if config.ingest.max_concurrent_files == 0 {
        bail!("ingest.max_concurrent_files must be >= 1");
    }

    if config.storage.signed_url_ttl_secs == 0 {
        bail!("storage.signed_url_ttl_secs must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg = parse_config("[db]\npath = \"./x.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.max_tokens, 300);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.embedding.provider, "openai");
        assert_eq!(cfg.embedding.dims, Some(1536));
        assert_eq!(cfg.completion.model, "gpt-4");
        assert_eq!(cfg.completion.transcription_model, "gpt-4o-transcribe");
        assert_eq!(cfg.completion.caption_model, "gpt-4.1");
        assert_eq!(cfg.storage.bucket, "construction_files");
        assert_eq!(cfg.storage.signed_url_ttl_secs, 86_400);
        assert_eq!(cfg.ingest.max_concurrent_files, 4);
    }

    #[test]
    fn rejects_zero_max_tokens() {
        let err = parse_config("[db]\npath = \"x\"\n[chunking]\nmax_tokens = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn rejects_unknown_provider() {
        let err =
            parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn openai_requires_dims() {
        let toml = "[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n";
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let toml = "[db]\npath = \"x\"\n[ingest]\nmax_concurrent_files = 0\n";
        assert!(parse_config(toml).is_err());
    }

    #[test]
    fn offline_config_uses_hashing_embedder() {
        let cfg = Config::offline(Path::new("/tmp/casekb"));
        assert_eq!(cfg.embedding.provider, "hashing");
        assert_eq!(cfg.db.path, PathBuf::from("/tmp/casekb/casekb.sqlite"));
    }
}
