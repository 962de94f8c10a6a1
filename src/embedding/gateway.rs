use std::sync::Arc;
use std::time::Duration;

use case_knowledge_core::embedding::EmbeddingProvider;
use case_knowledge_core::error::{CaseError, CaseResult};

use crate::config::EmbeddingConfig;
use crate::http::RetryPolicy;

/// Text → vector through one pinned provider.
///
/// Batches requests, bounds each provider call with a timeout, and checks
/// that every returned vector has the provider's declared dimension, so a
/// misbehaving backend can never put a short vector into the index.
#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, timeout: Duration) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Gateway whose timeout covers every retry attempt of one batch.
    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let timeout = RetryPolicy::new(config.max_retries)
            .deadline(Duration::from_secs(config.timeout_secs));
        Self::new(provider, config.batch_size, timeout)
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub async fn embed(&self, text: &str) -> CaseResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| CaseError::embedding("empty embedding response"))
    }

    /// Embeds `texts` in order, one provider call per batch.
    pub async fn embed_batch(&self, texts: &[String]) -> CaseResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = tokio::time::timeout(self.timeout, self.provider.embed(batch))
                .await
                .map_err(|_| {
                    CaseError::embedding(format!(
                        "{} timed out after {:?}",
                        self.model_name(),
                        self.timeout
                    ))
                })?
                .map_err(|e| CaseError::embedding(format!("{:#}", e)))?;

            if vectors.len() != batch.len() {
                return Err(CaseError::embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims()) {
                return Err(CaseError::embedding(format!(
                    "model {} returned {} dims, expected {}",
                    self.model_name(),
                    bad.len(),
                    self.dims()
                )));
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}
