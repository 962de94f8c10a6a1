//! Error taxonomy for the case pipeline.
//!
//! Collaborator traits return `anyhow::Result`; orchestration code maps
//! those failures onto [`CaseError`] at the point where it knows which
//! stage failed. The variant decides how far a failure may travel:
//!
//! | Variant | Scope |
//! |---------|-------|
//! | [`Ingestion`](CaseError::Ingestion) | one uploaded file |
//! | [`Embedding`](CaseError::Embedding) | one chunk or file |
//! | [`Provider`](CaseError::Provider) | one store call, recorded in the batch result |
//! | [`ExtractionParse`](CaseError::ExtractionParse) | never leaves task extraction |
//! | [`CascadeDelete`](CaseError::CascadeDelete) | one cascade step |
//! | [`NotFound`](CaseError::NotFound) | surfaced to the caller |
//! | [`InvalidInput`](CaseError::InvalidInput) | surfaced to the caller |

use serde::Serialize;

/// Result alias for pipeline operations.
pub type CaseResult<T> = std::result::Result<T, CaseError>;

#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    #[error("ingestion failed for {filename}: {reason}")]
    Ingestion { filename: String, reason: String },

    #[error("embedding failed: {reason}")]
    Embedding { reason: String },

    #[error("{service} unavailable: {reason}")]
    Provider {
        service: &'static str,
        reason: String,
    },

    #[error("could not parse task extraction output: {reason}")]
    ExtractionParse { reason: String },

    #[error("cascade delete step '{step}' failed: {reason}")]
    CascadeDelete { step: String, reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid input: {reason}")]
    InvalidInput { reason: String },
}

impl CaseError {
    pub fn ingestion(filename: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        CaseError::Ingestion {
            filename: filename.into(),
            reason: reason.to_string(),
        }
    }

    pub fn embedding(reason: impl std::fmt::Display) -> Self {
        CaseError::Embedding {
            reason: reason.to_string(),
        }
    }

    pub fn provider(service: &'static str, reason: impl std::fmt::Display) -> Self {
        CaseError::Provider {
            service,
            reason: reason.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CaseError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        CaseError::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Stable machine-readable identifier used in serialized results.
    pub fn kind(&self) -> &'static str {
        match self {
            CaseError::Ingestion { .. } => "ingestion_error",
            CaseError::Embedding { .. } => "embedding_error",
            CaseError::Provider { .. } => "provider_error",
            CaseError::ExtractionParse { .. } => "extraction_parse_error",
            CaseError::CascadeDelete { .. } => "cascade_delete_error",
            CaseError::NotFound { .. } => "not_found",
            CaseError::InvalidInput { .. } => "invalid_input",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CaseError::NotFound { .. })
    }

    /// Serializable snapshot for embedding into batch results.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// An error flattened to `{kind, message}` for JSON output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: String,
    pub message: String,
}
