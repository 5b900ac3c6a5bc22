use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The embedding provider failed, timed out or returned a degenerate vector.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("intent catalog is empty")]
    CatalogEmpty,

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("no capability registered for agent `{agent_id}` and action `{action}`")]
    UnknownCapability { agent_id: String, action: String },

    #[error("invalid intent: {0}")]
    InvalidIntent(String),

    #[error("unknown intent `{0}`")]
    UnknownIntent(String),

    #[error("manifest error: {0}")]
    Manifest(String),
}

impl ResolveError {
    /// Infrastructure faults, as opposed to problems with the caller's input.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            ResolveError::EmbeddingUnavailable(_) | ResolveError::InvalidConfiguration(_)
        )
    }
}

pub type ResolveResult<T> = std::result::Result<T, ResolveError>;
