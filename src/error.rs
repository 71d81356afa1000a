//! Crate-wide error type

use thiserror::Error;

/// Errors surfaced by the entitlement core and its collaborators.
///
/// `NotAuthenticated` and `QuotaExceeded` exist for callers that want to turn a
/// denied [`FeatureAccessResult`](crate::billing::FeatureAccessResult) into an
/// error; the core itself reports them as values, never as `Err`.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("authentication required")]
    NotAuthenticated,

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("summary generation failed: {0}")]
    GenerationFailed(String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] rusqlite::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("credential store error: {0}")]
    Credential(#[from] keyring::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PortalError {
    /// True for failures of the durable store
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::PersistenceFailed(_) | Self::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, PortalError>;
