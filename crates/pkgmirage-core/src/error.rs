//! Error taxonomy shared by every pipeline component.
//!
//! Most variants are recoverable at the component boundary: the caller logs
//! them and continues with reduced output. Only [`MirageError::Config`] is
//! meant to reach the user as a hard failure.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirageError {
    /// The generative-model call failed (network, HTTP status, empty choices).
    #[error("generation failed: {0}")]
    Generation(String),

    /// Every repair stage was exhausted without producing valid structured data.
    #[error("unparseable model output: {0}")]
    Parse(String),

    /// The bulk fetch of canonical names failed or returned nothing.
    #[error("existence source failed: {0}")]
    ExistenceSource(String),

    /// A cache tier could not be opened, read, or written.
    #[error("cache unavailable: {0}")]
    Cache(String),

    /// Misconfiguration, e.g. no model credential at all.
    #[error("configuration error: {0}")]
    Config(String),

    /// A caller-supplied package name that cannot name a package directory.
    #[error("invalid package name: {0:?}")]
    InvalidName(String),
}

impl MirageError {
    pub fn cache(err: impl std::fmt::Display) -> Self {
        MirageError::Cache(err.to_string())
    }

    pub fn generation(err: impl std::fmt::Display) -> Self {
        MirageError::Generation(err.to_string())
    }

    pub fn existence(err: impl std::fmt::Display) -> Self {
        MirageError::ExistenceSource(err.to_string())
    }

    /// Whether this failure should abort the request instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MirageError::Config(_))
    }
}

pub type MirageResult<T> = std::result::Result<T, MirageError>;
