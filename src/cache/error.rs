use std::time::Duration;

use thiserror::Error;

use crate::application::repos::StoreError;

use super::keys::Fingerprint;

/// Errors surfaced by cache reads.
///
/// `Clone` because one computation outcome is fanned out to every caller
/// waiting on the same fingerprint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("record `{key}` not found")]
    NotFound { key: String },
    #[error("computation failed: {message}")]
    Computation { message: String },
    #[error("timed out after {waited:?} waiting for `{fingerprint}`")]
    Timeout {
        fingerprint: Fingerprint,
        waited: Duration,
    },
    #[error("computation for `{fingerprint}` ended without producing a result")]
    Abandoned { fingerprint: Fingerprint },
}

impl CacheError {
    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for CacheError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { key } => Self::NotFound { key },
        }
    }
}
