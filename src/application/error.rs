use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    cache::CacheError, config::LoadError, domain::error::DomainError, infra::error::InfraError,
};

/// Failures surfaced by the content services.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ContentError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Cache(error) if error.is_not_found())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// The error and every source beneath it, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.to_string()];
        let mut current = self.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        messages
    }
}

impl From<CacheError> for AppError {
    fn from(error: CacheError) -> Self {
        Self::Content(ContentError::Cache(error))
    }
}
