//! Record store contract consumed by the cache on a miss.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record `{key}` not found")]
    NotFound { key: String },
}

impl StoreError {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }
}

/// A store-resident value with its last write time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record<P> {
    pub key: String,
    pub payload: P,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified: OffsetDateTime,
}

/// In-place modification applied by [`Store::update`].
pub type Mutation<P> = Box<dyn FnOnce(&mut P) + Send>;

/// Source of truth queried when the cache has nothing usable.
#[async_trait]
pub trait Store<P>: Send + Sync
where
    P: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Record<P>, StoreError>;

    /// Write `payload` under `key`, stamping `last_modified` with the current time.
    async fn put(&self, key: &str, payload: P) -> Result<Record<P>, StoreError>;

    /// Modify an existing record in place. Fails with `NotFound` for unknown keys.
    async fn update(&self, key: &str, mutation: Mutation<P>) -> Result<Record<P>, StoreError>;

    /// Records in insertion order, at most `limit` of them.
    async fn list(&self, limit: usize) -> Vec<Record<P>>;
}
