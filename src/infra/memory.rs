//! In-process record store with simulated backend latency.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;

use crate::application::repos::{Mutation, Record, Store, StoreError};
use crate::cache::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

struct Records<P> {
    by_key: HashMap<String, Record<P>>,
    order: Vec<String>,
}

/// Record store kept in memory.
///
/// Reads and writes can be slowed down to make cache misses observable, the
/// way a remote CMS or database would be. A read sees the records as of the
/// moment it starts; the latency is the response in transit.
pub struct MemoryStore<P> {
    records: RwLock<Records<P>>,
    read_latency: Duration,
    list_latency: Duration,
    write_latency: Duration,
    reads: AtomicU64,
}

impl<P> MemoryStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Records {
                by_key: HashMap::new(),
                order: Vec::new(),
            }),
            read_latency: Duration::ZERO,
            list_latency: Duration::ZERO,
            write_latency: Duration::ZERO,
            reads: AtomicU64::new(0),
        }
    }

    /// Set read and write latency. Listings take the read latency until
    /// [`with_list_latency`](Self::with_list_latency) says otherwise.
    pub fn with_latency(mut self, read: Duration, write: Duration) -> Self {
        self.read_latency = read;
        self.list_latency = read;
        self.write_latency = write;
        self
    }

    pub fn with_list_latency(mut self, list: Duration) -> Self {
        self.list_latency = list;
        self
    }

    /// Insert records without simulated latency.
    pub fn seed<I>(&self, records: I)
    where
        I: IntoIterator<Item = (String, P)>,
    {
        let mut guard = rw_write(&self.records, SOURCE, "seed");
        for (key, payload) in records {
            write_record(&mut guard, &key, payload);
        }
    }

    /// Number of `get` calls served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        rw_read(&self.records, SOURCE, "len").by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn simulate(latency: Duration) {
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<P> Default for MemoryStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn write_record<P>(records: &mut Records<P>, key: &str, payload: P) -> Record<P>
where
    P: Clone,
{
    let record = Record {
        key: key.to_string(),
        payload,
        last_modified: OffsetDateTime::now_utc(),
    };
    if records
        .by_key
        .insert(key.to_string(), record.clone())
        .is_none()
    {
        records.order.push(key.to_string());
    }
    record
}

#[async_trait]
impl<P> Store<P> for MemoryStore<P>
where
    P: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Record<P>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        debug!(key, latency_ms = self.read_latency.as_millis() as u64, "store read");
        let record = rw_read(&self.records, SOURCE, "get")
            .by_key
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(key));

        Self::simulate(self.read_latency).await;
        record
    }

    async fn put(&self, key: &str, payload: P) -> Result<Record<P>, StoreError> {
        debug!(key, "store write");
        Self::simulate(self.write_latency).await;

        let mut guard = rw_write(&self.records, SOURCE, "put");
        Ok(write_record(&mut guard, key, payload))
    }

    async fn update(&self, key: &str, mutation: Mutation<P>) -> Result<Record<P>, StoreError> {
        debug!(key, "store update");
        Self::simulate(self.write_latency).await;

        let mut guard = rw_write(&self.records, SOURCE, "update");
        let record = guard
            .by_key
            .get_mut(key)
            .ok_or_else(|| StoreError::not_found(key))?;
        mutation(&mut record.payload);
        record.last_modified = OffsetDateTime::now_utc();
        Ok(record.clone())
    }

    async fn list(&self, limit: usize) -> Vec<Record<P>> {
        let records: Vec<Record<P>> = {
            let guard = rw_read(&self.records, SOURCE, "list");
            guard
                .order
                .iter()
                .filter_map(|key| guard.by_key.get(key))
                .take(limit)
                .cloned()
                .collect()
        };

        Self::simulate(self.list_latency).await;
        records
    }
}
