use std::sync::Arc;

use tracing::info;

use crate::application::error::ContentError;
use crate::application::repos::{Record, Store};
use crate::cache::{CacheConfig, CacheError, Fingerprint, FreshnessProfile, RevalidatingCache};
use crate::domain::entities::{DashboardData, Notification};
use crate::domain::error::DomainError;
use crate::domain::types::ServerStatus;

pub const DASHBOARD_TAG: &str = "dashboard-data";
pub const DASHBOARD_KEY: &str = "dashboard";
const ROUTE: &str = "/reactive-hub";

/// Write-heavy dashboard whose reads are cached under one tag and purged after
/// every mutation.
#[derive(Clone)]
pub struct ReactiveHub {
    store: Arc<dyn Store<DashboardData>>,
    cache: RevalidatingCache<DashboardData>,
}

impl ReactiveHub {
    pub fn new(store: Arc<dyn Store<DashboardData>>, config: &CacheConfig) -> Self {
        Self {
            store,
            cache: RevalidatingCache::new(config.clone()),
        }
    }

    pub fn cache(&self) -> &RevalidatingCache<DashboardData> {
        &self.cache
    }

    pub async fn dashboard(&self) -> Result<DashboardData, ContentError> {
        let store = Arc::clone(&self.store);

        self.cache
            .read(
                Fingerprint::from(ROUTE),
                move || async move {
                    store
                        .get(DASHBOARD_KEY)
                        .await
                        .map(|record| record.payload)
                        .map_err(CacheError::from)
                },
                [DASHBOARD_TAG],
                FreshnessProfile::Hours.window(),
            )
            .await
            .map_err(ContentError::from)
    }

    /// Change the server status and announce it as a notification.
    pub async fn update_status(&self, status: ServerStatus) -> Result<ServerStatus, ContentError> {
        let message = format!(
            "Server status updated to: {}",
            status.as_str().to_ascii_uppercase()
        );
        let record = self
            .mutate(move |data| {
                data.server_status = status;
                data.push_notification(Notification::new(message));
            })
            .await?;

        info!(status = %status, "Server status updated");
        Ok(record.payload.server_status)
    }

    pub async fn increment_views(&self) -> Result<u64, ContentError> {
        let record = self.mutate(|data| data.total_views += 1).await?;
        Ok(record.payload.total_views)
    }

    /// Post a notification. Blank messages are rejected before touching the store.
    pub async fn add_notification(&self, message: &str) -> Result<Notification, ContentError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(DomainError::validation("Message is required").into());
        }

        let notification = Notification::new(message);
        let pushed = notification.clone();
        self.mutate(move |data| data.push_notification(pushed))
            .await?;
        Ok(notification)
    }

    async fn mutate<F>(&self, mutation: F) -> Result<Record<DashboardData>, ContentError>
    where
        F: FnOnce(&mut DashboardData) + Send + 'static,
    {
        let record = self
            .store
            .update(DASHBOARD_KEY, Box::new(mutation))
            .await
            .map_err(CacheError::from)?;
        self.cache.purge_by_tag(DASHBOARD_TAG);
        Ok(record)
    }
}
