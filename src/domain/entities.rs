//! Domain entities held by the record store.

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::ServerStatus;

/// Maximum notifications retained on the dashboard, newest first.
pub const NOTIFICATION_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub slug: String,
    pub title: String,
    pub content: String,
    pub views: u64,
}

impl Post {
    /// Deterministic seed content for post number `index`.
    pub fn seeded(index: usize, views: u64) -> Self {
        Self {
            slug: format!("post-{index}"),
            title: format!("High-Scale Content Architecture: Part {index}"),
            content: format!(
                "This is the body content for post {index}. It simulates a content-heavy \
                 response from a headless CMS.\n\nLorem ipsum dolor sit amet, consectetur \
                 adipiscing elit. Sed do eiusmod tempor incididunt ut labore et dolore magna aliqua."
            ),
            views,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Notification {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message: message.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub active_users: u64,
    pub total_views: u64,
    pub server_status: ServerStatus,
    pub notifications: Vec<Notification>,
}

impl DashboardData {
    /// Prepend a notification, keeping only the most recent entries.
    pub fn push_notification(&mut self, notification: Notification) {
        self.notifications.insert(0, notification);
        self.notifications.truncate(NOTIFICATION_LIMIT);
    }
}

impl Default for DashboardData {
    fn default() -> Self {
        Self {
            active_users: 142,
            total_views: 10_500,
            server_status: ServerStatus::Healthy,
            notifications: vec![Notification::new("System initialization complete")],
        }
    }
}
