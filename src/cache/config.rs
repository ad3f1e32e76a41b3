//! Cache configuration.
//!
//! Controls entry capacity, per-kind staleness thresholds and notification
//! polling via the `[cache]` table of `devlog.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::types::EntityKind;

// Default values for cache configuration
const DEFAULT_MAX_ENTRIES: usize = 500;
const DEFAULT_POST_STALE_SECS: u64 = 60;
const DEFAULT_LIST_STALE_SECS: u64 = 30;
const DEFAULT_COMMENTS_STALE_SECS: u64 = 30;
const DEFAULT_NOTIFICATIONS_STALE_SECS: u64 = 15;
const DEFAULT_NOTIFICATION_POLL_SECS: u64 = 30;
const DEFAULT_CHANGE_FEED_CAPACITY: usize = 256;

/// Cache configuration from `devlog.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached views before LRU eviction.
    pub max_entries: usize,
    /// Freshness of single-post views, in seconds.
    pub post_stale_secs: u64,
    /// Freshness of post lists and the saved list, in seconds.
    pub list_stale_secs: u64,
    /// Freshness of comment collections, in seconds.
    pub comments_stale_secs: u64,
    /// Freshness of the notification list, in seconds.
    pub notifications_stale_secs: u64,
    /// Background notification refresh interval, in seconds.
    pub notification_poll_secs: u64,
    /// Buffered change events per subscriber before lagging.
    pub change_feed_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            post_stale_secs: DEFAULT_POST_STALE_SECS,
            list_stale_secs: DEFAULT_LIST_STALE_SECS,
            comments_stale_secs: DEFAULT_COMMENTS_STALE_SECS,
            notifications_stale_secs: DEFAULT_NOTIFICATIONS_STALE_SECS,
            notification_poll_secs: DEFAULT_NOTIFICATION_POLL_SECS,
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_entries: settings.max_entries.get(),
            post_stale_secs: settings.post_stale.as_secs(),
            list_stale_secs: settings.list_stale.as_secs(),
            comments_stale_secs: settings.comments_stale.as_secs(),
            notifications_stale_secs: settings.notifications_stale.as_secs(),
            notification_poll_secs: settings.notification_poll.as_secs(),
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Returns the entry capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }

    /// Staleness threshold applied to entries of the given kind.
    pub fn stale_after(&self, kind: EntityKind) -> Duration {
        let secs = match kind {
            EntityKind::Post => self.post_stale_secs,
            EntityKind::PostList | EntityKind::SavedPosts => self.list_stale_secs,
            EntityKind::Comments => self.comments_stale_secs,
            EntityKind::Notifications => self.notifications_stale_secs,
        };
        Duration::from_secs(secs)
    }

    /// Polling interval, never shorter than one second.
    pub fn notification_poll_interval(&self) -> Duration {
        Duration::from_secs(self.notification_poll_secs.max(1))
    }

    pub fn change_feed_capacity(&self) -> usize {
        self.change_feed_capacity.max(1)
    }
}
