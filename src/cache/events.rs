//! Change feed for cached views.
//!
//! Every write to the store is stamped with a monotonic epoch and broadcast to
//! subscribers, so independently rendered views can re-read the keys they
//! display. The epoch doubles as the entry revision used to discard stale
//! fetch responses and to order mutations.

use std::sync::atomic::{AtomicU64, Ordering};

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::{CacheKey, KeySelector};

/// Monotonic epoch for ordering cache writes and mutations.
pub type Epoch = u64;

/// A single observable change to one cached view.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier, useful to correlate log lines.
    pub id: Uuid,
    /// Epoch at which the change was applied.
    pub epoch: Epoch,
    pub key: CacheKey,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(key: CacheKey, kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            key,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// The entry's value was replaced or patched.
    Updated,
    /// The entry was marked stale; its value is unchanged.
    Invalidated,
    /// The entry was dropped explicitly.
    Removed,
    /// The entry was dropped to make room.
    Evicted,
}

/// Broadcast hub for cache events plus the shared epoch counter.
pub struct ChangeFeed {
    sender: broadcast::Sender<CacheEvent>,
    epoch_counter: AtomicU64,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            epoch_counter: AtomicU64::new(0),
        }
    }

    /// Allocate the next epoch.
    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently allocated epoch.
    pub fn current_epoch(&self) -> Epoch {
        self.epoch_counter.load(Ordering::SeqCst)
    }

    /// Broadcast a change that was applied at `epoch`.
    pub fn publish(&self, key: CacheKey, kind: EventKind, epoch: Epoch) {
        let event = CacheEvent::new(key, kind, epoch);
        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            key = %event.key,
            "Cache change published"
        );
        // No subscribers is the normal state for headless use.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the changes of the keys a view renders.
    pub fn watch(&self, selector: KeySelector) -> Subscription {
        Subscription {
            selector,
            receiver: self.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// What a watching view should do next.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Changed(CacheEvent),
    /// Events were dropped; re-read everything the view displays.
    Resync,
}

/// A filtered stream of cache events for one view.
pub struct Subscription {
    selector: KeySelector,
    receiver: broadcast::Receiver<CacheEvent>,
}

impl Subscription {
    /// Wait for the next relevant change. Returns `None` once the feed is gone.
    pub async fn next(&mut self) -> Option<FeedItem> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.selector.matches(&event.key) => {
                    return Some(FeedItem::Changed(event));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cache subscription lagged; view must resync");
                    return Some(FeedItem::Resync);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
