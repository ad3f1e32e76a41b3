//! Non-blocking read accessor over the entity store.
//!
//! A read answers from the cache immediately. A miss reports `Loading` (or the
//! last fetch failure) and starts a background fetch; a stale hit is served
//! as-is while a refetch runs.
//! Each fetch holds a ticket: only the newest ticket for a key may write, and
//! only if nothing wrote the entry after the ticket was issued.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use metrics::counter;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::application::error::ActionError;
use crate::application::repos::RepoError;

use super::events::Epoch;
use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::store::{CachedValue, EntityCacheStore};

const SOURCE: &str = "cache::query";

const METRIC_FETCH_DISCARDED: &str = "devlog_fetch_discarded_total";

/// Future resolving to a fresh value for one key.
pub type FetchFuture = BoxFuture<'static, Result<CachedValue, RepoError>>;

/// What a view renders for one key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryState<T> {
    Loading,
    Ready { value: T, stale: bool },
    Failed {
        #[serde(serialize_with = "as_message")]
        error: ActionError,
    },
}

fn as_message<S: Serializer>(error: &ActionError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.notice().message)
}

impl<T> QueryState<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueryState<U> {
        match self {
            QueryState::Loading => QueryState::Loading,
            QueryState::Ready { value, stale } => QueryState::Ready {
                value: f(value),
                stale,
            },
            QueryState::Failed { error } => QueryState::Failed { error },
        }
    }

    /// Narrow the value, treating a mismatch as still loading.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Option<U>) -> QueryState<U> {
        match self {
            QueryState::Ready { value, stale } => match f(value) {
                Some(value) => QueryState::Ready { value, stale },
                None => QueryState::Loading,
            },
            QueryState::Loading => QueryState::Loading,
            QueryState::Failed { error } => QueryState::Failed { error },
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            QueryState::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            QueryState::Ready { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn failed(err: &ActionError) -> Self {
        QueryState::Failed { error: err.clone() }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            QueryState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Ticket {
    id: u64,
    issued_at: Epoch,
}

#[derive(Default)]
struct FetchTracker {
    next_ticket: AtomicU64,
    in_flight: Mutex<HashMap<CacheKey, Ticket>>,
    errors: Mutex<HashMap<CacheKey, ActionError>>,
}

/// Cloneable handle for reading through the cache.
#[derive(Clone)]
pub struct QueryClient {
    store: Arc<EntityCacheStore>,
    tracker: Arc<FetchTracker>,
}

impl QueryClient {
    pub fn new(store: Arc<EntityCacheStore>) -> Self {
        Self {
            store,
            tracker: Arc::new(FetchTracker::default()),
        }
    }

    pub fn store(&self) -> &Arc<EntityCacheStore> {
        &self.store
    }

    /// Answer from the cache, starting a background fetch on a miss or a
    /// stale hit. `fetch` is only called when a fetch is started.
    pub fn read<F>(&self, key: &CacheKey, fetch: F) -> QueryState<CachedValue>
    where
        F: FnOnce() -> FetchFuture,
    {
        match self.store.get(key) {
            Some(entry) => {
                let stale = entry.is_stale();
                if stale && !self.is_fetching(key) {
                    self.spawn_fetch(key.clone(), fetch());
                }
                QueryState::Ready {
                    value: entry.value,
                    stale,
                }
            }
            None => {
                // A recorded failure is reported while every read retries.
                let failure = mutex_lock(&self.tracker.errors, SOURCE, "read").get(key).cloned();
                if !self.is_fetching(key) {
                    self.spawn_fetch(key.clone(), fetch());
                }
                match failure {
                    Some(err) => QueryState::failed(&err),
                    None => QueryState::Loading,
                }
            }
        }
    }

    /// Fetch now and wait for it, superseding any fetch already running.
    pub async fn refresh(&self, key: &CacheKey, fetch: FetchFuture) -> QueryState<CachedValue> {
        let ticket = self.issue(key);
        let result = fetch.await;
        let failure = result.as_ref().err().map(|err| ActionError::from(err.clone()));
        self.complete(key, ticket, result);
        match (self.store.peek(key), failure) {
            (Some(entry), _) => QueryState::Ready {
                stale: entry.is_stale(),
                value: entry.value,
            },
            (None, Some(err)) => QueryState::failed(&err),
            (None, None) => QueryState::Loading,
        }
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.tracker.in_flight, SOURCE, "is_fetching").contains_key(key)
    }

    /// Forget a recorded fetch failure so the next miss reports `Loading`.
    pub fn clear_error(&self, key: &CacheKey) {
        mutex_lock(&self.tracker.errors, SOURCE, "clear_error").remove(key);
    }

    fn spawn_fetch(&self, key: CacheKey, fetch: FetchFuture) {
        let ticket = self.issue(&key);
        let client = self.clone();
        tokio::spawn(async move {
            let result = fetch.await;
            client.complete(&key, ticket, result);
        });
    }

    fn issue(&self, key: &CacheKey) -> Ticket {
        let ticket = Ticket {
            id: self.tracker.next_ticket.fetch_add(1, Ordering::SeqCst),
            issued_at: self.store.feed().current_epoch(),
        };
        let replaced = mutex_lock(&self.tracker.in_flight, SOURCE, "issue").insert(key.clone(), ticket);
        debug!(
            key = %key,
            ticket = ticket.id,
            issued_at = ticket.issued_at,
            superseded = replaced.map(|old| old.id),
            "Fetch issued"
        );
        ticket
    }

    fn complete(&self, key: &CacheKey, ticket: Ticket, result: Result<CachedValue, RepoError>) -> bool {
        // Committing under the ticket lock keeps a newer ticket from being
        // judged against this response's write.
        let mut in_flight = mutex_lock(&self.tracker.in_flight, SOURCE, "complete");
        if in_flight.get(key) != Some(&ticket) {
            counter!(METRIC_FETCH_DISCARDED, "reason" => "superseded").increment(1);
            debug!(key = %key, ticket = ticket.id, "Superseded fetch response discarded");
            return false;
        }
        in_flight.remove(key);

        match result {
            Ok(value) => {
                if self.store.commit_fetch(key.clone(), value, ticket.issued_at) {
                    mutex_lock(&self.tracker.errors, SOURCE, "complete").remove(key);
                    true
                } else {
                    counter!(METRIC_FETCH_DISCARDED, "reason" => "stale").increment(1);
                    debug!(key = %key, ticket = ticket.id, "Fetch response older than cached state");
                    false
                }
            }
            Err(err) => {
                warn!(key = %key, error = %err, "Fetch failed");
                mutex_lock(&self.tracker.errors, SOURCE, "complete").insert(key.clone(), err.into());
                false
            }
        }
    }
}
