//! Client-side consistency engine.
//!
//! Keeps every cached view of the session (single posts, filtered post lists,
//! the saved list, comment threads, notifications) consistent under
//! concurrent optimistic actions:
//!
//! - **Store**: keyed LRU of cached views with per-kind staleness
//! - **Query**: non-blocking reads with stale-while-revalidate refetching
//! - **Coordinator**: speculate, then reconcile or roll back
//! - **Propagation**: which views an entity change touches
//! - **Projection**: reply trees derived from flat comment collections
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_entries = 500
//! post_stale_seconds = 60
//! list_stale_seconds = 30
//! notification_poll_seconds = 30
//! # ... see crate::config for all options
//! ```

mod config;
mod coordinator;
mod events;
mod keys;
pub(crate) mod lock;
mod pending;
pub mod projection;
pub mod propagation;
mod query;
mod store;

pub use config::CacheConfig;
pub use coordinator::{Mutation, MutationCoordinator, MutationOutcome};
pub use events::{CacheEvent, ChangeFeed, Epoch, EventKind, FeedItem, Subscription};
pub use keys::{CacheKey, KeySelector, ListFilter};
pub use pending::{EntityRef, MutationState, PendingRegistry};
pub use projection::{CommentNode, CommentThread};
pub use propagation::{Member, Patch, PropagationPlan, Record, RecordMut, Slot, Snapshot};
pub use query::{FetchFuture, QueryClient, QueryState};
pub use store::{CacheEntry, CachedValue, EntityCacheStore};
