//! Entity cache store.
//!
//! One keyed store for every cached view of the session: single posts, post
//! lists under any filter, the saved list, comment collections and
//! notifications. Entries past their staleness threshold stay readable
//! (stale-while-revalidate); only the query layer decides to refetch.

use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::entities::{Comment, Notification, Post};

use super::config::CacheConfig;
use super::events::{ChangeFeed, Epoch, EventKind};
use super::keys::{CacheKey, KeySelector};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "devlog_cache_hit_total";
const METRIC_CACHE_MISS: &str = "devlog_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "devlog_cache_evict_total";

/// The value held by one cached view.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub enum CachedValue {
    Post(Post),
    Posts(Vec<Post>),
    Comments(Vec<Comment>),
    Notifications(Vec<Notification>),
}

impl CachedValue {
    /// Borrow the post with `id`, whether this is a single view or a list.
    pub fn find_post(&self, id: Uuid) -> Option<&Post> {
        match self {
            CachedValue::Post(post) if post.id == id => Some(post),
            CachedValue::Posts(posts) => posts.iter().find(|post| post.id == id),
            _ => None,
        }
    }

    pub fn find_post_mut(&mut self, id: Uuid) -> Option<&mut Post> {
        match self {
            CachedValue::Post(post) if post.id == id => Some(post),
            CachedValue::Posts(posts) => posts.iter_mut().find(|post| post.id == id),
            _ => None,
        }
    }

    pub fn find_comment(&self, id: Uuid) -> Option<&Comment> {
        match self {
            CachedValue::Comments(comments) => comments.iter().find(|c| c.id == id),
            _ => None,
        }
    }

    pub fn find_comment_mut(&mut self, id: Uuid) -> Option<&mut Comment> {
        match self {
            CachedValue::Comments(comments) => comments.iter_mut().find(|c| c.id == id),
            _ => None,
        }
    }

    pub fn find_notification_mut(&mut self, id: Uuid) -> Option<&mut Notification> {
        match self {
            CachedValue::Notifications(items) => items.iter_mut().find(|n| n.id == id),
            _ => None,
        }
    }

    pub fn as_posts(&self) -> Option<&[Post]> {
        match self {
            CachedValue::Posts(posts) => Some(posts),
            _ => None,
        }
    }

    pub fn as_comments(&self) -> Option<&[Comment]> {
        match self {
            CachedValue::Comments(comments) => Some(comments),
            _ => None,
        }
    }

    pub fn as_notifications(&self) -> Option<&[Notification]> {
        match self {
            CachedValue::Notifications(items) => Some(items),
            _ => None,
        }
    }
}

/// A cached view plus its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: CachedValue,
    /// When the value was last replaced wholesale.
    pub fetched_at: Instant,
    pub stale_after: Duration,
    /// Set by explicit invalidation; cleared by the next `set`.
    pub invalidated: bool,
    /// Epoch of the last write (set or patch).
    pub revision: Epoch,
}

impl CacheEntry {
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Instant::now())
    }

    pub fn is_stale_at(&self, now: Instant) -> bool {
        self.invalidated || now.saturating_duration_since(self.fetched_at) >= self.stale_after
    }
}

/// Keyed store shared by every view and every mutation of the session.
pub struct EntityCacheStore {
    config: CacheConfig,
    entries: RwLock<LruCache<CacheKey, CacheEntry>>,
    feed: ChangeFeed,
}

impl EntityCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            config: config.clone(),
            entries: RwLock::new(LruCache::new(config.max_entries_non_zero())),
            feed: ChangeFeed::new(config.change_feed_capacity()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Read an entry, marking it recently used. Never blocks on the network.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = rw_write(&self.entries, SOURCE, "get").get(key).cloned();
        let kind = key.kind().as_str();
        match entry {
            Some(_) => counter!(METRIC_CACHE_HIT, "kind" => kind).increment(1),
            None => counter!(METRIC_CACHE_MISS, "kind" => kind).increment(1),
        }
        entry
    }

    /// Read an entry without touching recency or metrics.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        rw_read(&self.entries, SOURCE, "peek").peek(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        rw_read(&self.entries, SOURCE, "contains").contains(key)
    }

    /// Replace an entry and refresh its timestamp.
    pub fn set(&self, key: CacheKey, value: CachedValue) -> Epoch {
        let epoch = self.feed.next_epoch();
        let entry = CacheEntry {
            value,
            fetched_at: Instant::now(),
            stale_after: self.config.stale_after(key.kind()),
            invalidated: false,
            revision: epoch,
        };
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.clone(), entry);
        self.publish_eviction(evicted.map(|(evicted_key, _)| evicted_key), &key, epoch);
        self.feed.publish(key, EventKind::Updated, epoch);
        epoch
    }

    /// Store a fetch result unless the entry was written after `issued_at`.
    ///
    /// Returns false when the response is older than the cached state.
    pub fn commit_fetch(&self, key: CacheKey, value: CachedValue, issued_at: Epoch) -> bool {
        let epoch = self.feed.next_epoch();
        let evicted = {
            let mut entries = rw_write(&self.entries, SOURCE, "commit_fetch");
            if entries
                .peek(&key)
                .is_some_and(|current| current.revision > issued_at)
            {
                return false;
            }
            let entry = CacheEntry {
                value,
                fetched_at: Instant::now(),
                stale_after: self.config.stale_after(key.kind()),
                invalidated: false,
                revision: epoch,
            };
            entries.push(key.clone(), entry)
        };
        self.publish_eviction(evicted.map(|(evicted_key, _)| evicted_key), &key, epoch);
        self.feed.publish(key, EventKind::Updated, epoch);
        true
    }

    /// Apply `transform` to every entry whose key matches `predicate`.
    ///
    /// The transform returns whether it changed the value; only changed
    /// entries get a new revision and a change event. Freshness timestamps
    /// are left alone because a patch is not a fetch.
    pub fn update_matching<P, F>(&self, predicate: P, mut transform: F) -> Vec<CacheKey>
    where
        P: Fn(&CacheKey) -> bool,
        F: FnMut(&CacheKey, &mut CachedValue) -> bool,
    {
        let mut changed = Vec::new();
        {
            let mut entries = rw_write(&self.entries, SOURCE, "update_matching");
            for (key, entry) in entries.iter_mut() {
                if predicate(key) && transform(key, &mut entry.value) {
                    let epoch = self.feed.next_epoch();
                    entry.revision = epoch;
                    changed.push((key.clone(), epoch));
                }
            }
        }
        changed
            .into_iter()
            .map(|(key, epoch)| {
                self.feed.publish(key.clone(), EventKind::Updated, epoch);
                key
            })
            .collect()
    }

    /// Patch a single entry if it is cached.
    pub fn update<F>(&self, key: &CacheKey, transform: F) -> bool
    where
        F: FnOnce(&mut CachedValue) -> bool,
    {
        let mut transform = Some(transform);
        !self
            .update_matching(
                |candidate| candidate == key,
                |_, value| transform.take().is_some_and(|apply| apply(value)),
            )
            .is_empty()
    }

    /// Mark matching entries stale. Their values remain readable.
    pub fn invalidate(&self, selector: &KeySelector) -> usize {
        let mut marked = Vec::new();
        {
            let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
            for (key, entry) in entries.iter_mut() {
                if selector.matches(key) && !entry.invalidated {
                    entry.invalidated = true;
                    marked.push(key.clone());
                }
            }
        }
        let count = marked.len();
        for key in marked {
            let epoch = self.feed.current_epoch();
            self.feed.publish(key, EventKind::Invalidated, epoch);
        }
        count
    }

    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        let removed = rw_write(&self.entries, SOURCE, "remove").pop(key);
        if removed.is_some() {
            let epoch = self.feed.next_epoch();
            self.feed.publish(key.clone(), EventKind::Removed, epoch);
        }
        removed
    }

    /// Snapshot the keys currently cached that satisfy `predicate`.
    pub fn keys_matching<P>(&self, predicate: P) -> Vec<CacheKey>
    where
        P: Fn(&CacheKey) -> bool,
    {
        rw_read(&self.entries, SOURCE, "keys_matching")
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Keys whose current contents satisfy `predicate`.
    pub fn keys_holding<P>(&self, predicate: P) -> Vec<CacheKey>
    where
        P: Fn(&CacheKey, &CachedValue) -> bool,
    {
        rw_read(&self.entries, SOURCE, "keys_holding")
            .iter()
            .filter(|(key, entry)| predicate(key, &entry.value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Find the first cached view that holds `id` and clone that post.
    pub fn find_post(&self, id: Uuid) -> Option<Post> {
        rw_read(&self.entries, SOURCE, "find_post")
            .iter()
            .find_map(|(_, entry)| entry.value.find_post(id).cloned())
    }

    /// Like `find_post`, but only from views scoped to `viewer`, whose
    /// viewer-relative flags belong to that viewer.
    pub fn find_post_for(&self, id: Uuid, viewer: Option<Uuid>) -> Option<Post> {
        rw_read(&self.entries, SOURCE, "find_post_for")
            .iter()
            .filter(|(key, _)| key.viewer() == viewer)
            .find_map(|(_, entry)| entry.value.find_post(id).cloned())
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything, e.g. when the viewer signs out.
    pub fn clear(&self) {
        let keys: Vec<CacheKey> = {
            let mut entries = rw_write(&self.entries, SOURCE, "clear");
            let keys = entries.iter().map(|(key, _)| key.clone()).collect();
            entries.clear();
            keys
        };
        for key in keys {
            let epoch = self.feed.next_epoch();
            self.feed.publish(key, EventKind::Removed, epoch);
        }
    }

    fn publish_eviction(&self, evicted: Option<CacheKey>, inserted: &CacheKey, epoch: Epoch) {
        // `push` hands back the old value under the same key on replacement.
        if let Some(evicted) = evicted.filter(|evicted| evicted != inserted) {
            counter!(METRIC_CACHE_EVICT, "kind" => evicted.kind().as_str()).increment(1);
            self.feed.publish(evicted, EventKind::Evicted, epoch);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::cache::keys::ListFilter;
    use crate::domain::entities::fixtures;
    use crate::domain::types::EntityKind;

    fn store() -> EntityCacheStore {
        EntityCacheStore::new(&CacheConfig::default())
    }

    #[test]
    fn set_then_get_roundtrip() {
        let store = store();
        let post = fixtures::post("hello");
        let key = CacheKey::post(post.id, None);

        assert!(store.get(&key).is_none());
        store.set(key.clone(), CachedValue::Post(post.clone()));

        let entry = store.get(&key).expect("cached post");
        assert_eq!(entry.value, CachedValue::Post(post));
        assert!(!entry.is_stale());
    }

    #[test]
    fn update_matching_patches_every_list_holding_the_post() {
        let store = store();
        let post = fixtures::post("shared");
        let tagged = CacheKey::PostList(ListFilter::new(None).tag("react"));
        let all = CacheKey::PostList(ListFilter::new(None));
        let other = CacheKey::PostList(ListFilter::new(None).tag("go"));

        store.set(tagged.clone(), CachedValue::Posts(vec![post.clone()]));
        store.set(all.clone(), CachedValue::Posts(vec![post.clone()]));
        store.set(other.clone(), CachedValue::Posts(vec![fixtures::post("unrelated")]));

        let changed = store.update_matching(CacheKey::is_post_collection, |_, value| {
            match value.find_post_mut(post.id) {
                Some(found) => {
                    found.toggle_like();
                    true
                }
                None => false,
            }
        });

        assert_eq!(changed.len(), 2);
        for key in [&tagged, &all] {
            let entry = store.peek(key).expect("entry");
            assert!(entry.value.find_post(post.id).expect("post").liked);
        }
        assert!(!changed.contains(&other));
    }

    #[test]
    fn patch_keeps_freshness_but_bumps_revision() {
        let store = store();
        let post = fixtures::post("rev");
        let key = CacheKey::post(post.id, None);
        let first = store.set(key.clone(), CachedValue::Post(post.clone()));
        let before = store.peek(&key).expect("entry");

        assert!(store.update(&key, |value| {
            value.find_post_mut(post.id).map(Post::toggle_like).is_some()
        }));

        let after = store.peek(&key).expect("entry");
        assert!(after.revision > first);
        assert_eq!(after.fetched_at, before.fetched_at);
    }

    #[test]
    fn invalidate_marks_stale_but_keeps_value() {
        let store = store();
        let post = fixtures::post("stale");
        let key = CacheKey::post(post.id, None);
        store.set(key.clone(), CachedValue::Post(post));

        assert_eq!(store.invalidate(&KeySelector::Kind(EntityKind::Post)), 1);
        let entry = store.get(&key).expect("still readable");
        assert!(entry.is_stale());

        // Already invalid entries are not counted twice.
        assert_eq!(store.invalidate(&KeySelector::All), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_go_stale_after_threshold() {
        let config = CacheConfig {
            post_stale_secs: 5,
            ..Default::default()
        };
        let store = EntityCacheStore::new(&config);
        let post = fixtures::post("aging");
        let key = CacheKey::post(post.id, None);
        store.set(key.clone(), CachedValue::Post(post));

        assert!(!store.peek(&key).expect("entry").is_stale());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.peek(&key).expect("entry").is_stale());
    }

    #[test]
    fn commit_fetch_refuses_older_responses() {
        let store = store();
        let post = fixtures::post("race");
        let key = CacheKey::post(post.id, None);

        let issued_at = store.feed().current_epoch();
        let mut newer = post.clone();
        newer.title = "newer".to_string();
        store.set(key.clone(), CachedValue::Post(newer));

        assert!(!store.commit_fetch(key.clone(), CachedValue::Post(post), issued_at));
        let entry = store.peek(&key).expect("entry");
        assert_eq!(entry.value.find_post(entry_id(&entry)).map(|p| p.title.as_str()), Some("newer"));
    }

    fn entry_id(entry: &CacheEntry) -> Uuid {
        match &entry.value {
            CachedValue::Post(post) => post.id,
            _ => Uuid::nil(),
        }
    }

    #[test]
    fn lru_eviction_drops_least_recent_entry() {
        let config = CacheConfig {
            max_entries: 2,
            ..Default::default()
        };
        let store = EntityCacheStore::new(&config);
        let posts: Vec<Post> = (0..3).map(|i| fixtures::post(&format!("p{i}"))).collect();
        let keys: Vec<CacheKey> = posts.iter().map(|p| CacheKey::post(p.id, None)).collect();

        store.set(keys[0].clone(), CachedValue::Post(posts[0].clone()));
        store.set(keys[1].clone(), CachedValue::Post(posts[1].clone()));
        assert!(store.get(&keys[0]).is_some());
        store.set(keys[2].clone(), CachedValue::Post(posts[2].clone()));

        assert!(store.contains(&keys[0]));
        assert!(!store.contains(&keys[1]));
        assert!(store.contains(&keys[2]));
    }

    #[test]
    fn find_post_searches_all_views() {
        let store = store();
        let post = fixtures::post("listed only");
        store.set(
            CacheKey::PostList(ListFilter::new(None)),
            CachedValue::Posts(vec![post.clone()]),
        );
        assert_eq!(store.find_post(post.id), Some(post));
        assert_eq!(store.find_post(Uuid::new_v4()), None);
    }

    #[test]
    fn store_recovers_from_poisoned_lock() {
        let store = store();

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let post = fixtures::post("after panic");
        store.set(CacheKey::post(post.id, None), CachedValue::Post(post));
        assert_eq!(store.len(), 1);
    }
}
