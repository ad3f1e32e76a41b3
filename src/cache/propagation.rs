//! Cross-view propagation rules.
//!
//! Maps "an entity changed" to the set of cached views that must be patched.
//! Affected views are discovered by scanning cached contents, never by
//! re-evaluating list filters: a post stays in a `tag:react` list after a
//! like even though likes are not part of the filter. Creation is the only
//! path that evaluates filters, to decide which loaded lists a new post joins.

use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use crate::domain::entities::{Comment, Notification, Post};

use super::keys::{CacheKey, KeySelector};
use super::store::{CachedValue, EntityCacheStore};

/// One entity as it appears inside cached views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    Post(Uuid),
    Comment(Uuid),
    Notification(Uuid),
}

/// Owned copy of an entity, kept for rollback.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Post(Post),
    Comment(Comment),
    Notification(Notification),
}

/// Mutable borrow of an entity inside a cached view or a snapshot.
#[derive(Debug)]
pub enum RecordMut<'a> {
    Post(&'a mut Post),
    Comment(&'a mut Comment),
    Notification(&'a mut Notification),
}

impl Record {
    pub fn member(&self) -> Member {
        match self {
            Record::Post(post) => Member::Post(post.id),
            Record::Comment(comment) => Member::Comment(comment.id),
            Record::Notification(notification) => Member::Notification(notification.id),
        }
    }

    pub fn record_mut(&mut self) -> RecordMut<'_> {
        match self {
            Record::Post(post) => RecordMut::Post(post),
            Record::Comment(comment) => RecordMut::Comment(comment),
            Record::Notification(notification) => RecordMut::Notification(notification),
        }
    }
}

/// Authoritative change applied to an entity wherever it is cached.
pub type Patch = Box<dyn Fn(RecordMut<'_>) + Send + Sync>;

/// What one view held for one entity before a speculative write.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    /// The entity was present at `index` (0 for single-entity views).
    Present { index: usize, record: Record },
    /// The entity was not in the view; rollback removes whatever was added.
    Absent,
    /// Only the post's comment count was adjusted.
    CommentCount(u32),
}

/// Entity-granular rollback record for one view.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: CacheKey,
    pub member: Member,
    pub slot: Slot,
}

impl CachedValue {
    fn locate(&self, member: Member) -> Option<(usize, Record)> {
        match (self, member) {
            (CachedValue::Post(post), Member::Post(id)) if post.id == id => {
                Some((0, Record::Post(post.clone())))
            }
            (CachedValue::Posts(posts), Member::Post(id)) => posts
                .iter()
                .position(|post| post.id == id)
                .map(|index| (index, Record::Post(posts[index].clone()))),
            (CachedValue::Comments(comments), Member::Comment(id)) => comments
                .iter()
                .position(|comment| comment.id == id)
                .map(|index| (index, Record::Comment(comments[index].clone()))),
            (CachedValue::Notifications(items), Member::Notification(id)) => items
                .iter()
                .position(|item| item.id == id)
                .map(|index| (index, Record::Notification(items[index].clone()))),
            _ => None,
        }
    }

    pub(crate) fn holds(&self, member: Member) -> bool {
        match member {
            Member::Post(id) => self.find_post(id).is_some(),
            Member::Comment(id) => self.find_comment(id).is_some(),
            Member::Notification(id) => self
                .as_notifications()
                .is_some_and(|items| items.iter().any(|item| item.id == id)),
        }
    }

    fn with_member<F>(&mut self, member: Member, apply: F) -> bool
    where
        F: FnOnce(RecordMut<'_>),
    {
        let target = match member {
            Member::Post(id) => self.find_post_mut(id).map(RecordMut::Post),
            Member::Comment(id) => self.find_comment_mut(id).map(RecordMut::Comment),
            Member::Notification(id) => self.find_notification_mut(id).map(RecordMut::Notification),
        };
        match target {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// Remove the entity from a collection. Single-entity values are left alone.
    fn take(&mut self, member: Member) -> Option<(usize, Record)> {
        match (self, member) {
            (CachedValue::Posts(posts), Member::Post(id)) => {
                let index = posts.iter().position(|post| post.id == id)?;
                Some((index, Record::Post(posts.remove(index))))
            }
            (CachedValue::Comments(comments), Member::Comment(id)) => {
                let index = comments.iter().position(|comment| comment.id == id)?;
                Some((index, Record::Comment(comments.remove(index))))
            }
            (CachedValue::Notifications(items), Member::Notification(id)) => {
                let index = items.iter().position(|item| item.id == id)?;
                Some((index, Record::Notification(items.remove(index))))
            }
            _ => None,
        }
    }

    /// Replace the entity in place, or reinsert it at `index` (clamped).
    fn put(&mut self, index: usize, record: Record) -> bool {
        match (self, record) {
            (CachedValue::Post(slot), Record::Post(post)) => {
                *slot = post;
                true
            }
            (CachedValue::Posts(posts), Record::Post(post)) => {
                upsert_at(posts, index, post, |p| p.id);
                true
            }
            (CachedValue::Comments(comments), Record::Comment(comment)) => {
                upsert_at(comments, index, comment, |c| c.id);
                true
            }
            (CachedValue::Notifications(items), Record::Notification(item)) => {
                upsert_at(items, index, item, |n| n.id);
                true
            }
            _ => false,
        }
    }
}

fn upsert_at<T>(items: &mut Vec<T>, index: usize, value: T, id: impl Fn(&T) -> Uuid) {
    let value_id = id(&value);
    match items.iter().position(|item| id(item) == value_id) {
        Some(existing) => items[existing] = value,
        None => items.insert(index.min(items.len()), value),
    }
}

fn same_viewer(key: &CacheKey, viewer: Option<Uuid>) -> bool {
    key.viewer() == viewer
}

/// The views one mutation touches, computed from current cache contents.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationPlan {
    pub member: Member,
    /// Views of the acting viewer that currently hold the entity.
    pub keys: Vec<CacheKey>,
    /// Views of other viewers holding the entity. Their viewer-relative flags
    /// cannot be patched, so they are invalidated instead.
    pub foreign: Vec<CacheKey>,
}

impl PropagationPlan {
    pub fn for_member(store: &EntityCacheStore, member: Member, viewer: Option<Uuid>) -> Self {
        let holding = store.keys_holding(|_, value| value.holds(member));
        let (keys, foreign): (Vec<CacheKey>, Vec<CacheKey>) = holding
            .into_iter()
            .partition(|key| same_viewer(key, viewer));
        Self {
            member,
            keys,
            foreign,
        }
    }

    /// Single-post views, every post list holding the post, and the saved list
    /// only when the post is in it.
    pub fn for_post(store: &EntityCacheStore, id: Uuid, viewer: Option<Uuid>) -> Self {
        Self::for_member(store, Member::Post(id), viewer)
    }

    pub fn for_comment(store: &EntityCacheStore, id: Uuid, viewer: Option<Uuid>) -> Self {
        Self::for_member(store, Member::Comment(id), viewer)
    }

    pub fn for_notification(store: &EntityCacheStore, id: Uuid, viewer: Option<Uuid>) -> Self {
        Self::for_member(store, Member::Notification(id), viewer)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Snapshot the entity in every planned view.
    pub fn capture(&self, store: &EntityCacheStore) -> Vec<Snapshot> {
        self.keys
            .iter()
            .filter_map(|key| {
                let entry = store.peek(key)?;
                let (index, record) = entry.value.locate(self.member)?;
                Some(Snapshot {
                    key: key.clone(),
                    member: self.member,
                    slot: Slot::Present { index, record },
                })
            })
            .collect()
    }

    /// Apply `patch` to the entity in every planned view. Views that no longer
    /// hold the entity are skipped.
    pub fn patch<F>(&self, store: &EntityCacheStore, patch: F) -> Vec<CacheKey>
    where
        F: Fn(RecordMut<'_>),
    {
        let planned: HashSet<&CacheKey> = self.keys.iter().collect();
        let member = self.member;
        let changed = store.update_matching(
            |key| planned.contains(key),
            |_, value| value.with_member(member, &patch),
        );
        self.invalidate_foreign(store);
        changed
    }

    /// Capture, then patch. Returns the rollback snapshots.
    pub fn speculate<F>(&self, store: &EntityCacheStore, patch: F) -> Vec<Snapshot>
    where
        F: Fn(RecordMut<'_>),
    {
        let snapshots = self.capture(store);
        self.patch(store, patch);
        snapshots
    }

    /// Remove the entity from every planned view, dropping single-entity keys.
    pub fn remove(&self, store: &EntityCacheStore) -> Vec<Snapshot> {
        let mut snapshots = Vec::new();
        for key in &self.keys {
            if matches!(key, CacheKey::Post { .. }) {
                if let Some(entry) = store.remove(key) {
                    if let Some((index, record)) = entry.value.locate(self.member) {
                        snapshots.push(Snapshot {
                            key: key.clone(),
                            member: self.member,
                            slot: Slot::Present { index, record },
                        });
                    }
                }
                continue;
            }
            let mut taken = None;
            store.update(key, |value| {
                taken = value.take(self.member);
                taken.is_some()
            });
            if let Some((index, record)) = taken {
                snapshots.push(Snapshot {
                    key: key.clone(),
                    member: self.member,
                    slot: Slot::Present { index, record },
                });
            }
        }
        for key in &self.foreign {
            if matches!(key, CacheKey::Post { .. }) {
                store.remove(key);
            } else {
                store.update(key, |value| value.take(self.member).is_some());
            }
        }
        snapshots
    }

    fn invalidate_foreign(&self, store: &EntityCacheStore) {
        for key in &self.foreign {
            store.invalidate(&KeySelector::Exact(key.clone()));
        }
    }
}

/// Put every snapshotted view back the way it was.
///
/// Snapshots are undone newest first so collection indexes line up.
pub fn restore(store: &EntityCacheStore, snapshots: &[Snapshot]) {
    for snapshot in snapshots.iter().rev() {
        let member = snapshot.member;
        match &snapshot.slot {
            Slot::Present { index, record } => {
                let restored = store.update(&snapshot.key, |value| value.put(*index, record.clone()));
                if !restored {
                    if let (CacheKey::Post { .. }, Record::Post(post)) = (&snapshot.key, record) {
                        store.set(snapshot.key.clone(), CachedValue::Post(post.clone()));
                    }
                }
            }
            Slot::Absent => {
                store.update(&snapshot.key, |value| value.take(member).is_some());
            }
            Slot::CommentCount(count) => {
                store.update(&snapshot.key, |value| {
                    value.with_member(member, |record| {
                        if let RecordMut::Post(post) = record {
                            post.comment_count = *count;
                        }
                    })
                });
            }
        }
    }
    debug!(restored = snapshots.len(), "Snapshots restored");
}

/// Apply `patch` to every notification in the viewer's list.
pub fn patch_inbox(store: &EntityCacheStore, viewer: Uuid, patch: &Patch) -> bool {
    store.update(&CacheKey::Notifications { viewer }, |value| match value {
        CachedValue::Notifications(items) => {
            for item in items.iter_mut() {
                patch(RecordMut::Notification(item));
            }
            !items.is_empty()
        }
        _ => false,
    })
}

/// Drop an entity that no longer exists server-side from every view.
///
/// A vanished comment takes its replies with it, and the post's comment count
/// drops by the size of that subtree.
pub fn purge(store: &EntityCacheStore, member: Member) -> usize {
    match member {
        Member::Post(id) => drop_member(store, member) + purge_comments_of(store, id),
        Member::Comment(id) => purge_comment(store, id),
        Member::Notification(_) => drop_member(store, member),
    }
}

fn drop_member(store: &EntityCacheStore, member: Member) -> usize {
    let mut removed = 0;
    for key in store.keys_holding(|_, value| value.holds(member)) {
        if matches!(key, CacheKey::Post { .. }) {
            removed += usize::from(store.remove(&key).is_some());
        } else if store.update(&key, |value| value.take(member).is_some()) {
            removed += 1;
        }
    }
    removed
}

fn purge_comment(store: &EntityCacheStore, root: Uuid) -> usize {
    let post_id = store
        .keys_holding(|_, value| value.holds(Member::Comment(root)))
        .iter()
        .find_map(|key| store.peek(key)?.value.find_comment(root).map(|c| c.post_id));
    let mut ids = vec![root];
    ids.extend(descendants(store, root));

    let removed = ids
        .iter()
        .map(|id| drop_member(store, Member::Comment(*id)))
        .sum();
    if let Some(post_id) = post_id {
        // The count is not viewer-relative, so every copy of the post follows.
        let gone = u32::try_from(ids.len()).unwrap_or(u32::MAX);
        store.update_matching(
            |_| true,
            |_, value| {
                value.with_member(Member::Post(post_id), |record| {
                    if let RecordMut::Post(post) = record {
                        post.comment_count = post.comment_count.saturating_sub(gone);
                    }
                })
            },
        );
    }
    removed
}

fn purge_comments_of(store: &EntityCacheStore, post_id: Uuid) -> usize {
    let keys = store.keys_matching(
        |key| matches!(key, CacheKey::Comments { post_id: candidate, .. } if *candidate == post_id),
    );
    keys.iter().filter(|key| store.remove(key).is_some()).count()
}

/// Insert a newly created post at the head of every loaded list it belongs in.
///
/// Lists are chosen by their filters; the saved list is never a target.
pub fn insert_created_post(store: &EntityCacheStore, post: &Post, viewer: Option<Uuid>) -> Vec<CacheKey> {
    let targets: HashSet<CacheKey> = store
        .keys_matching(|key| match key {
            CacheKey::PostList(filter) => filter.viewer() == viewer && filter.admits(post),
            _ => false,
        })
        .into_iter()
        .collect();
    let changed = store.update_matching(
        |key| targets.contains(key),
        |_, value| match value {
            CachedValue::Posts(posts) if !posts.iter().any(|p| p.id == post.id) => {
                posts.insert(0, post.clone());
                true
            }
            _ => false,
        },
    );
    store.set(CacheKey::post(post.id, viewer), CachedValue::Post(post.clone()));
    changed
}

/// Append a newly created comment to its post's loaded comment collections and
/// count it on every view of the post.
pub fn insert_created_comment(
    store: &EntityCacheStore,
    comment: &Comment,
    viewer: Option<Uuid>,
) -> Vec<CacheKey> {
    let thread = CacheKey::comments(comment.post_id, viewer);
    let mut changed = Vec::new();
    if store.update(&thread, |value| match value {
        CachedValue::Comments(comments) if !comments.iter().any(|c| c.id == comment.id) => {
            comments.push(comment.clone());
            true
        }
        _ => false,
    }) {
        changed.push(thread);
    }
    let plan = PropagationPlan::for_post(store, comment.post_id, viewer);
    changed.extend(plan.patch(store, |record| {
        if let RecordMut::Post(post) = record {
            post.comment_count = post.comment_count.saturating_add(1);
        }
    }));
    changed
}

/// Ids of every reply below `root`, across all loaded copies of its thread.
pub fn descendants(store: &EntityCacheStore, root: Uuid) -> Vec<Uuid> {
    let mut comments: Vec<(Uuid, Option<Uuid>)> = Vec::new();
    for key in store.keys_holding(|_, value| value.holds(Member::Comment(root))) {
        if let Some(entry) = store.peek(&key) {
            if let Some(all) = entry.value.as_comments() {
                comments.extend(all.iter().map(|c| (c.id, c.parent_id)));
            }
        }
    }
    let mut found: Vec<Uuid> = Vec::new();
    let mut frontier = vec![root];
    while let Some(parent) = frontier.pop() {
        for (id, _) in comments.iter().filter(|(_, p)| *p == Some(parent)) {
            if !found.contains(id) {
                found.push(*id);
                frontier.push(*id);
            }
        }
    }
    found
}

/// Remove a comment and its whole reply subtree from every view, lowering the
/// post's comment count to match. Returns the rollback snapshots.
pub fn remove_comment_subtree(
    store: &EntityCacheStore,
    post_id: Uuid,
    root: Uuid,
    viewer: Option<Uuid>,
) -> Vec<Snapshot> {
    let mut ids = vec![root];
    ids.extend(descendants(store, root));

    let mut snapshots = Vec::new();
    let post_plan = PropagationPlan::for_post(store, post_id, viewer);
    for key in &post_plan.keys {
        if let Some((_, Record::Post(post))) =
            store.peek(key).and_then(|entry| entry.value.locate(Member::Post(post_id)))
        {
            snapshots.push(Snapshot {
                key: key.clone(),
                member: Member::Post(post_id),
                slot: Slot::CommentCount(post.comment_count),
            });
        }
    }

    for id in &ids {
        let plan = PropagationPlan::for_comment(store, *id, viewer);
        snapshots.extend(plan.remove(store));
    }

    let removed = u32::try_from(ids.len()).unwrap_or(u32::MAX);
    post_plan.patch(store, |record| {
        if let RecordMut::Post(post) = record {
            post.comment_count = post.comment_count.saturating_sub(removed);
        }
    });
    snapshots
}

/// Speculatively add a post to the viewer's saved list, taking the entity from
/// one of the viewer's own loaded views. Returns a snapshot only when an
/// insert happened.
pub fn insert_saved(store: &EntityCacheStore, viewer: Uuid, post_id: Uuid) -> Option<Snapshot> {
    let key = CacheKey::SavedPosts { viewer };
    let entry = store.peek(&key)?;
    if entry.value.holds(Member::Post(post_id)) {
        return None;
    }
    let Some(mut post) = store.find_post_for(post_id, Some(viewer)) else {
        // Nothing to build the entry from; the next fetch brings it in.
        store.invalidate(&KeySelector::Exact(key));
        return None;
    };
    post.saved = true;
    store
        .update(&key, |value| match value {
            CachedValue::Posts(posts) => {
                posts.insert(0, post);
                true
            }
            _ => false,
        })
        .then_some(Snapshot {
            key,
            member: Member::Post(post_id),
            slot: Slot::Absent,
        })
}

/// Speculatively take a post out of the viewer's saved list.
pub fn remove_saved(store: &EntityCacheStore, viewer: Uuid, post_id: Uuid) -> Option<Snapshot> {
    let key = CacheKey::SavedPosts { viewer };
    let member = Member::Post(post_id);
    let mut taken = None;
    store.update(&key, |value| {
        taken = value.take(member);
        taken.is_some()
    });
    taken.map(|(index, record)| Snapshot {
        key,
        member,
        slot: Slot::Present { index, record },
    })
}

/// Drop entries from the saved list whose `saved` flag is off.
pub fn prune_saved(store: &EntityCacheStore, viewer: Uuid) -> bool {
    store.update(&CacheKey::SavedPosts { viewer }, |value| match value {
        CachedValue::Posts(posts) => {
            let before = posts.len();
            posts.retain(|post| post.saved);
            posts.len() != before
        }
        _ => false,
    })
}
