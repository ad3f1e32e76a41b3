//! Pending mutation registry.
//!
//! Tracks every in-flight optimistic mutation per entity, ordered by issue
//! epoch, together with the snapshots needed to undo it. The registry decides
//! what a settling mutation may do to the live store so that responses that
//! arrive out of order never lose an update:
//!
//! - while a later-issued mutation on the same entity is still in flight, a
//!   settling mutation leaves the store alone and hands its result to that
//!   successor (a confirmed value is folded into the successor's snapshots, a
//!   failure passes its older snapshots down);
//! - otherwise a success is applied everywhere and a failure restores its
//!   snapshots, unless a later-issued mutation has already been confirmed.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::events::Epoch;
use super::lock::mutex_lock;
use super::propagation::{Member, Patch, Slot, Snapshot};

const SOURCE: &str = "cache::pending";

/// The entity a mutation is serialized on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Post(Uuid),
    Comment(Uuid),
    Notification(Uuid),
    /// Every notification of one viewer, for bulk read-state changes.
    Inbox(Uuid),
}

impl EntityRef {
    /// The cached member this entity appears as, if it is a single entity.
    pub fn member(self) -> Option<Member> {
        match self {
            EntityRef::Post(id) => Some(Member::Post(id)),
            EntityRef::Comment(id) => Some(Member::Comment(id)),
            EntityRef::Notification(id) => Some(Member::Notification(id)),
            EntityRef::Inbox(_) => None,
        }
    }

    /// Whether a snapshot of `member` belongs to this entity.
    pub fn covers(self, member: Member) -> bool {
        match (self, member) {
            (EntityRef::Inbox(_), Member::Notification(_)) => true,
            _ => self.member() == Some(member),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Post(id) => write!(f, "post:{id}"),
            EntityRef::Comment(id) => write!(f, "comment:{id}"),
            EntityRef::Notification(id) => write!(f, "notification:{id}"),
            EntityRef::Inbox(viewer) => write!(f, "inbox:{viewer}"),
        }
    }
}

/// Lifecycle of one optimistic mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Pending,
    SpeculativeApplied,
    InFlight,
    Reconciled,
    RolledBack,
}

impl MutationState {
    pub fn as_str(self) -> &'static str {
        match self {
            MutationState::Pending => "pending",
            MutationState::SpeculativeApplied => "speculative_applied",
            MutationState::InFlight => "in_flight",
            MutationState::Reconciled => "reconciled",
            MutationState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Reconciled | MutationState::RolledBack)
    }
}

#[derive(Debug, Clone)]
pub struct PendingMutation {
    pub correlation: Uuid,
    pub epoch: Epoch,
    pub action: &'static str,
    pub state: MutationState,
    snapshots: Vec<Snapshot>,
}

impl PendingMutation {
    pub fn new(epoch: Epoch, action: &'static str) -> Self {
        Self {
            correlation: Uuid::new_v4(),
            epoch,
            action,
            state: MutationState::Pending,
            snapshots: Vec::new(),
        }
    }

    pub fn with_snapshots(mut self, snapshots: Vec<Snapshot>) -> Self {
        self.snapshots = snapshots;
        self.state = MutationState::SpeculativeApplied;
        self
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }
}

/// What a successful settlement may do to the live store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuccessPlan {
    /// Apply the authoritative value to every view holding the entity.
    Apply,
    /// A later mutation is still in flight; its snapshots now carry the value.
    Folded { into: Uuid },
}

/// What a failed settlement may do to the live store.
#[derive(Debug, Clone, PartialEq)]
pub enum FailurePlan {
    Restore(Vec<Snapshot>),
    /// A later mutation is still in flight and inherits the snapshots.
    HandedDown { to: Uuid },
    /// A later-issued mutation was confirmed; restoring would clobber it.
    Dropped { confirmed: Epoch },
}

#[derive(Debug, Default)]
struct EntityQueue {
    /// Sorted by issue epoch.
    in_flight: Vec<PendingMutation>,
    confirmed: Option<Epoch>,
}

impl EntityQueue {
    fn take(&mut self, correlation: Uuid) -> Option<(usize, PendingMutation)> {
        let index = self
            .in_flight
            .iter()
            .position(|pending| pending.correlation == correlation)?;
        Some((index, self.in_flight.remove(index)))
    }
}

/// Registry contents; only reachable through the lock guard.
#[derive(Debug, Default)]
pub struct PendingBook {
    queues: HashMap<EntityRef, EntityQueue>,
}

impl PendingBook {
    pub fn enqueue(&mut self, entity: EntityRef, mutation: PendingMutation) {
        let queue = self.queues.entry(entity).or_default();
        let at = queue
            .in_flight
            .partition_point(|pending| pending.epoch < mutation.epoch);
        queue.in_flight.insert(at, mutation);
    }

    pub fn transition(&mut self, entity: EntityRef, correlation: Uuid, state: MutationState) -> bool {
        self.queues
            .get_mut(&entity)
            .and_then(|queue| {
                queue
                    .in_flight
                    .iter_mut()
                    .find(|pending| pending.correlation == correlation)
            })
            .map(|pending| pending.state = state)
            .is_some()
    }

    pub fn settle_success(
        &mut self,
        entity: EntityRef,
        correlation: Uuid,
        patch: Option<&Patch>,
    ) -> SuccessPlan {
        let Some(queue) = self.queues.get_mut(&entity) else {
            return SuccessPlan::Apply;
        };
        let Some((index, settled)) = queue.take(correlation) else {
            return SuccessPlan::Apply;
        };

        let plan = match queue.in_flight.get_mut(index) {
            Some(successor) => {
                if let Some(patch) = patch {
                    fold(&mut successor.snapshots, entity, patch);
                }
                SuccessPlan::Folded {
                    into: successor.correlation,
                }
            }
            None => {
                queue.confirmed = queue.confirmed.max(Some(settled.epoch));
                SuccessPlan::Apply
            }
        };
        self.prune(entity);
        plan
    }

    pub fn settle_failure(&mut self, entity: EntityRef, correlation: Uuid) -> FailurePlan {
        let Some(queue) = self.queues.get_mut(&entity) else {
            return FailurePlan::Restore(Vec::new());
        };
        let Some((index, settled)) = queue.take(correlation) else {
            return FailurePlan::Restore(Vec::new());
        };

        let plan = match (queue.in_flight.get_mut(index), queue.confirmed) {
            (Some(successor), _) => {
                // Older snapshots go first so they are undone last.
                let mut inherited = settled.snapshots;
                inherited.append(&mut successor.snapshots);
                successor.snapshots = inherited;
                FailurePlan::HandedDown {
                    to: successor.correlation,
                }
            }
            (None, Some(confirmed)) if confirmed > settled.epoch => {
                FailurePlan::Dropped { confirmed }
            }
            (None, _) => FailurePlan::Restore(settled.snapshots),
        };
        self.prune(entity);
        plan
    }

    /// The entity is gone server-side: nothing still in flight may restore it.
    pub fn settle_purged(&mut self, entity: EntityRef, correlation: Uuid) {
        if let Some(queue) = self.queues.get_mut(&entity) {
            queue.take(correlation);
            for pending in &mut queue.in_flight {
                pending.snapshots.clear();
            }
        }
        self.prune(entity);
    }

    pub fn in_flight(&self, entity: EntityRef) -> usize {
        self.queues
            .get(&entity)
            .map_or(0, |queue| queue.in_flight.len())
    }

    pub fn get(&self, entity: EntityRef, correlation: Uuid) -> Option<&PendingMutation> {
        self.queues.get(&entity).and_then(|queue| {
            queue
                .in_flight
                .iter()
                .find(|pending| pending.correlation == correlation)
        })
    }

    pub fn total(&self) -> usize {
        self.queues.values().map(|queue| queue.in_flight.len()).sum()
    }

    fn prune(&mut self, entity: EntityRef) {
        if self
            .queues
            .get(&entity)
            .is_some_and(|queue| queue.in_flight.is_empty())
        {
            self.queues.remove(&entity);
        }
    }
}

fn fold(snapshots: &mut [Snapshot], entity: EntityRef, patch: &Patch) {
    for snapshot in snapshots.iter_mut().filter(|s| entity.covers(s.member)) {
        if let Slot::Present { record, .. } = &mut snapshot.slot {
            patch(record.record_mut());
        }
    }
}

/// Shared, lock-guarded registry of in-flight mutations.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    book: Mutex<PendingBook>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the registry for one atomic step. Never keep the guard across an await.
    pub fn lock(&self) -> MutexGuard<'_, PendingBook> {
        mutex_lock(&self.book, SOURCE, "lock")
    }

    pub fn in_flight(&self, entity: EntityRef) -> usize {
        self.lock().in_flight(entity)
    }

    pub fn total(&self) -> usize {
        self.lock().total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::CacheKey;
    use crate::cache::propagation::{Record, RecordMut};
    use crate::domain::entities::fixtures;

    fn liked_snapshot(post: &crate::domain::entities::Post) -> Snapshot {
        Snapshot {
            key: CacheKey::post(post.id, None),
            member: Member::Post(post.id),
            slot: Slot::Present {
                index: 0,
                record: Record::Post(post.clone()),
            },
        }
    }

    #[test]
    fn lone_mutation_applies_and_restores() {
        let post = fixtures::post("solo");
        let entity = EntityRef::Post(post.id);
        let mut book = PendingBook::default();

        let first = PendingMutation::new(1, "post.like").with_snapshots(vec![liked_snapshot(&post)]);
        let id = first.correlation;
        book.enqueue(entity, first);
        assert_eq!(book.in_flight(entity), 1);

        assert_eq!(
            book.settle_failure(entity, id),
            FailurePlan::Restore(vec![liked_snapshot(&post)])
        );
        assert_eq!(book.in_flight(entity), 0);
    }

    #[test]
    fn early_success_folds_into_successor_snapshot() {
        let post = fixtures::post("double click");
        let entity = EntityRef::Post(post.id);
        let mut book = PendingBook::default();

        let first = PendingMutation::new(1, "post.like");
        let second = PendingMutation::new(2, "post.like").with_snapshots(vec![liked_snapshot(&post)]);
        let (first_id, second_id) = (first.correlation, second.correlation);
        book.enqueue(entity, first);
        book.enqueue(entity, second);

        let confirm: Patch = Box::new(|record: RecordMut<'_>| {
            if let RecordMut::Post(post) = record {
                post.liked = true;
                post.likes = 10;
            }
        });
        assert_eq!(
            book.settle_success(entity, first_id, Some(&confirm)),
            SuccessPlan::Folded { into: second_id }
        );

        let successor = book.get(entity, second_id).expect("still in flight");
        match &successor.snapshots()[0].slot {
            Slot::Present {
                record: Record::Post(folded),
                ..
            } => {
                assert!(folded.liked);
                assert_eq!(folded.likes, 10);
            }
            other => panic!("unexpected slot {other:?}"),
        }
    }

    #[test]
    fn early_failure_hands_snapshots_down() {
        let post = fixtures::post("handoff");
        let entity = EntityRef::Post(post.id);
        let mut book = PendingBook::default();

        let original = liked_snapshot(&post);
        let mut speculative = post.clone();
        speculative.toggle_like();

        let first = PendingMutation::new(1, "post.like").with_snapshots(vec![original.clone()]);
        let second =
            PendingMutation::new(2, "post.like").with_snapshots(vec![liked_snapshot(&speculative)]);
        let (first_id, second_id) = (first.correlation, second.correlation);
        book.enqueue(entity, first);
        book.enqueue(entity, second);

        assert_eq!(
            book.settle_failure(entity, first_id),
            FailurePlan::HandedDown { to: second_id }
        );
        match book.settle_failure(entity, second_id) {
            FailurePlan::Restore(snapshots) => {
                // Undone newest first, so the original state is written last.
                assert_eq!(snapshots.first(), Some(&original));
                assert_eq!(snapshots.len(), 2);
            }
            other => panic!("unexpected plan {other:?}"),
        }
    }

    #[test]
    fn late_failure_after_newer_confirmation_is_dropped() {
        let post = fixtures::post("late");
        let entity = EntityRef::Post(post.id);
        let mut book = PendingBook::default();

        let first = PendingMutation::new(1, "post.like").with_snapshots(vec![liked_snapshot(&post)]);
        let second = PendingMutation::new(2, "post.like");
        let (first_id, second_id) = (first.correlation, second.correlation);
        book.enqueue(entity, first);
        book.enqueue(entity, second);

        assert_eq!(book.settle_success(entity, second_id, None), SuccessPlan::Apply);
        assert_eq!(
            book.settle_failure(entity, first_id),
            FailurePlan::Dropped { confirmed: 2 }
        );
        assert_eq!(book.total(), 0);
    }

    #[test]
    fn purge_clears_successor_snapshots() {
        let post = fixtures::post("purged");
        let entity = EntityRef::Post(post.id);
        let mut book = PendingBook::default();

        let first = PendingMutation::new(1, "post.like");
        let second = PendingMutation::new(2, "post.like").with_snapshots(vec![liked_snapshot(&post)]);
        let (first_id, second_id) = (first.correlation, second.correlation);
        book.enqueue(entity, first);
        book.enqueue(entity, second);

        book.settle_purged(entity, first_id);
        assert_eq!(
            book.settle_failure(entity, second_id),
            FailurePlan::Restore(Vec::new())
        );
    }

    #[test]
    fn transitions_are_recorded() {
        let entity = EntityRef::Inbox(Uuid::new_v4());
        let registry = PendingRegistry::new();
        let pending = PendingMutation::new(3, "notifications.mark_all_read");
        let id = pending.correlation;
        registry.lock().enqueue(entity, pending);

        assert!(registry.lock().transition(entity, id, MutationState::InFlight));
        assert_eq!(
            registry.lock().get(entity, id).map(|p| p.state),
            Some(MutationState::InFlight)
        );
        assert!(!registry.lock().transition(entity, Uuid::new_v4(), MutationState::InFlight));
        assert_eq!(registry.total(), 1);
    }
}
