//! Mutation coordinator.
//!
//! Runs the optimistic-update protocol for one user action: snapshot and
//! speculatively patch every affected view, await the remote operation, then
//! reconcile with the authoritative value or roll back. Every failure ends in
//! a structured outcome; nothing is swallowed.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::error::{ActionError, Notice};
use crate::application::repos::RepoError;

use super::pending::{
    EntityRef, FailurePlan, MutationState, PendingMutation, PendingRegistry, SuccessPlan,
};
use super::propagation::{self, Patch, PropagationPlan, RecordMut, Snapshot};
use super::store::EntityCacheStore;

const METRIC_MUTATION_RECONCILED: &str = "devlog_mutation_reconciled_total";
const METRIC_MUTATION_ROLLBACK: &str = "devlog_mutation_rollback_total";
const METRIC_MUTATION_PURGED: &str = "devlog_mutation_purged_total";
const METRIC_MUTATION_MS: &str = "devlog_mutation_ms";

type Speculation<'a> = Box<dyn FnOnce(&EntityCacheStore) -> Vec<Snapshot> + Send + 'a>;

/// Final result of one user action.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<T> {
    Reconciled(T),
    /// The remote call failed and speculative state was undone.
    RolledBack(ActionError),
    /// The target no longer exists and was dropped from every view.
    Purged(ActionError),
    /// Refused before anything was written or sent.
    Rejected(ActionError),
    /// Nothing to do; no network call was made.
    Noop,
}

impl<T> MutationOutcome<T> {
    pub fn is_reconciled(&self) -> bool {
        matches!(self, MutationOutcome::Reconciled(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            MutationOutcome::Reconciled(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ActionError> {
        match self {
            MutationOutcome::RolledBack(err)
            | MutationOutcome::Purged(err)
            | MutationOutcome::Rejected(err) => Some(err),
            MutationOutcome::Reconciled(_) | MutationOutcome::Noop => None,
        }
    }

    /// The notice to show the user, if any.
    pub fn notice(&self) -> Option<Notice> {
        self.error().map(ActionError::notice)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MutationOutcome<U> {
        match self {
            MutationOutcome::Reconciled(value) => MutationOutcome::Reconciled(f(value)),
            MutationOutcome::RolledBack(err) => MutationOutcome::RolledBack(err),
            MutationOutcome::Purged(err) => MutationOutcome::Purged(err),
            MutationOutcome::Rejected(err) => MutationOutcome::Rejected(err),
            MutationOutcome::Noop => MutationOutcome::Noop,
        }
    }

    pub fn into_result(self) -> Result<Option<T>, ActionError> {
        match self {
            MutationOutcome::Reconciled(value) => Ok(Some(value)),
            MutationOutcome::Noop => Ok(None),
            MutationOutcome::RolledBack(err)
            | MutationOutcome::Purged(err)
            | MutationOutcome::Rejected(err) => Err(err),
        }
    }
}

/// Description of one optimistic action.
pub struct Mutation<'a> {
    action: &'static str,
    entity: EntityRef,
    viewer: Option<Uuid>,
    speculation: Option<Speculation<'a>>,
}

impl<'a> Mutation<'a> {
    pub fn new(action: &'static str, entity: EntityRef, viewer: Option<Uuid>) -> Self {
        Self {
            action,
            entity,
            viewer,
            speculation: None,
        }
    }

    /// Speculative write. Runs against the latest cached state at issue time
    /// and returns the snapshots needed to undo it.
    pub fn speculate<F>(mut self, speculation: F) -> Self
    where
        F: FnOnce(&EntityCacheStore) -> Vec<Snapshot> + Send + 'a,
    {
        self.speculation = Some(Box::new(speculation));
        self
    }

    /// Speculative patch of the target entity in every view holding it.
    pub fn patch_entity<F>(self, patch: F) -> Self
    where
        F: Fn(RecordMut<'_>) + Send + 'a,
    {
        let (entity, viewer) = (self.entity, self.viewer);
        self.speculate(move |store| match entity.member() {
            Some(member) => PropagationPlan::for_member(store, member, viewer).speculate(store, patch),
            None => Vec::new(),
        })
    }

    pub fn action(&self) -> &'static str {
        self.action
    }
}

pub struct MutationCoordinator {
    store: Arc<EntityCacheStore>,
    pending: PendingRegistry,
}

impl MutationCoordinator {
    pub fn new(store: Arc<EntityCacheStore>) -> Self {
        Self {
            store,
            pending: PendingRegistry::new(),
        }
    }

    pub fn store(&self) -> &Arc<EntityCacheStore> {
        &self.store
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Drive one mutation to a terminal state.
    ///
    /// `reconcile` turns the authoritative response into a patch for the
    /// target entity; returning `None` leaves the cached views as they are.
    pub async fn run<T, Fut, R>(
        &self,
        mutation: Mutation<'_>,
        remote: Fut,
        reconcile: R,
    ) -> MutationOutcome<T>
    where
        Fut: Future<Output = Result<T, RepoError>>,
        R: FnOnce(&T) -> Option<Patch>,
    {
        let Mutation {
            action,
            entity,
            viewer,
            speculation,
        } = mutation;
        let started = Instant::now();

        let correlation = {
            let mut book = self.pending.lock();
            let epoch = self.store.feed().next_epoch();
            let snapshots = speculation.map_or_else(Vec::new, |speculate| speculate(self.store.as_ref()));
            let pending = PendingMutation::new(epoch, action).with_snapshots(snapshots);
            let correlation = pending.correlation;
            debug!(
                %correlation,
                %entity,
                action,
                epoch,
                snapshots = pending.snapshots().len(),
                state = MutationState::SpeculativeApplied.as_str(),
                "Speculative state applied"
            );
            book.enqueue(entity, pending);
            book.transition(entity, correlation, MutationState::InFlight);
            correlation
        };

        let result = remote.await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_MUTATION_MS, "action" => action).record(elapsed_ms);

        match result {
            Ok(value) => {
                let patch = reconcile(&value);
                let plan = {
                    let mut book = self.pending.lock();
                    let plan = book.settle_success(entity, correlation, patch.as_ref());
                    if let (SuccessPlan::Apply, Some(patch)) = (&plan, &patch) {
                        match (entity, entity.member()) {
                            (_, Some(member)) => {
                                PropagationPlan::for_member(&self.store, member, viewer)
                                    .patch(&self.store, patch);
                            }
                            (EntityRef::Inbox(owner), None) => {
                                propagation::patch_inbox(&self.store, owner, patch);
                            }
                            _ => {}
                        }
                    }
                    plan
                };
                counter!(METRIC_MUTATION_RECONCILED, "action" => action).increment(1);
                info!(
                    %correlation,
                    %entity,
                    action,
                    state = MutationState::Reconciled.as_str(),
                    folded = matches!(plan, SuccessPlan::Folded { .. }),
                    elapsed_ms,
                    "Mutation reconciled"
                );
                MutationOutcome::Reconciled(value)
            }
            Err(RepoError::NotFound) if entity.member().is_some() => {
                {
                    let mut book = self.pending.lock();
                    book.settle_purged(entity, correlation);
                    if let Some(member) = entity.member() {
                        propagation::purge(&self.store, member);
                    }
                }
                counter!(METRIC_MUTATION_PURGED, "action" => action).increment(1);
                warn!(
                    %correlation,
                    %entity,
                    action,
                    state = MutationState::RolledBack.as_str(),
                    "Mutation target vanished; purged from every view"
                );
                MutationOutcome::Purged(ActionError::NotFound)
            }
            Err(err) => {
                let plan = {
                    let mut book = self.pending.lock();
                    let plan = book.settle_failure(entity, correlation);
                    if let FailurePlan::Restore(snapshots) = &plan {
                        propagation::restore(&self.store, snapshots);
                    }
                    plan
                };
                counter!(METRIC_MUTATION_ROLLBACK, "action" => action).increment(1);
                warn!(
                    %correlation,
                    %entity,
                    action,
                    state = MutationState::RolledBack.as_str(),
                    plan = describe_failure(&plan),
                    error = %err,
                    "Mutation rolled back"
                );
                MutationOutcome::RolledBack(err.into())
            }
        }
    }

    /// Record an action refused before any write, keeping the outcome shape uniform.
    pub fn reject<T>(&self, action: &'static str, err: ActionError) -> MutationOutcome<T> {
        debug!(action, error = %err, "Mutation rejected before speculation");
        MutationOutcome::Rejected(err)
    }
}

fn describe_failure(plan: &FailurePlan) -> &'static str {
    match plan {
        FailurePlan::Restore(_) => "restored",
        FailurePlan::HandedDown { .. } => "handed_down",
        FailurePlan::Dropped { .. } => "dropped",
    }
}
