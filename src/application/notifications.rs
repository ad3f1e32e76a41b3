//! Notification list, unread count, read-state actions and background polling.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use devlog_api_types::MarkAllReadResponse;

use crate::application::context::SyncContext;
use crate::application::repos::NotificationsRepo;
use crate::cache::propagation::Member;
use crate::cache::{
    CacheKey, CachedValue, EntityRef, FetchFuture, Mutation, MutationOutcome, Patch,
    PropagationPlan, QueryState, RecordMut,
};
use crate::domain::entities::Notification;

const SOURCE: &str = "application::notifications";

pub struct NotificationCenter {
    ctx: SyncContext,
    notifications: Arc<dyn NotificationsRepo>,
}

impl NotificationCenter {
    pub fn new(ctx: SyncContext, notifications: Arc<dyn NotificationsRepo>) -> Self {
        Self { ctx, notifications }
    }

    /// The viewer's notifications. Anonymous sessions have none.
    pub async fn notifications(&self) -> QueryState<Vec<Notification>> {
        let Some(viewer) = self.ctx.viewer_id().await else {
            return QueryState::Ready {
                value: Vec::new(),
                stale: false,
            };
        };
        let repo = self.notifications.clone();
        self.ctx
            .queries
            .read(&CacheKey::Notifications { viewer }, move || fetch(repo))
            .and_then(into_notifications)
    }

    /// Fetch now and wait for the result.
    pub async fn refresh(&self) -> QueryState<Vec<Notification>> {
        let Some(viewer) = self.ctx.viewer_id().await else {
            return QueryState::Ready {
                value: Vec::new(),
                stale: false,
            };
        };
        self.ctx
            .queries
            .refresh(
                &CacheKey::Notifications { viewer },
                fetch(self.notifications.clone()),
            )
            .await
            .and_then(into_notifications)
    }

    /// Unread notifications in the cached list; zero when nothing is loaded.
    pub async fn unread_count(&self) -> usize {
        let Some(viewer) = self.ctx.viewer_id().await else {
            return 0;
        };
        self.ctx
            .store
            .peek(&CacheKey::Notifications { viewer })
            .and_then(|entry| entry.value.as_notifications().map(count_unread))
            .unwrap_or(0)
    }

    #[instrument(skip(self))]
    pub async fn mark_read(&self, id: Uuid) -> MutationOutcome<()> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("notification.read", err),
        };
        if self.cached(viewer.id, id).is_some_and(|notification| notification.read) {
            return MutationOutcome::Noop;
        }
        let mutation = Mutation::new(
            "notification.read",
            EntityRef::Notification(id),
            Some(viewer.id),
        )
        .patch_entity(set_read);
        self.ctx
            .coordinator
            .run(mutation, self.notifications.mark_read(id), |_| Some(read_patch()))
            .await
    }

    /// Mark every notification read. When the loaded list has nothing unread
    /// this is a no-op and the service is not called.
    #[instrument(skip(self))]
    pub async fn mark_all_read(&self) -> MutationOutcome<MarkAllReadResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("notification.read_all", err),
        };
        let key = CacheKey::Notifications { viewer: viewer.id };
        let unread: Option<Vec<Uuid>> = self.ctx.store.peek(&key).and_then(|entry| {
            entry.value.as_notifications().map(|all| {
                all.iter()
                    .filter(|notification| !notification.read)
                    .map(|notification| notification.id)
                    .collect()
            })
        });
        if unread.as_ref().is_some_and(Vec::is_empty) {
            debug!(target = SOURCE, viewer = %viewer.id, "Nothing unread; skipping mark-all-read");
            return MutationOutcome::Noop;
        }

        let viewer_id = viewer.id;
        let ids = unread.unwrap_or_default();
        let mutation = Mutation::new(
            "notification.read_all",
            EntityRef::Inbox(viewer_id),
            Some(viewer_id),
        )
        .speculate(move |store| {
            ids.iter()
                .flat_map(|id| {
                    PropagationPlan::for_member(store, Member::Notification(*id), Some(viewer_id))
                        .speculate(store, set_read)
                })
                .collect()
        });
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.notifications.mark_all_read(), |_| Some(read_patch()))
            .await;
        if let MutationOutcome::Reconciled(response) = &outcome {
            info!(target = SOURCE, viewer = %viewer_id, count = response.count, "Notifications marked read");
        }
        outcome
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> MutationOutcome<()> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("notification.delete", err),
        };
        let viewer_id = viewer.id;
        let mutation = Mutation::new(
            "notification.delete",
            EntityRef::Notification(id),
            Some(viewer_id),
        )
        .speculate(move |store| {
            PropagationPlan::for_notification(store, id, Some(viewer_id)).remove(store)
        });
        self.ctx
            .coordinator
            .run(mutation, self.notifications.delete_notification(id), |_| None)
            .await
    }

    /// Refresh the notification list every `interval` while someone is signed
    /// in. Ticks with no viewer are skipped. Dropping the handle stops polling.
    pub fn spawn_polling(self: Arc<Self>, interval: Duration) -> PollingHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.poll_once().await;
            }
        });
        PollingHandle { task }
    }

    /// One polling tick. Returns whether a fetch was made.
    pub async fn poll_once(&self) -> bool {
        let Some(viewer) = self.ctx.viewer_id().await else {
            debug!(target = SOURCE, "No viewer; notification poll suspended");
            return false;
        };
        let state = self
            .ctx
            .queries
            .refresh(
                &CacheKey::Notifications { viewer },
                fetch(self.notifications.clone()),
            )
            .await;
        if let QueryState::Failed { error } = &state {
            debug!(target = SOURCE, %viewer, error = %error, "Notification poll failed");
        }
        true
    }

    fn cached(&self, viewer: Uuid, id: Uuid) -> Option<Notification> {
        let entry = self.ctx.store.peek(&CacheKey::Notifications { viewer })?;
        entry
            .value
            .as_notifications()?
            .iter()
            .find(|notification| notification.id == id)
            .cloned()
    }
}

/// Background polling task; aborted when dropped.
#[derive(Debug)]
pub struct PollingHandle {
    task: JoinHandle<()>,
}

impl PollingHandle {
    pub fn stop(self) {
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollingHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn fetch(repo: Arc<dyn NotificationsRepo>) -> FetchFuture {
    async move {
        repo.list_notifications()
            .await
            .map(CachedValue::Notifications)
    }
    .boxed()
}

fn set_read(record: RecordMut<'_>) {
    if let RecordMut::Notification(notification) = record {
        notification.read = true;
    }
}

/// A confirmed read is applied again so a poll that landed mid-flight
/// cannot leave the item unread.
fn read_patch() -> Patch {
    Box::new(set_read)
}

fn count_unread(notifications: &[Notification]) -> usize {
    notifications
        .iter()
        .filter(|notification| !notification.read)
        .count()
}

fn into_notifications(value: CachedValue) -> Option<Vec<Notification>> {
    match value {
        CachedValue::Notifications(notifications) => Some(notifications),
        _ => None,
    }
}
