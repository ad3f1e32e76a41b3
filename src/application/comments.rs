//! Comment thread accessor and optimistic comment actions.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, instrument};
use uuid::Uuid;

use devlog_api_types::{HelpfulToggleResponse, LikeToggleResponse};

use crate::application::context::SyncContext;
use crate::application::error::ActionError;
use crate::application::media::{self, COMMENTS_FOLDER};
use crate::application::repos::{CommentFields, CommentsRepo, MediaStore};
use crate::cache::propagation;
use crate::cache::{
    CacheKey, CachedValue, CommentThread, EntityRef, Mutation, MutationOutcome, Patch, QueryState,
    RecordMut,
};
use crate::domain::drafts::{ImageChange, ImagePlan, NewComment};
use crate::domain::entities::Comment;
use crate::domain::error::DomainError;

pub struct CommentActions {
    ctx: SyncContext,
    comments: Arc<dyn CommentsRepo>,
    media: Arc<dyn MediaStore>,
}

impl CommentActions {
    pub fn new(
        ctx: SyncContext,
        comments: Arc<dyn CommentsRepo>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            ctx,
            comments,
            media,
        }
    }

    /// The reply tree of a post, projected from the cached flat collection.
    pub async fn thread(&self, post_id: Uuid) -> QueryState<CommentThread> {
        self.flat(post_id)
            .await
            .map(|comments| CommentThread::project(&comments))
    }

    /// The cached flat collection as the server returned it.
    pub async fn flat(&self, post_id: Uuid) -> QueryState<Vec<Comment>> {
        let key = CacheKey::comments(post_id, self.ctx.viewer_id().await);
        let comments = self.comments.clone();
        self.ctx
            .queries
            .read(&key, move || {
                async move {
                    comments
                        .list_comments(post_id)
                        .await
                        .map(CachedValue::Comments)
                }
                .boxed()
            })
            .and_then(into_comments)
    }

    pub async fn load_thread(&self, post_id: Uuid) -> QueryState<CommentThread> {
        let key = CacheKey::comments(post_id, self.ctx.viewer_id().await);
        let comments = self.comments.clone();
        let fetch = async move {
            comments
                .list_comments(post_id)
                .await
                .map(CachedValue::Comments)
        }
        .boxed();
        self.ctx
            .queries
            .refresh(&key, fetch)
            .await
            .and_then(into_comments)
            .map(|comments| CommentThread::project(&comments))
    }

    /// Post a comment or a reply. Nothing is speculated; the returned comment
    /// joins the loaded thread and bumps the post's comment count.
    #[instrument(skip(self, draft), fields(parent_id = ?draft.parent_id))]
    pub async fn create(&self, post_id: Uuid, draft: NewComment) -> MutationOutcome<Comment> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("comment.create", err),
        };
        if let Err(err) = draft.validate() {
            return self.ctx.coordinator.reject("comment.create", err.into());
        }
        let loaded = self
            .ctx
            .store
            .peek(&CacheKey::comments(post_id, Some(viewer.id)))
            .and_then(|entry| into_comments(entry.value));
        if let Err(err) = draft.check_parent(loaded.as_deref()) {
            return self.ctx.coordinator.reject("comment.create", err.into());
        }

        let plan = ImagePlan::resolve(draft.image_upload, draft.image_url.as_deref());
        let image = match media::resolve(&self.media, plan, COMMENTS_FOLDER).await {
            Ok(image) => image,
            Err(err) => return MutationOutcome::RolledBack(err),
        };
        let fields = CommentFields {
            content: draft.content.trim().to_string(),
            parent_id: draft.parent_id,
            image: match &image.change {
                ImageChange::Set(image) => Some(image.clone()),
                ImageChange::Keep | ImageChange::Remove => None,
            },
        };

        let mutation = Mutation::new(
            "comment.create",
            EntityRef::Comment(Uuid::new_v4()),
            Some(viewer.id),
        );
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.comments.create_comment(post_id, fields), |_| None)
            .await;
        match &outcome {
            MutationOutcome::Reconciled(comment) => {
                propagation::insert_created_comment(&self.ctx.store, comment, Some(viewer.id));
                info!(comment_id = %comment.id, %post_id, "Comment created");
            }
            _ => {
                if let Some(uploaded) = &image.uploaded {
                    media::discard(&self.media, &uploaded.file_id).await;
                }
            }
        }
        outcome
    }

    #[instrument(skip(self, content))]
    pub async fn update(&self, id: Uuid, content: &str) -> MutationOutcome<Comment> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("comment.update", err),
        };
        if let Some(cached) = self.find(id, viewer.id) {
            if !cached.is_authored_by(&viewer) {
                return self
                    .ctx
                    .coordinator
                    .reject("comment.update", ActionError::NotAuthorized);
            }
        }
        let content = content.trim().to_string();
        if content.is_empty() {
            return self
                .ctx
                .coordinator
                .reject("comment.update", DomainError::empty("content").into());
        }

        let speculative = content.clone();
        let mutation = Mutation::new("comment.update", EntityRef::Comment(id), Some(viewer.id))
            .patch_entity(move |record| {
                if let RecordMut::Comment(comment) = record {
                    comment.content = speculative.clone();
                }
            });
        self.ctx
            .coordinator
            .run(mutation, self.comments.update_comment(id, &content), |updated| {
                let updated = updated.clone();
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Comment(comment) = record {
                        *comment = updated.clone();
                    }
                }) as Patch)
            })
            .await
    }

    /// Delete a comment together with every reply below it.
    #[instrument(skip(self))]
    pub async fn delete(&self, post_id: Uuid, id: Uuid) -> MutationOutcome<()> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("comment.delete", err),
        };
        let cached = self.find(id, viewer.id);
        if cached.as_ref().is_some_and(|comment| !comment.is_authored_by(&viewer)) {
            return self
                .ctx
                .coordinator
                .reject("comment.delete", ActionError::NotAuthorized);
        }
        let viewer_id = viewer.id;
        let mutation = Mutation::new("comment.delete", EntityRef::Comment(id), Some(viewer_id))
            .speculate(move |store| {
                propagation::remove_comment_subtree(store, post_id, id, Some(viewer_id))
            });
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.comments.delete_comment(id), |_| None)
            .await;
        if outcome.is_reconciled() {
            let file_id = cached
                .and_then(|comment| comment.image)
                .and_then(|image| image.file_id);
            if let Some(file_id) = file_id {
                media::discard(&self.media, &file_id).await;
            }
        }
        outcome
    }

    #[instrument(skip(self))]
    pub async fn toggle_like(&self, id: Uuid) -> MutationOutcome<LikeToggleResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("comment.like", err),
        };
        let mutation = Mutation::new("comment.like", EntityRef::Comment(id), Some(viewer.id))
            .patch_entity(|record| {
                if let RecordMut::Comment(comment) = record {
                    comment.toggle_like();
                }
            });
        self.ctx
            .coordinator
            .run(mutation, self.comments.toggle_like(id), |response| {
                let (liked, count) = (response.liked, response.likes);
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Comment(comment) = record {
                        comment.liked = liked;
                        comment.like_count = count;
                    }
                }) as Patch)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn toggle_helpful(&self, id: Uuid) -> MutationOutcome<HelpfulToggleResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("comment.helpful", err),
        };
        let mutation = Mutation::new("comment.helpful", EntityRef::Comment(id), Some(viewer.id))
            .patch_entity(|record| {
                if let RecordMut::Comment(comment) = record {
                    comment.toggle_helpful();
                }
            });
        self.ctx
            .coordinator
            .run(mutation, self.comments.toggle_helpful(id), |response| {
                let (helpful, count) = (response.helpful, response.helpful_count);
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Comment(comment) = record {
                        comment.helpful = helpful;
                        comment.helpful_count = count;
                    }
                }) as Patch)
            })
            .await
    }

    fn find(&self, id: Uuid, viewer: Uuid) -> Option<Comment> {
        let keys = self.ctx.store.keys_matching(|key| {
            matches!(key, CacheKey::Comments { viewer: v, .. } if *v == Some(viewer))
        });
        keys.iter().find_map(|key| {
            self.ctx
                .store
                .peek(key)
                .and_then(|entry| entry.value.find_comment(id).cloned())
        })
    }
}

fn into_comments(value: CachedValue) -> Option<Vec<Comment>> {
    match value {
        CachedValue::Comments(comments) => Some(comments),
        _ => None,
    }
}
