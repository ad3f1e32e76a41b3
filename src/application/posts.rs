//! Post read accessors and optimistic post actions.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, instrument};
use uuid::Uuid;

use devlog_api_types::{HelpfulToggleResponse, LikeToggleResponse, SaveResponse};

use crate::application::context::SyncContext;
use crate::application::error::ActionError;
use crate::application::media::{self, POSTS_FOLDER};
use crate::application::repos::{MediaStore, PostFields, PostPatch, PostsRepo};
use crate::cache::propagation::{self, Member};
use crate::cache::{
    CacheKey, CachedValue, EntityRef, ListFilter, Mutation, MutationOutcome, Patch,
    PropagationPlan, QueryState, RecordMut,
};
use crate::domain::drafts::{ImageChange, ImagePlan, NewPost, PostEdit, normalize_tags};
use crate::domain::entities::Post;

pub struct PostActions {
    ctx: SyncContext,
    posts: Arc<dyn PostsRepo>,
    media: Arc<dyn MediaStore>,
}

impl PostActions {
    pub fn new(ctx: SyncContext, posts: Arc<dyn PostsRepo>, media: Arc<dyn MediaStore>) -> Self {
        Self { ctx, posts, media }
    }

    /// A feed filter scoped to the current viewer.
    pub async fn filter(&self) -> ListFilter {
        ListFilter::new(self.ctx.viewer_id().await)
    }

    pub fn list(&self, filter: &ListFilter) -> QueryState<Vec<Post>> {
        let key = CacheKey::PostList(filter.clone());
        let posts = self.posts.clone();
        let filter = filter.clone();
        self.ctx
            .queries
            .read(&key, move || {
                async move { posts.list_posts(&filter).await.map(CachedValue::Posts) }.boxed()
            })
            .and_then(into_posts)
    }

    pub async fn load_list(&self, filter: &ListFilter) -> QueryState<Vec<Post>> {
        let key = CacheKey::PostList(filter.clone());
        let posts = self.posts.clone();
        let request = filter.clone();
        let fetch = async move { posts.list_posts(&request).await.map(CachedValue::Posts) }.boxed();
        self.ctx.queries.refresh(&key, fetch).await.and_then(into_posts)
    }

    pub async fn post(&self, id: Uuid) -> QueryState<Post> {
        let key = CacheKey::post(id, self.ctx.viewer_id().await);
        let posts = self.posts.clone();
        self.ctx
            .queries
            .read(&key, move || {
                async move { posts.get_post(id).await.map(CachedValue::Post) }.boxed()
            })
            .and_then(into_post)
    }

    pub async fn load_post(&self, id: Uuid) -> QueryState<Post> {
        let key = CacheKey::post(id, self.ctx.viewer_id().await);
        let posts = self.posts.clone();
        let fetch = async move { posts.get_post(id).await.map(CachedValue::Post) }.boxed();
        self.ctx.queries.refresh(&key, fetch).await.and_then(into_post)
    }

    pub async fn saved(&self) -> QueryState<Vec<Post>> {
        let Some(viewer) = self.ctx.viewer_id().await else {
            return QueryState::failed(&ActionError::NotAuthenticated);
        };
        let posts = self.posts.clone();
        self.ctx
            .queries
            .read(&CacheKey::SavedPosts { viewer }, move || {
                async move { posts.list_saved_posts().await.map(CachedValue::Posts) }.boxed()
            })
            .and_then(into_posts)
    }

    pub async fn load_saved(&self) -> QueryState<Vec<Post>> {
        let Some(viewer) = self.ctx.viewer_id().await else {
            return QueryState::failed(&ActionError::NotAuthenticated);
        };
        let posts = self.posts.clone();
        let fetch = async move { posts.list_saved_posts().await.map(CachedValue::Posts) }.boxed();
        self.ctx
            .queries
            .refresh(&CacheKey::SavedPosts { viewer }, fetch)
            .await
            .and_then(into_posts)
    }

    #[instrument(skip(self))]
    pub async fn toggle_like(&self, id: Uuid) -> MutationOutcome<LikeToggleResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.like", err),
        };
        let mutation = Mutation::new("post.like", EntityRef::Post(id), Some(viewer.id))
            .patch_entity(|record| {
                if let RecordMut::Post(post) = record {
                    post.toggle_like();
                }
            });
        self.ctx
            .coordinator
            .run(mutation, self.posts.toggle_like(id), |response| {
                let (liked, likes) = (response.liked, response.likes);
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Post(post) = record {
                        post.liked = liked;
                        post.likes = likes;
                    }
                }) as Patch)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn toggle_helpful(&self, id: Uuid) -> MutationOutcome<HelpfulToggleResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.helpful", err),
        };
        let mutation = Mutation::new("post.helpful", EntityRef::Post(id), Some(viewer.id))
            .patch_entity(|record| {
                if let RecordMut::Post(post) = record {
                    post.toggle_helpful();
                }
            });
        self.ctx
            .coordinator
            .run(mutation, self.posts.toggle_helpful(id), |response| {
                let (helpful, count) = (response.helpful, response.helpful_count);
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Post(post) = record {
                        post.helpful = helpful;
                        post.helpful_count = count;
                    }
                }) as Patch)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn save(&self, id: Uuid) -> MutationOutcome<SaveResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.save", err),
        };
        let mutation = Mutation::new("post.save", EntityRef::Post(id), Some(viewer.id))
            .speculate(move |store| {
                let mut snapshots = PropagationPlan::for_post(store, id, Some(viewer.id))
                    .speculate(store, |record| set_saved(record, true));
                snapshots.extend(propagation::insert_saved(store, viewer.id, id));
                snapshots
            });
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.posts.save_post(id), reconcile_saved)
            .await;
        propagation::prune_saved(&self.ctx.store, viewer.id);
        outcome
    }

    #[instrument(skip(self))]
    pub async fn unsave(&self, id: Uuid) -> MutationOutcome<SaveResponse> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.unsave", err),
        };
        let mutation = Mutation::new("post.unsave", EntityRef::Post(id), Some(viewer.id))
            .speculate(move |store| {
                let mut snapshots = PropagationPlan::for_post(store, id, Some(viewer.id))
                    .speculate(store, |record| set_saved(record, false));
                snapshots.extend(propagation::remove_saved(store, viewer.id, id));
                snapshots
            });
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.posts.unsave_post(id), reconcile_saved)
            .await;
        propagation::prune_saved(&self.ctx.store, viewer.id);
        outcome
    }

    /// Create a post. Nothing is speculated: the server assigns the id, and the
    /// returned post is prepended to every loaded list it belongs in.
    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn create(&self, draft: NewPost) -> MutationOutcome<Post> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.create", err),
        };
        if let Err(err) = draft.validate() {
            return self.ctx.coordinator.reject("post.create", err.into());
        }
        let plan = ImagePlan::resolve(draft.image_upload, draft.image_url.as_deref());
        let image = match media::resolve(&self.media, plan, POSTS_FOLDER).await {
            Ok(image) => image,
            Err(err) => return MutationOutcome::RolledBack(err),
        };
        let fields = PostFields {
            title: draft.title.trim().to_string(),
            description: draft.description,
            content: draft.content,
            code_snippet: draft.code_snippet.filter(|snippet| !snippet.is_empty()),
            tags: normalize_tags(&draft.tags),
            image: match &image.change {
                ImageChange::Set(image) => Some(image.clone()),
                ImageChange::Keep | ImageChange::Remove => None,
            },
        };

        // The id is assigned server-side; serialize on a key nothing else uses.
        let mutation = Mutation::new("post.create", EntityRef::Post(Uuid::new_v4()), Some(viewer.id));
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.posts.create_post(fields), |_| None)
            .await;
        match &outcome {
            MutationOutcome::Reconciled(post) => {
                propagation::insert_created_post(&self.ctx.store, post, Some(viewer.id));
                info!(post_id = %post.id, "Post created");
            }
            _ => {
                if let Some(uploaded) = &image.uploaded {
                    media::discard(&self.media, &uploaded.file_id).await;
                }
            }
        }
        outcome
    }

    /// Apply a partial edit. Only provided fields change; the image follows
    /// the upload, then URL, then previous-value priority.
    #[instrument(skip(self, edit))]
    pub async fn update(&self, id: Uuid, edit: PostEdit) -> MutationOutcome<Post> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.update", err),
        };
        let cached = self.ctx.store.find_post(id);
        if cached.as_ref().is_some_and(|post| !post.is_authored_by(&viewer)) {
            return self.ctx.coordinator.reject("post.update", ActionError::NotAuthorized);
        }
        if let Err(err) = edit.validate() {
            return self.ctx.coordinator.reject("post.update", err.into());
        }
        let plan = ImagePlan::resolve(edit.image_upload.clone(), edit.image_url.as_deref());
        let image = match media::resolve(&self.media, plan, POSTS_FOLDER).await {
            Ok(image) => image,
            Err(err) => return MutationOutcome::RolledBack(err),
        };

        let patch = PostPatch {
            title: edit.title.as_ref().map(|title| title.trim().to_string()),
            description: edit.description.clone(),
            content: edit.content.clone(),
            code_snippet: edit.code_snippet.clone(),
            tags: edit.tags.as_deref().map(normalize_tags),
            image: match &image.change {
                ImageChange::Keep => None,
                ImageChange::Remove => Some(None),
                ImageChange::Set(image) => Some(Some(image.clone())),
            },
        };
        let change = image.change.clone();
        let mutation = Mutation::new("post.update", EntityRef::Post(id), Some(viewer.id))
            .patch_entity(move |record| {
                if let RecordMut::Post(post) = record {
                    edit.apply_to(post, &change);
                }
            });
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.posts.update_post(id, patch), |updated| {
                let updated = updated.clone();
                Some(Box::new(move |record: RecordMut<'_>| {
                    if let RecordMut::Post(post) = record {
                        *post = updated.clone();
                    }
                }) as Patch)
            })
            .await;

        if outcome.is_reconciled() {
            let previous = cached.as_ref().and_then(|post| post.image.as_ref());
            if let Some(file_id) = media::replaced_file(previous, &image.change) {
                media::discard(&self.media, file_id).await;
            }
        } else if let Some(uploaded) = &image.uploaded {
            media::discard(&self.media, &uploaded.file_id).await;
        }
        outcome
    }

    /// Remove a post from every view; restored if the delete fails.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> MutationOutcome<()> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.delete", err),
        };
        let cached = self.ctx.store.find_post(id);
        if cached.as_ref().is_some_and(|post| !post.is_authored_by(&viewer)) {
            return self.ctx.coordinator.reject("post.delete", ActionError::NotAuthorized);
        }
        let mutation = Mutation::new("post.delete", EntityRef::Post(id), Some(viewer.id))
            .speculate(move |store| PropagationPlan::for_post(store, id, Some(viewer.id)).remove(store));
        let outcome = self
            .ctx
            .coordinator
            .run(mutation, self.posts.delete_post(id), |_| None)
            .await;
        if outcome.is_reconciled() {
            propagation::purge(&self.ctx.store, Member::Post(id));
            let file_id = cached.and_then(|post| post.image).and_then(|image| image.file_id);
            if let Some(file_id) = file_id {
                media::discard(&self.media, &file_id).await;
            }
        }
        outcome
    }

    /// Report a post for abuse. No cached view changes.
    #[instrument(skip(self, reason))]
    pub async fn report(&self, id: Uuid, reason: &str) -> MutationOutcome<()> {
        let viewer = match self.ctx.require_viewer().await {
            Ok(viewer) => viewer,
            Err(err) => return self.ctx.coordinator.reject("post.report", err),
        };
        if reason.trim().is_empty() {
            return self
                .ctx
                .coordinator
                .reject("post.report", ActionError::conflict("a report needs a reason"));
        }
        let mutation = Mutation::new("post.report", EntityRef::Post(id), Some(viewer.id));
        self.ctx
            .coordinator
            .run(mutation, self.posts.report_post(id, reason.trim()), |_| None)
            .await
    }
}

fn set_saved(record: RecordMut<'_>, saved: bool) {
    if let RecordMut::Post(post) = record {
        post.saved = saved;
    }
}

fn reconcile_saved(response: &SaveResponse) -> Option<Patch> {
    let saved = response.saved;
    Some(Box::new(move |record: RecordMut<'_>| set_saved(record, saved)))
}

fn into_posts(value: CachedValue) -> Option<Vec<Post>> {
    match value {
        CachedValue::Posts(posts) => Some(posts),
        _ => None,
    }
}

fn into_post(value: CachedValue) -> Option<Post> {
    match value {
        CachedValue::Post(post) => Some(post),
        _ => None,
    }
}
