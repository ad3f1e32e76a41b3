//! Scripted in-memory collaborators shared by the integration tests.
//!
//! The fake server keeps its own state and answers like the real API. Any
//! call can be held until the test releases it, or failed on demand, so
//! responses can be made to arrive in whatever order a test needs.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::oneshot;
use uuid::Uuid;

use devlog_api_types::{HelpfulToggleResponse, LikeToggleResponse, MarkAllReadResponse, SaveResponse};
use devlog_sync::application::repos::{
    CommentFields, CommentsRepo, IdentityProvider, MediaStore, NotificationsRepo, PostFields,
    PostPatch, PostsRepo, RepoError, UploadedMedia,
};
use devlog_sync::application::{CommentActions, NotificationCenter, PostActions, SyncContext};
use devlog_sync::cache::{CacheConfig, ListFilter};
use devlog_sync::domain::drafts::MediaFile;
use devlog_sync::domain::entities::{AuthorRef, Comment, Notification, Post, Viewer};
use devlog_sync::domain::types::NotificationKind;

pub fn viewer(name: &str) -> Viewer {
    Viewer {
        id: Uuid::new_v4(),
        name: name.to_string(),
        image: None,
    }
}

pub fn author_of(viewer: &Viewer) -> AuthorRef {
    AuthorRef {
        id: viewer.id,
        name: viewer.name.clone(),
        image: None,
    }
}

pub fn someone() -> AuthorRef {
    AuthorRef {
        id: Uuid::new_v4(),
        name: "someone".to_string(),
        image: None,
    }
}

pub fn post(title: &str, tags: &[&str]) -> Post {
    Post {
        id: Uuid::new_v4(),
        author: someone(),
        title: title.to_string(),
        description: format!("{title} description"),
        content: format!("{title} content"),
        code_snippet: None,
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        image: None,
        likes: 0,
        helpful_count: 0,
        liked: false,
        helpful: false,
        saved: false,
        comment_count: 0,
        created_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn comment(post_id: Uuid, parent_id: Option<Uuid>, content: &str) -> Comment {
    Comment {
        id: Uuid::new_v4(),
        post_id,
        parent_id,
        author: someone(),
        content: content.to_string(),
        image: None,
        like_count: 0,
        helpful_count: 0,
        liked: false,
        helpful: false,
        created_at: OffsetDateTime::UNIX_EPOCH,
    }
}

pub fn notification(recipient: Uuid, read: bool) -> Notification {
    Notification {
        id: Uuid::new_v4(),
        recipient_id: recipient,
        kind: NotificationKind::Comment,
        post_id: None,
        comment_id: None,
        actor: someone(),
        read,
        created_at: OffsetDateTime::UNIX_EPOCH,
    }
}

/// Releases one held call.
pub struct Gate(oneshot::Sender<Option<RepoError>>);

impl Gate {
    /// Let the call reach the server state.
    pub fn release(self) {
        let _ = self.0.send(None);
    }

    /// Answer the call with an error instead.
    pub fn fail(self, err: RepoError) {
        let _ = self.0.send(Some(err));
    }
}

#[derive(Default)]
pub struct ServerState {
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub notifications: Vec<Notification>,
    pub reports: Vec<(Uuid, String)>,
    pub uploads: Vec<UploadedMedia>,
    pub deleted_files: Vec<String>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<ServerState>,
    holds: Mutex<HashMap<&'static str, VecDeque<oneshot::Receiver<Option<RepoError>>>>>,
    failures: Mutex<HashMap<&'static str, VecDeque<RepoError>>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    author: Mutex<Option<AuthorRef>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_posts(&self, posts: Vec<Post>) {
        self.state.lock().expect("state").posts = posts;
    }

    pub fn seed_comments(&self, comments: Vec<Comment>) {
        self.state.lock().expect("state").comments = comments;
    }

    pub fn seed_notifications(&self, notifications: Vec<Notification>) {
        self.state.lock().expect("state").notifications = notifications;
    }

    pub fn set_author(&self, author: AuthorRef) {
        *self.author.lock().expect("author") = Some(author);
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().expect("state"))
    }

    pub fn server_post(&self, id: Uuid) -> Option<Post> {
        self.with_state(|state| state.posts.iter().find(|post| post.id == id).cloned())
    }

    /// Hold the next call of `op` until the returned gate is used.
    pub fn hold(&self, op: &'static str) -> Gate {
        let (tx, rx) = oneshot::channel();
        self.holds
            .lock()
            .expect("holds")
            .entry(op)
            .or_default()
            .push_back(rx);
        Gate(tx)
    }

    /// Fail the next call of `op` immediately.
    pub fn fail_next(&self, op: &'static str, err: RepoError) {
        self.failures
            .lock()
            .expect("failures")
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn calls(&self, op: &'static str) -> usize {
        self.calls.lock().expect("calls").get(op).copied().unwrap_or(0)
    }

    /// Yield until `op` has been called `count` times.
    pub async fn wait_for_calls(&self, op: &'static str, count: usize) {
        for _ in 0..10_000 {
            if self.calls(op) >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("`{op}` was not called {count} times");
    }

    async fn enter(&self, op: &'static str) -> Result<(), RepoError> {
        *self.calls.lock().expect("calls").entry(op).or_default() += 1;
        let held = self
            .holds
            .lock()
            .expect("holds")
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = held {
            if let Ok(Some(err)) = gate.await {
                return Err(err);
            }
        }
        let failure = self
            .failures
            .lock()
            .expect("failures")
            .get_mut(op)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn post_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut Post) -> R) -> Result<R, RepoError> {
        let mut state = self.state.lock().expect("state");
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or(RepoError::NotFound)?;
        Ok(f(post))
    }

    fn comment_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut Comment) -> R) -> Result<R, RepoError> {
        let mut state = self.state.lock().expect("state");
        let comment = state
            .comments
            .iter_mut()
            .find(|comment| comment.id == id)
            .ok_or(RepoError::NotFound)?;
        Ok(f(comment))
    }

    fn author(&self) -> AuthorRef {
        self.author.lock().expect("author").clone().unwrap_or_else(someone)
    }
}

#[async_trait]
impl PostsRepo for FakeBackend {
    async fn list_posts(&self, filter: &ListFilter) -> Result<Vec<Post>, RepoError> {
        self.enter("posts.list").await?;
        Ok(self.with_state(|state| {
            state
                .posts
                .iter()
                .filter(|post| filter.admits(post))
                .cloned()
                .collect()
        }))
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        self.enter("posts.get").await?;
        self.server_post(id).ok_or(RepoError::NotFound)
    }

    async fn create_post(&self, fields: PostFields) -> Result<Post, RepoError> {
        self.enter("posts.create").await?;
        let created = Post {
            id: Uuid::new_v4(),
            author: self.author(),
            title: fields.title,
            description: fields.description,
            content: fields.content,
            code_snippet: fields.code_snippet,
            tags: fields.tags,
            image: fields.image,
            likes: 0,
            helpful_count: 0,
            liked: false,
            helpful: false,
            saved: false,
            comment_count: 0,
            created_at: OffsetDateTime::now_utc(),
        };
        self.with_state(|state| state.posts.insert(0, created.clone()));
        Ok(created)
    }

    async fn update_post(&self, id: Uuid, patch: PostPatch) -> Result<Post, RepoError> {
        self.enter("posts.update").await?;
        self.post_mut(id, |post| {
            if let Some(title) = patch.title {
                post.title = title;
            }
            if let Some(description) = patch.description {
                post.description = description;
            }
            if let Some(content) = patch.content {
                post.content = content;
            }
            if let Some(snippet) = patch.code_snippet {
                post.code_snippet = (!snippet.is_empty()).then_some(snippet);
            }
            if let Some(tags) = patch.tags {
                post.tags = tags;
            }
            if let Some(image) = patch.image {
                post.image = image;
            }
            post.clone()
        })
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        self.enter("posts.delete").await?;
        self.with_state(|state| {
            let before = state.posts.len();
            state.posts.retain(|post| post.id != id);
            state.comments.retain(|comment| comment.post_id != id);
            if state.posts.len() == before {
                Err(RepoError::NotFound)
            } else {
                Ok(())
            }
        })
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError> {
        self.enter("posts.like").await?;
        self.post_mut(id, |post| {
            post.toggle_like();
            LikeToggleResponse {
                liked: post.liked,
                likes: post.likes,
            }
        })
    }

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError> {
        self.enter("posts.helpful").await?;
        self.post_mut(id, |post| {
            post.toggle_helpful();
            HelpfulToggleResponse {
                helpful: post.helpful,
                helpful_count: post.helpful_count,
            }
        })
    }

    async fn save_post(&self, id: Uuid) -> Result<SaveResponse, RepoError> {
        self.enter("posts.save").await?;
        self.post_mut(id, |post| {
            post.saved = true;
            SaveResponse { saved: true }
        })
    }

    async fn unsave_post(&self, id: Uuid) -> Result<SaveResponse, RepoError> {
        self.enter("posts.unsave").await?;
        self.post_mut(id, |post| {
            post.saved = false;
            SaveResponse { saved: false }
        })
    }

    async fn list_saved_posts(&self) -> Result<Vec<Post>, RepoError> {
        self.enter("posts.saved").await?;
        Ok(self.with_state(|state| state.posts.iter().filter(|post| post.saved).cloned().collect()))
    }

    async fn report_post(&self, id: Uuid, reason: &str) -> Result<(), RepoError> {
        self.enter("posts.report").await?;
        self.with_state(|state| state.reports.push((id, reason.to_string())));
        Ok(())
    }
}

#[async_trait]
impl CommentsRepo for FakeBackend {
    async fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>, RepoError> {
        self.enter("comments.list").await?;
        Ok(self.with_state(|state| {
            state
                .comments
                .iter()
                .filter(|comment| comment.post_id == post_id)
                .cloned()
                .collect()
        }))
    }

    async fn create_comment(&self, post_id: Uuid, fields: CommentFields) -> Result<Comment, RepoError> {
        self.enter("comments.create").await?;
        let created = Comment {
            id: Uuid::new_v4(),
            post_id,
            parent_id: fields.parent_id,
            author: self.author(),
            content: fields.content,
            image: fields.image,
            like_count: 0,
            helpful_count: 0,
            liked: false,
            helpful: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.post_mut(post_id, |post| post.comment_count += 1)?;
        self.with_state(|state| state.comments.push(created.clone()));
        Ok(created)
    }

    async fn update_comment(&self, id: Uuid, content: &str) -> Result<Comment, RepoError> {
        self.enter("comments.update").await?;
        self.comment_mut(id, |comment| {
            comment.content = content.to_string();
            comment.clone()
        })
    }

    async fn delete_comment(&self, id: Uuid) -> Result<(), RepoError> {
        self.enter("comments.delete").await?;
        self.with_state(|state| {
            let Some(root) = state.comments.iter().find(|c| c.id == id).cloned() else {
                return Err(RepoError::NotFound);
            };
            let mut doomed = vec![id];
            let mut index = 0;
            while index < doomed.len() {
                let parent = doomed[index];
                doomed.extend(
                    state
                        .comments
                        .iter()
                        .filter(|c| c.parent_id == Some(parent))
                        .map(|c| c.id),
                );
                index += 1;
            }
            state.comments.retain(|c| !doomed.contains(&c.id));
            if let Some(post) = state.posts.iter_mut().find(|p| p.id == root.post_id) {
                post.comment_count = post.comment_count.saturating_sub(doomed.len() as u32);
            }
            Ok(())
        })
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError> {
        self.enter("comments.like").await?;
        self.comment_mut(id, |comment| {
            comment.toggle_like();
            LikeToggleResponse {
                liked: comment.liked,
                likes: comment.like_count,
            }
        })
    }

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError> {
        self.enter("comments.helpful").await?;
        self.comment_mut(id, |comment| {
            comment.toggle_helpful();
            HelpfulToggleResponse {
                helpful: comment.helpful,
                helpful_count: comment.helpful_count,
            }
        })
    }
}

#[async_trait]
impl NotificationsRepo for FakeBackend {
    async fn list_notifications(&self) -> Result<Vec<Notification>, RepoError> {
        self.enter("notifications.list").await?;
        Ok(self.with_state(|state| state.notifications.clone()))
    }

    async fn mark_read(&self, id: Uuid) -> Result<(), RepoError> {
        self.enter("notifications.read").await?;
        self.with_state(|state| {
            let notification = state
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or(RepoError::NotFound)?;
            notification.read = true;
            Ok(())
        })
    }

    async fn mark_all_read(&self) -> Result<MarkAllReadResponse, RepoError> {
        self.enter("notifications.read_all").await?;
        Ok(self.with_state(|state| {
            let mut count = 0;
            for notification in state.notifications.iter_mut().filter(|n| !n.read) {
                notification.read = true;
                count += 1;
            }
            MarkAllReadResponse { count }
        }))
    }

    async fn delete_notification(&self, id: Uuid) -> Result<(), RepoError> {
        self.enter("notifications.delete").await?;
        self.with_state(|state| {
            let before = state.notifications.len();
            state.notifications.retain(|n| n.id != id);
            if state.notifications.len() == before {
                Err(RepoError::NotFound)
            } else {
                Ok(())
            }
        })
    }
}

#[async_trait]
impl MediaStore for FakeBackend {
    async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, RepoError> {
        self.enter("media.upload").await?;
        let file_id = Uuid::new_v4().to_string();
        let uploaded = UploadedMedia {
            url: format!("https://cdn.test/{folder}/{}", file.file_name),
            file_id,
        };
        self.with_state(|state| state.uploads.push(uploaded.clone()));
        Ok(uploaded)
    }

    async fn delete(&self, file_id: &str) -> Result<(), RepoError> {
        self.enter("media.delete").await?;
        self.with_state(|state| state.deleted_files.push(file_id.to_string()));
        Ok(())
    }
}

/// Identity whose viewer the test switches at will.
#[derive(Default)]
pub struct FakeIdentity {
    viewer: RwLock<Option<Viewer>>,
}

impl FakeIdentity {
    pub fn signed_in(viewer: Viewer) -> Arc<Self> {
        Arc::new(Self {
            viewer: RwLock::new(Some(viewer)),
        })
    }

    pub fn sign_out(&self) {
        *self.viewer.write().expect("viewer") = None;
    }

    pub fn sign_in(&self, viewer: Viewer) {
        *self.viewer.write().expect("viewer") = Some(viewer);
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_viewer(&self) -> Option<Viewer> {
        self.viewer.read().expect("viewer").clone()
    }
}

/// One signed-in session wired to the fake server.
pub struct Harness {
    pub viewer: Viewer,
    pub backend: Arc<FakeBackend>,
    pub identity: Arc<FakeIdentity>,
    pub ctx: SyncContext,
    pub posts: Arc<PostActions>,
    pub comments: Arc<CommentActions>,
    pub notifications: Arc<NotificationCenter>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let viewer = viewer("ada");
        let backend = FakeBackend::new();
        backend.set_author(author_of(&viewer));
        let identity = FakeIdentity::signed_in(viewer.clone());
        let ctx = SyncContext::new(&config, identity.clone());
        Self {
            posts: Arc::new(PostActions::new(ctx.clone(), backend.clone(), backend.clone())),
            comments: Arc::new(CommentActions::new(ctx.clone(), backend.clone(), backend.clone())),
            notifications: Arc::new(NotificationCenter::new(ctx.clone(), backend.clone())),
            viewer,
            backend,
            identity,
            ctx,
        }
    }

    pub fn viewer_id(&self) -> Uuid {
        self.viewer.id
    }
}
