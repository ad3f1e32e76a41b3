//! Collaborator traits describing the remote services the engine talks to.
//!
//! Each call either returns the authoritative value or a typed failure; the
//! engine never retries on its own.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use devlog_api_types::{
    HelpfulToggleResponse, LikeToggleResponse, MarkAllReadResponse, SaveResponse,
};

use crate::cache::ListFilter;
use crate::domain::drafts::MediaFile;
use crate::domain::entities::{Comment, ImageRef, Notification, Post, Viewer};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("permission denied")]
    Forbidden,
    #[error("resource not found")]
    NotFound,
    #[error("request rejected: {message}")]
    Rejected { message: String },
    #[error("service unavailable: {0}")]
    Transient(String),
}

impl RepoError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn transient(err: impl std::fmt::Display) -> Self {
        Self::Transient(err.to_string())
    }
}

/// Fields sent when creating a post. The image is already uploaded or external.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFields {
    pub title: String,
    pub description: String,
    pub content: String,
    pub code_snippet: Option<String>,
    pub tags: Vec<String>,
    pub image: Option<ImageRef>,
}

/// Partial post update; `None` fields are not sent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    pub code_snippet: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` removes the image.
    pub image: Option<Option<ImageRef>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentFields {
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub image: Option<ImageRef>,
}

/// Result of a media upload, attached verbatim to later writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedMedia {
    pub url: String,
    pub file_id: String,
}

impl From<UploadedMedia> for ImageRef {
    fn from(media: UploadedMedia) -> Self {
        ImageRef {
            url: media.url,
            file_id: Some(media.file_id),
        }
    }
}

#[async_trait]
pub trait PostsRepo: Send + Sync {
    async fn list_posts(&self, filter: &ListFilter) -> Result<Vec<Post>, RepoError>;

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError>;

    async fn create_post(&self, fields: PostFields) -> Result<Post, RepoError>;

    async fn update_post(&self, id: Uuid, patch: PostPatch) -> Result<Post, RepoError>;

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError>;

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError>;

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError>;

    async fn save_post(&self, id: Uuid) -> Result<SaveResponse, RepoError>;

    async fn unsave_post(&self, id: Uuid) -> Result<SaveResponse, RepoError>;

    async fn list_saved_posts(&self) -> Result<Vec<Post>, RepoError>;

    async fn report_post(&self, id: Uuid, reason: &str) -> Result<(), RepoError>;
}

#[async_trait]
pub trait CommentsRepo: Send + Sync {
    async fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>, RepoError>;

    async fn create_comment(&self, post_id: Uuid, fields: CommentFields)
    -> Result<Comment, RepoError>;

    async fn update_comment(&self, id: Uuid, content: &str) -> Result<Comment, RepoError>;

    async fn delete_comment(&self, id: Uuid) -> Result<(), RepoError>;

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError>;

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError>;
}

#[async_trait]
pub trait NotificationsRepo: Send + Sync {
    async fn list_notifications(&self) -> Result<Vec<Notification>, RepoError>;

    async fn mark_read(&self, id: Uuid) -> Result<(), RepoError>;

    async fn mark_all_read(&self) -> Result<MarkAllReadResponse, RepoError>;

    async fn delete_notification(&self, id: Uuid) -> Result<(), RepoError>;
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn current_viewer(&self) -> Option<Viewer>;
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, RepoError>;

    async fn delete(&self, file_id: &str) -> Result<(), RepoError>;
}
