//! REST implementations of every collaborator trait.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::multipart::{Form, Part};
use uuid::Uuid;

use devlog_api_types::{
    CreateCommentRequest, CreatePostRequest, HelpfulToggleResponse, LikeToggleResponse,
    MarkAllReadResponse, ReportRequest, SaveResponse, UpdateCommentRequest, UpdatePostRequest,
    UploadResponse,
};

use crate::application::repos::{
    CommentFields, CommentsRepo, MediaStore, NotificationsRepo, PostFields, PostPatch, PostsRepo,
    RepoError, UploadedMedia,
};
use crate::cache::ListFilter;
use crate::domain::drafts::MediaFile;
use crate::domain::entities::{Comment, Notification, Post};

use super::client::ApiClient;

/// Every collaborator backed by one API client.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Arc<ApiClient>,
}

impl HttpBackend {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }
}

/// Query pairs for a feed request.
pub fn list_query(filter: &ListFilter) -> Vec<(&'static str, String)> {
    let mut query: Vec<(&'static str, String)> = filter
        .tags()
        .map(|tag| ("tag", tag.to_string()))
        .collect();
    if let Some(search) = filter.search_text() {
        query.push(("search", search.to_string()));
    }
    if let Some(author) = filter.author_id() {
        query.push(("author", author.to_string()));
    }
    query
}

fn create_post_body(fields: PostFields) -> CreatePostRequest {
    let (image_url, image_file_id) = match fields.image {
        Some(image) => (Some(image.url), image.file_id),
        None => (None, None),
    };
    CreatePostRequest {
        title: fields.title,
        description: fields.description,
        content: fields.content,
        code_snippet: fields.code_snippet,
        tags: fields.tags,
        image_url,
        image_file_id,
    }
}

/// An explicit image removal is sent as an empty URL.
fn update_post_body(patch: PostPatch) -> UpdatePostRequest {
    let (image_url, image_file_id) = match patch.image {
        None => (None, None),
        Some(None) => (Some(String::new()), None),
        Some(Some(image)) => (Some(image.url), image.file_id),
    };
    UpdatePostRequest {
        title: patch.title,
        description: patch.description,
        content: patch.content,
        code_snippet: patch.code_snippet,
        tags: patch.tags,
        image_url,
        image_file_id,
    }
}

#[async_trait]
impl PostsRepo for HttpBackend {
    async fn list_posts(&self, filter: &ListFilter) -> Result<Vec<Post>, RepoError> {
        self.client.get("api/posts", &list_query(filter)).await
    }

    async fn get_post(&self, id: Uuid) -> Result<Post, RepoError> {
        self.client.get(&format!("api/posts/{id}"), &[]).await
    }

    async fn create_post(&self, fields: PostFields) -> Result<Post, RepoError> {
        self.client
            .send_json(Method::POST, "api/posts", Some(&create_post_body(fields)))
            .await
    }

    async fn update_post(&self, id: Uuid, patch: PostPatch) -> Result<Post, RepoError> {
        self.client
            .send_json(
                Method::PATCH,
                &format!("api/posts/{id}"),
                Some(&update_post_body(patch)),
            )
            .await
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        self.client
            .send_unit::<()>(Method::DELETE, &format!("api/posts/{id}"), None)
            .await
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, &format!("api/posts/{id}/like"), None)
            .await
    }

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, &format!("api/posts/{id}/helpful"), None)
            .await
    }

    async fn save_post(&self, id: Uuid) -> Result<SaveResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, &format!("api/posts/{id}/save"), None)
            .await
    }

    async fn unsave_post(&self, id: Uuid) -> Result<SaveResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::DELETE, &format!("api/posts/{id}/save"), None)
            .await
    }

    async fn list_saved_posts(&self) -> Result<Vec<Post>, RepoError> {
        self.client.get("api/posts/saved", &[]).await
    }

    async fn report_post(&self, id: Uuid, reason: &str) -> Result<(), RepoError> {
        let body = ReportRequest {
            reason: reason.to_string(),
        };
        self.client
            .send_unit(Method::POST, &format!("api/posts/{id}/report"), Some(&body))
            .await
    }
}

#[async_trait]
impl CommentsRepo for HttpBackend {
    async fn list_comments(&self, post_id: Uuid) -> Result<Vec<Comment>, RepoError> {
        self.client
            .get(&format!("api/posts/{post_id}/comments"), &[])
            .await
    }

    async fn create_comment(
        &self,
        post_id: Uuid,
        fields: CommentFields,
    ) -> Result<Comment, RepoError> {
        let (image_url, image_file_id) = match fields.image {
            Some(image) => (Some(image.url), image.file_id),
            None => (None, None),
        };
        let body = CreateCommentRequest {
            content: fields.content,
            parent_id: fields.parent_id,
            image_url,
            image_file_id,
        };
        self.client
            .send_json(
                Method::POST,
                &format!("api/posts/{post_id}/comments"),
                Some(&body),
            )
            .await
    }

    async fn update_comment(&self, id: Uuid, content: &str) -> Result<Comment, RepoError> {
        let body = UpdateCommentRequest {
            content: content.to_string(),
        };
        self.client
            .send_json(Method::PATCH, &format!("api/comments/{id}"), Some(&body))
            .await
    }

    async fn delete_comment(&self, id: Uuid) -> Result<(), RepoError> {
        self.client
            .send_unit::<()>(Method::DELETE, &format!("api/comments/{id}"), None)
            .await
    }

    async fn toggle_like(&self, id: Uuid) -> Result<LikeToggleResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, &format!("api/comments/{id}/like"), None)
            .await
    }

    async fn toggle_helpful(&self, id: Uuid) -> Result<HelpfulToggleResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, &format!("api/comments/{id}/helpful"), None)
            .await
    }
}

#[async_trait]
impl NotificationsRepo for HttpBackend {
    async fn list_notifications(&self) -> Result<Vec<Notification>, RepoError> {
        self.client.get("api/notifications", &[]).await
    }

    async fn mark_read(&self, id: Uuid) -> Result<(), RepoError> {
        self.client
            .send_unit::<()>(Method::POST, &format!("api/notifications/{id}/read"), None)
            .await
    }

    async fn mark_all_read(&self) -> Result<MarkAllReadResponse, RepoError> {
        self.client
            .send_json::<(), _>(Method::POST, "api/notifications/read-all", None)
            .await
    }

    async fn delete_notification(&self, id: Uuid) -> Result<(), RepoError> {
        self.client
            .send_unit::<()>(Method::DELETE, &format!("api/notifications/{id}"), None)
            .await
    }
}

#[async_trait]
impl MediaStore for HttpBackend {
    async fn upload(&self, file: MediaFile, folder: &str) -> Result<UploadedMedia, RepoError> {
        let content_type = file.content_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&file.file_name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        let part = Part::bytes(file.bytes.to_vec())
            .file_name(file.file_name)
            .mime_str(&content_type)
            .map_err(|err| RepoError::rejected(format!("invalid content type: {err}")))?;
        let form = Form::new()
            .part("file", part)
            .text("folder", folder.to_string());
        let uploaded: UploadResponse = self.client.send_multipart("api/upload", form).await?;
        Ok(UploadedMedia {
            url: uploaded.url,
            file_id: uploaded.file_id,
        })
    }

    async fn delete(&self, file_id: &str) -> Result<(), RepoError> {
        self.client
            .send_unit::<()>(Method::DELETE, &format!("api/upload/{file_id}"), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::ImageRef;

    #[test]
    fn list_query_carries_canonical_filter() {
        let author = Uuid::new_v4();
        let filter = ListFilter::new(None)
            .tag(" Rust ")
            .tag("async")
            .search("  Borrow ")
            .author(author);
        let query = list_query(&filter);

        assert_eq!(
            query,
            vec![
                ("tag", "async".to_string()),
                ("tag", "rust".to_string()),
                ("search", "borrow".to_string()),
                ("author", author.to_string()),
            ]
        );
    }

    #[test]
    fn image_removal_is_sent_as_empty_url() {
        let body = update_post_body(PostPatch {
            image: Some(None),
            ..Default::default()
        });
        assert_eq!(body.image_url.as_deref(), Some(""));
        assert_eq!(body.image_file_id, None);

        let body = update_post_body(PostPatch {
            image: Some(Some(ImageRef {
                url: "https://cdn.example/a.png".to_string(),
                file_id: Some("a".to_string()),
            })),
            ..Default::default()
        });
        assert_eq!(body.image_url.as_deref(), Some("https://cdn.example/a.png"));
        assert_eq!(body.image_file_id.as_deref(), Some("a"));

        let body = update_post_body(PostPatch::default());
        assert_eq!(body.image_url, None);
    }
}
