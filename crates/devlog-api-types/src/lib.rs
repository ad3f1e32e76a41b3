//! Wire payloads for the developer-blog REST API.
//!
//! Entities themselves (posts, comments, notifications) are decoded by the
//! client crate; this crate only carries the request bodies and the small
//! acknowledgement shapes returned by toggle and bulk endpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeToggleResponse {
    pub liked: bool,
    #[serde(alias = "likeCount")]
    pub likes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelpfulToggleResponse {
    pub helpful: bool,
    pub helpful_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub saved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAllReadResponse {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionResponse {
    #[serde(default)]
    pub user: Option<SessionUser>,
}

/// Body of a post creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    pub description: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_id: Option<String>,
}

/// Body of a partial post update.
///
/// Omitted fields are left untouched by the server. `image_url` set to an
/// empty string removes the current image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentRequest {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCommentRequest {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub reason: String,
}

/// Error body returned alongside non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default, alias = "message")]
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_toggle_accepts_comment_field_name() {
        let post: LikeToggleResponse =
            serde_json::from_str(r#"{"liked":true,"likes":4}"#).expect("post toggle");
        let comment: LikeToggleResponse =
            serde_json::from_str(r#"{"liked":false,"likeCount":2}"#).expect("comment toggle");

        assert_eq!(post.likes, 4);
        assert_eq!(comment.likes, 2);
        assert!(!comment.liked);
    }

    #[test]
    fn update_request_omits_unset_fields() {
        let body = UpdatePostRequest {
            title: Some("New".to_string()),
            image_url: Some(String::new()),
            ..Default::default()
        };
        let value = serde_json::to_value(&body).expect("serialize");

        assert_eq!(value["title"], "New");
        assert_eq!(value["imageUrl"], "");
        assert!(value.get("content").is_none());
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn error_body_reads_message_alias() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"message":"Post not found"}"#).expect("error body");
        assert_eq!(body.error, "Post not found");
    }
}
