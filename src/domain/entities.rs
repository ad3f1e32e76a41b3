//! Domain entities mirrored from the remote persistence service.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::NotificationKind;

/// The signed-in user a set of cached views belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Lightweight reference to a user embedded in posts, comments and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// Media attached to a post or comment.
///
/// `file_id` is present when the media store owns the file and is needed to
/// delete it; externally hosted images only carry a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub url: String,
    #[serde(default)]
    pub file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub author: AuthorRef,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub helpful_count: u32,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub helpful: bool,
    #[serde(default)]
    pub saved: bool,
    #[serde(default)]
    pub comment_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Post {
    /// Flip the viewer's like and move the count with it.
    pub fn toggle_like(&mut self) {
        toggle_counter(&mut self.liked, &mut self.likes);
    }

    /// Flip the viewer's helpful mark and move the count with it.
    pub fn toggle_helpful(&mut self) {
        toggle_counter(&mut self.helpful, &mut self.helpful_count);
    }

    pub fn is_authored_by(&self, viewer: &Viewer) -> bool {
        self.author.id == viewer.id
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate.trim().eq_ignore_ascii_case(tag))
    }

    /// Case-insensitive containment over the searchable text fields.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        [&self.title, &self.description, &self.content]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    pub author: AuthorRef,
    pub content: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default, alias = "likes")]
    pub like_count: u32,
    #[serde(default)]
    pub helpful_count: u32,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub helpful: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Comment {
    pub fn toggle_like(&mut self) {
        toggle_counter(&mut self.liked, &mut self.like_count);
    }

    pub fn toggle_helpful(&mut self) {
        toggle_counter(&mut self.helpful, &mut self.helpful_count);
    }

    pub fn is_authored_by(&self, viewer: &Viewer) -> bool {
        self.author.id == viewer.id
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default)]
    pub post_id: Option<Uuid>,
    #[serde(default)]
    pub comment_id: Option<Uuid>,
    pub actor: AuthorRef,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Toggle a viewer flag and keep its counter in step; the counter never drops below zero.
fn toggle_counter(flag: &mut bool, count: &mut u32) {
    if *flag {
        *flag = false;
        *count = count.saturating_sub(1);
    } else {
        *flag = true;
        *count = count.saturating_add(1);
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn author(name: &str) -> AuthorRef {
        AuthorRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image: None,
        }
    }

    pub fn post(title: &str) -> Post {
        Post {
            id: Uuid::new_v4(),
            author: author("ada"),
            title: title.to_string(),
            description: String::new(),
            content: String::new(),
            code_snippet: None,
            tags: Vec::new(),
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
            author: author("grace"),
            content: content.to_string(),
            image: None,
            like_count: 0,
            helpful_count: 0,
            liked: false,
            helpful: false,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }
}
