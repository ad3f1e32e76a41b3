//! Shared domain enumerations aligned with the remote API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Helpful,
    Comment,
    CommentLike,
    CommentHelpful,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::Like => "like",
            NotificationKind::Helpful => "helpful",
            NotificationKind::Comment => "comment",
            NotificationKind::CommentLike => "comment_like",
            NotificationKind::CommentHelpful => "comment_helpful",
        }
    }
}

/// Entity families held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Post,
    PostList,
    SavedPosts,
    Comments,
    Notifications,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Post => "post",
            EntityKind::PostList => "post_list",
            EntityKind::SavedPosts => "saved_posts",
            EntityKind::Comments => "comments",
            EntityKind::Notifications => "notifications",
        }
    }
}
