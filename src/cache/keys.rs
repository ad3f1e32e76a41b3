//! Cache key definitions.
//!
//! A key pairs an entity kind with a discriminator: an entity id for single
//! views, or a canonicalized filter for list views. Every key that carries
//! viewer-relative flags (`liked`, `helpful`, `saved`) includes the viewer.

use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use crate::domain::entities::Post;
use crate::domain::types::EntityKind;

/// Filter parameters of a post list view, canonicalized on construction.
///
/// Tags are trimmed, lower-cased and kept in a sorted set; search text is
/// trimmed and lower-cased, and an empty search is the same as no search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ListFilter {
    tags: BTreeSet<String>,
    search: Option<String>,
    author: Option<Uuid>,
    viewer: Option<Uuid>,
}

impl ListFilter {
    pub fn new(viewer: Option<Uuid>) -> Self {
        Self {
            viewer,
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() {
            self.tags.insert(tag);
        }
        self
    }

    pub fn search(mut self, text: &str) -> Self {
        let text = text.trim().to_lowercase();
        self.search = (!text.is_empty()).then_some(text);
        self
    }

    pub fn author(mut self, author: Uuid) -> Self {
        self.author = Some(author);
        self
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }

    pub fn search_text(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn author_id(&self) -> Option<Uuid> {
        self.author
    }

    pub fn viewer(&self) -> Option<Uuid> {
        self.viewer
    }

    pub fn is_unfiltered(&self) -> bool {
        self.tags.is_empty() && self.search.is_none() && self.author.is_none()
    }

    /// Whether a post belongs in this list. Only used when inserting a newly
    /// created post; existing entries are found by scanning, never by filter.
    pub fn admits(&self, post: &Post) -> bool {
        self.tags.iter().all(|tag| post.has_tag(tag))
            && self.search.as_deref().is_none_or(|s| post.matches_search(s))
            && self.author.is_none_or(|author| post.author.id == author)
    }
}

/// Identifies one cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A single post as seen by a viewer (or anonymously).
    Post { id: Uuid, viewer: Option<Uuid> },
    /// A filtered post feed.
    PostList(ListFilter),
    /// The viewer's saved posts.
    SavedPosts { viewer: Uuid },
    /// The flat comment collection of a post.
    Comments { post_id: Uuid, viewer: Option<Uuid> },
    /// The viewer's notifications.
    Notifications { viewer: Uuid },
}

impl CacheKey {
    pub fn post(id: Uuid, viewer: Option<Uuid>) -> Self {
        Self::Post { id, viewer }
    }

    pub fn comments(post_id: Uuid, viewer: Option<Uuid>) -> Self {
        Self::Comments { post_id, viewer }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            CacheKey::Post { .. } => EntityKind::Post,
            CacheKey::PostList(_) => EntityKind::PostList,
            CacheKey::SavedPosts { .. } => EntityKind::SavedPosts,
            CacheKey::Comments { .. } => EntityKind::Comments,
            CacheKey::Notifications { .. } => EntityKind::Notifications,
        }
    }

    pub fn viewer(&self) -> Option<Uuid> {
        match self {
            CacheKey::Post { viewer, .. } | CacheKey::Comments { viewer, .. } => *viewer,
            CacheKey::PostList(filter) => filter.viewer(),
            CacheKey::SavedPosts { viewer } | CacheKey::Notifications { viewer } => Some(*viewer),
        }
    }

    /// True for the keys that hold collections of posts.
    pub fn is_post_collection(&self) -> bool {
        matches!(self, CacheKey::PostList(_) | CacheKey::SavedPosts { .. })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let viewer = |v: Option<Uuid>| v.map_or_else(|| "anon".to_string(), |v| v.to_string());
        match self {
            CacheKey::Post { id, viewer: v } => write!(f, "post:{id}@{}", viewer(*v)),
            CacheKey::PostList(filter) => {
                write!(f, "posts:")?;
                let tags: Vec<&str> = filter.tags().collect();
                write!(
                    f,
                    "tags=[{}],search={},author={}@{}",
                    tags.join(","),
                    filter.search_text().unwrap_or(""),
                    filter.author_id().map(|a| a.to_string()).unwrap_or_default(),
                    viewer(filter.viewer())
                )
            }
            CacheKey::SavedPosts { viewer: v } => write!(f, "saved@{v}"),
            CacheKey::Comments { post_id, viewer: v } => {
                write!(f, "comments:{post_id}@{}", viewer(*v))
            }
            CacheKey::Notifications { viewer: v } => write!(f, "notifications@{v}"),
        }
    }
}

/// Selects entries for invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    Exact(CacheKey),
    Kind(EntityKind),
    /// Every single-post key for this id, whatever the viewer.
    PostId(Uuid),
    All,
}

impl KeySelector {
    pub fn matches(&self, key: &CacheKey) -> bool {
        match self {
            KeySelector::Exact(exact) => exact == key,
            KeySelector::Kind(kind) => key.kind() == *kind,
            KeySelector::PostId(id) => matches!(key, CacheKey::Post { id: candidate, .. } if candidate == id),
            KeySelector::All => true,
        }
    }
}
