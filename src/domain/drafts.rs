//! User-authored payloads for create and edit actions.
//!
//! Edits are partial: a field left as `None` keeps its cached value. Image
//! fields follow a fixed priority (new upload, then external URL, then the
//! previous image), and an explicit empty URL removes the image.

use bytes::Bytes;
use uuid::Uuid;

use super::entities::{Comment, ImageRef, Post};
use super::error::DomainError;

pub const MAX_POST_TAGS: usize = 10;

/// A file picked by the user, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// What an edit does to an entity's image once the priority rules are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePlan {
    Keep,
    Remove,
    Upload(MediaFile),
    External(String),
}

impl ImagePlan {
    /// Resolve the image fields of a form submission.
    ///
    /// `url == None` means the field was omitted; `Some("")` is an intentional removal.
    pub fn resolve(upload: Option<MediaFile>, url: Option<&str>) -> Self {
        if let Some(file) = upload {
            return ImagePlan::Upload(file);
        }
        match url.map(str::trim) {
            Some("") => ImagePlan::Remove,
            Some(url) => ImagePlan::External(url.to_string()),
            None => ImagePlan::Keep,
        }
    }
}

/// Final image value to write into cached entities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageChange {
    Keep,
    Remove,
    Set(ImageRef),
}

impl ImageChange {
    pub fn apply(&self, slot: &mut Option<ImageRef>) {
        match self {
            ImageChange::Keep => {}
            ImageChange::Remove => *slot = None,
            ImageChange::Set(image) => *slot = Some(image.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub description: String,
    pub content: String,
    pub code_snippet: Option<String>,
    pub tags: Vec<String>,
    pub image_upload: Option<MediaFile>,
    pub image_url: Option<String>,
}

impl NewPost {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_text("title", &self.title)?;
        require_text("content", &self.content)?;
        check_tags(&self.tags)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// `Some("")` clears the snippet.
    pub code_snippet: Option<String>,
    pub tags: Option<Vec<String>>,
    pub image_upload: Option<MediaFile>,
    /// `Some("")` removes the image; `None` leaves it alone.
    pub image_url: Option<String>,
}

impl PostEdit {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.is_empty() {
            return Err(DomainError::EmptyEdit);
        }
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        if let Some(content) = &self.content {
            require_text("content", content)?;
        }
        if let Some(tags) = &self.tags {
            check_tags(tags)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.content.is_none()
            && self.code_snippet.is_none()
            && self.tags.is_none()
            && self.image_upload.is_none()
            && self.image_url.is_none()
    }

    /// Apply the provided fields to a cached post; unspecified fields are untouched.
    pub fn apply_to(&self, post: &mut Post, image: &ImageChange) {
        if let Some(title) = &self.title {
            post.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            post.description = description.clone();
        }
        if let Some(content) = &self.content {
            post.content = content.clone();
        }
        if let Some(snippet) = &self.code_snippet {
            post.code_snippet = (!snippet.is_empty()).then(|| snippet.clone());
        }
        if let Some(tags) = &self.tags {
            post.tags = normalize_tags(tags);
        }
        image.apply(&mut post.image);
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewComment {
    pub content: String,
    pub parent_id: Option<Uuid>,
    pub image_upload: Option<MediaFile>,
    pub image_url: Option<String>,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), DomainError> {
        // An image-only comment is allowed.
        if self.content.trim().is_empty()
            && self.image_upload.is_none()
            && self.image_url.as_deref().is_none_or(|url| url.trim().is_empty())
        {
            return Err(DomainError::empty("content"));
        }
        Ok(())
    }

    /// Ensure the reply target is part of the same post's thread when the thread is loaded.
    pub fn check_parent(&self, loaded: Option<&[Comment]>) -> Result<(), DomainError> {
        match (self.parent_id, loaded) {
            (Some(parent), Some(comments)) if !comments.iter().any(|c| c.id == parent) => {
                Err(DomainError::ForeignParent { parent })
            }
            _ => Ok(()),
        }
    }
}

/// Lower-case, trim and de-duplicate tags while keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

fn require_text(field: &'static str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::empty(field));
    }
    Ok(())
}

fn check_tags(tags: &[String]) -> Result<(), DomainError> {
    let count = normalize_tags(tags).len();
    if count > MAX_POST_TAGS {
        return Err(DomainError::TooManyTags {
            max: MAX_POST_TAGS,
            count,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::fixtures;

    fn file() -> MediaFile {
        MediaFile {
            file_name: "shot.png".to_string(),
            content_type: Some("image/png".to_string()),
            bytes: Bytes::from_static(b"png"),
        }
    }

    #[test]
    fn upload_beats_external_url() {
        let plan = ImagePlan::resolve(Some(file()), Some("https://img.example/a.png"));
        assert!(matches!(plan, ImagePlan::Upload(_)));
    }

    #[test]
    fn external_url_beats_previous_value() {
        let plan = ImagePlan::resolve(None, Some("https://img.example/a.png"));
        assert_eq!(
            plan,
            ImagePlan::External("https://img.example/a.png".to_string())
        );
    }

    #[test]
    fn empty_url_removes_and_omitted_url_keeps() {
        assert_eq!(ImagePlan::resolve(None, Some("")), ImagePlan::Remove);
        assert_eq!(ImagePlan::resolve(None, Some("   ")), ImagePlan::Remove);
        assert_eq!(ImagePlan::resolve(None, None), ImagePlan::Keep);
    }

    #[test]
    fn edit_only_touches_provided_fields() {
        let mut post = fixtures::post("Original");
        post.description = "keep me".to_string();
        post.image = Some(ImageRef {
            url: "https://img.example/old.png".to_string(),
            file_id: Some("old".to_string()),
        });

        let edit = PostEdit {
            title: Some("  Renamed ".to_string()),
            tags: Some(vec!["Rust".to_string(), "rust".to_string(), "".to_string()]),
            ..Default::default()
        };
        edit.apply_to(&mut post, &ImageChange::Keep);

        assert_eq!(post.title, "Renamed");
        assert_eq!(post.description, "keep me");
        assert_eq!(post.tags, vec!["rust".to_string()]);
        assert_eq!(post.image.as_ref().map(|i| i.url.as_str()), Some("https://img.example/old.png"));
    }

    #[test]
    fn empty_edit_is_rejected() {
        assert_eq!(PostEdit::default().validate(), Err(DomainError::EmptyEdit));
    }

    #[test]
    fn blank_title_is_rejected() {
        let edit = PostEdit {
            title: Some(" ".to_string()),
            ..Default::default()
        };
        assert_eq!(edit.validate(), Err(DomainError::empty("title")));
    }

    #[test]
    fn too_many_tags_is_rejected() {
        let draft = NewPost {
            title: "t".to_string(),
            content: "c".to_string(),
            tags: (0..11).map(|i| format!("tag{i}")).collect(),
            ..Default::default()
        };
        assert!(matches!(
            draft.validate(),
            Err(DomainError::TooManyTags { count: 11, .. })
        ));
    }

    #[test]
    fn reply_to_unknown_parent_is_rejected_when_thread_loaded() {
        let post_id = Uuid::new_v4();
        let existing = vec![fixtures::comment(post_id, None, "root")];
        let reply = NewComment {
            content: "hi".to_string(),
            parent_id: Some(Uuid::new_v4()),
            ..Default::default()
        };

        assert!(reply.check_parent(Some(&existing)).is_err());
        assert!(reply.check_parent(None).is_ok());
    }
}
