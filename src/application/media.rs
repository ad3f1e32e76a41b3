//! Image replacement policy shared by post and comment edits.
//!
//! Uploads happen before the speculative write so the cached entity can point
//! at the final URL. A failed write discards the fresh upload; a successful
//! replacement discards the file it replaced.

use std::sync::Arc;

use tracing::warn;

use crate::application::error::ActionError;
use crate::application::repos::{MediaStore, UploadedMedia};
use crate::domain::drafts::{ImageChange, ImagePlan};
use crate::domain::entities::ImageRef;

pub const POSTS_FOLDER: &str = "posts";
pub const COMMENTS_FOLDER: &str = "comments";

/// The resolved image change plus the upload it created, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedImage {
    pub change: ImageChange,
    pub uploaded: Option<UploadedMedia>,
}

pub async fn resolve(
    media: &Arc<dyn MediaStore>,
    plan: ImagePlan,
    folder: &str,
) -> Result<ResolvedImage, ActionError> {
    let resolved = match plan {
        ImagePlan::Keep => ResolvedImage {
            change: ImageChange::Keep,
            uploaded: None,
        },
        ImagePlan::Remove => ResolvedImage {
            change: ImageChange::Remove,
            uploaded: None,
        },
        ImagePlan::External(url) => ResolvedImage {
            change: ImageChange::Set(ImageRef { url, file_id: None }),
            uploaded: None,
        },
        ImagePlan::Upload(file) => {
            let uploaded = media.upload(file, folder).await?;
            ResolvedImage {
                change: ImageChange::Set(uploaded.clone().into()),
                uploaded: Some(uploaded),
            }
        }
    };
    Ok(resolved)
}

/// Delete a stored file without failing the surrounding action.
pub async fn discard(media: &Arc<dyn MediaStore>, file_id: &str) {
    if let Err(err) = media.delete(file_id).await {
        warn!(file_id, error = %err, "Failed to delete stored media");
    }
}

/// The stored file an applied change orphaned, if any.
pub fn replaced_file<'a>(previous: Option<&'a ImageRef>, change: &ImageChange) -> Option<&'a str> {
    let previous = previous?.file_id.as_deref()?;
    match change {
        ImageChange::Keep => None,
        ImageChange::Remove => Some(previous),
        ImageChange::Set(next) if next.file_id.as_deref() == Some(previous) => None,
        ImageChange::Set(_) => Some(previous),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(file_id: &str) -> ImageRef {
        ImageRef {
            url: format!("https://cdn.example/{file_id}"),
            file_id: Some(file_id.to_string()),
        }
    }

    #[test]
    fn replaced_file_only_for_owned_media_that_changed() {
        let old = stored("old");
        assert_eq!(replaced_file(Some(&old), &ImageChange::Keep), None);
        assert_eq!(replaced_file(Some(&old), &ImageChange::Remove), Some("old"));
        assert_eq!(
            replaced_file(Some(&old), &ImageChange::Set(stored("new"))),
            Some("old")
        );
        assert_eq!(replaced_file(Some(&old), &ImageChange::Set(stored("old"))), None);

        let external = ImageRef {
            url: "https://img.example/a.png".to_string(),
            file_id: None,
        };
        assert_eq!(replaced_file(Some(&external), &ImageChange::Remove), None);
        assert_eq!(replaced_file(None, &ImageChange::Remove), None);
    }
}
