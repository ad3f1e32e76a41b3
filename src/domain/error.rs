use thiserror::Error;
use uuid::Uuid;

/// Payload problems caught locally, before any speculative write or network call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("`{field}` must not be empty")]
    EmptyField { field: &'static str },
    #[error("a post carries at most {max} tags (got {count})")]
    TooManyTags { max: usize, count: usize },
    #[error("reply target `{parent}` is not a comment of this post")]
    ForeignParent { parent: Uuid },
    #[error("edit contains no changes")]
    EmptyEdit,
}

impl DomainError {
    pub fn empty(field: &'static str) -> Self {
        Self::EmptyField { field }
    }
}
