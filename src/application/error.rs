use std::error::Error as StdError;

use serde::Serialize;
use thiserror::Error;

use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

/// Failure of one user action, as reported to the presentation layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("sign in to continue")]
    NotAuthenticated,
    #[error("you do not have permission to do that")]
    NotAuthorized,
    #[error("this item no longer exists")]
    NotFound,
    #[error("{0}")]
    Conflict(String),
    #[error("network problem: {0}")]
    Transient(String),
}

impl ActionError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// The single notice shown for this failure.
    pub fn notice(&self) -> Notice {
        let level = match self {
            ActionError::NotAuthenticated => NoticeLevel::Prompt,
            ActionError::NotAuthorized => NoticeLevel::Blocking,
            ActionError::NotFound | ActionError::Conflict(_) | ActionError::Transient(_) => {
                NoticeLevel::Error
            }
        };
        Notice {
            level,
            message: self.to_string(),
        }
    }

    /// Whether re-invoking the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ActionError::Transient(_))
    }
}

impl From<RepoError> for ActionError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Unauthenticated => ActionError::NotAuthenticated,
            RepoError::Forbidden => ActionError::NotAuthorized,
            RepoError::NotFound => ActionError::NotFound,
            RepoError::Rejected { message } => ActionError::Conflict(message),
            RepoError::Transient(message) => ActionError::Transient(message),
        }
    }
}

impl From<DomainError> for ActionError {
    fn from(err: DomainError) -> Self {
        ActionError::Conflict(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    /// Ask the user to sign in; not a failure toast.
    Prompt,
    /// Block the action with an explanation.
    Blocking,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Error chain flattened for logging and terminal output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn summary(&self) -> String {
        self.messages.join(": ")
    }
}

/// Errors surfaced by the `devlog` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{}", .0.notice().message)]
    Action(#[from] ActionError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 2,
            AppError::Action(ActionError::NotAuthenticated) => 3,
            AppError::Action(ActionError::NotAuthorized) => 4,
            AppError::Action(ActionError::NotFound) => 5,
            AppError::Action(_) | AppError::Infra(_) | AppError::Unexpected(_) => 1,
        }
    }
}
