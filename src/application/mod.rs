//! Action services and the collaborator seams they depend on.

pub mod comments;
pub mod context;
pub mod error;
pub mod media;
pub mod notifications;
pub mod posts;
pub mod repos;

pub use comments::CommentActions;
pub use context::SyncContext;
pub use notifications::{NotificationCenter, PollingHandle};
pub use posts::PostActions;
