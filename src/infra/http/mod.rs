//! HTTP collaborators for the remote blog API.

mod backend;
mod client;
mod session;

pub use backend::{HttpBackend, list_query};
pub use client::{ApiClient, status_error};
pub use session::SessionIdentity;
