//! Optimistic cache synchronization for a developer-blog client.
//!
//! Every cached view of a post, comment thread or notification list is kept
//! consistent while mutations are in flight: writes are applied speculatively,
//! propagated to every view holding the entity, then reconciled with the
//! server's answer or rolled back.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
