//! Domain layer types and invariants.

pub mod drafts;
pub mod entities;
pub mod error;
pub mod types;
