//! Data models for the training registry.
//!
//! These serialize to the camelCase JSON the registry documents and the
//! frontend already use.

mod entity;
mod version;

pub use entity::*;
pub use version::*;
