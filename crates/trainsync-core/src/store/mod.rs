//! Registry persistence.
//!
//! This module provides:
//! - Atomic JSON file operations
//! - The per-entity registry store and its load/mutate/save critical section

mod atomic;
mod registry_store;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use registry_store::RegistryStore;
