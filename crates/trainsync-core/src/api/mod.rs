//! API implementation submodules.
//!
//! Each submodule contains `impl TrainsyncApi` blocks that extend the public
//! API. The struct definition remains in `lib.rs`.

mod builder;
mod state;
mod training;
mod versions;

pub use builder::TrainsyncApiBuilder;
pub(crate) use state::ApiState;
