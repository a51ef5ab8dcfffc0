//! Job submission: reserve a version name, hand the run to the provider,
//! record it as pending.

mod policy;
mod service;

pub use policy::{DefaultHyperparameterPolicy, HyperparameterPolicy};
pub use service::{JobSubmitter, SubmitRequest, SubmittedVersion};
