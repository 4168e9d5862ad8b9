//! Shared data model, error classification and retry plumbing used by every
//! component of the workflow scheduling and validation engine.

pub mod backoff;
pub mod error;
pub mod model;
pub mod time;

pub use error::{ErrorClass, EngineError};
pub use model::*;
