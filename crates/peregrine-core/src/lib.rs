//! `peregrine-core` — shared domain types, configuration, and errors.
//!
//! Everything here is plain data: the records the store persists, the
//! candidates the pipeline produces, and the config every other crate
//! reads. No I/O lives in this crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::PeregrineConfig;
pub use error::{PeregrineError, Result};
