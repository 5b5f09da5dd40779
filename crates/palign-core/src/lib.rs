//! Core types, configuration, and error handling for palign.
//!
//! This crate provides the foundational pieces shared by the data, hub, and
//! CLI crates:
//!
//! - The [`PAlignError`] type and [`Result`] alias
//! - Configuration for prompt-only datasets and batch loading
//! - Device resolution for collated batches
//! - Redacted handling of Hub tokens

#![warn(missing_docs)]

mod config;
mod error;
mod secrets;
mod types;

pub use config::*;
pub use error::*;
pub use secrets::SecretString;
pub use types::*;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{PAlignError, Result};
    pub use crate::secrets::SecretString;
    pub use crate::types::*;
}
