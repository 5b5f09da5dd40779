//! HuggingFace Hub integration for palign.
//!
//! This crate provides:
//! - Dataset file downloads for a split
//! - Tokenizer downloads
//! - Local cache management

#![warn(missing_docs)]

mod cache;
mod download;

pub use cache::*;
pub use download::*;
