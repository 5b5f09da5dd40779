//! Prompt-only dataset handling for palign.
//!
//! This crate provides:
//! - Raw record loading from JSON, JSONL, Parquet, and dataset directories
//! - Prompt templates and chat formats for rendering records
//! - Tokenizer integration
//! - A prompt-only dataset with prompt deduplication
//! - Left-padding collation into batches with attention masks
//! - A DataLoader for iterating batches

#![warn(missing_docs)]

pub mod chat_templates;
pub mod collator;
pub mod dataloader;
pub mod padding;
pub mod prompt_only;
pub mod source;
pub mod template;
pub mod tokenizer;

#[cfg(test)]
mod testing;

pub use chat_templates::{detect_template_from_model, ChatTemplate, ChatTemplateType, Message};
pub use collator::*;
pub use dataloader::*;
pub use padding::*;
pub use prompt_only::*;
pub use source::*;
pub use template::*;
pub use tokenizer::*;
