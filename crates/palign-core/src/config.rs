//! Configuration types for palign.

use crate::{PAlignError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prompt-only dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptOnlyConfig {
    /// Dataset location: a `.json`/`.jsonl`/`.parquet` file, a local directory,
    /// or a HuggingFace dataset identifier.
    pub path: String,

    /// Name of the prompt template used to render records.
    pub template: String,

    /// Dataset configuration name (HuggingFace subset).
    #[serde(default)]
    pub name: Option<String>,

    /// Keep only the first `size` records after deduplication.
    #[serde(default)]
    pub size: Option<usize>,

    /// Dataset split to load.
    #[serde(default)]
    pub split: Option<String>,

    /// Explicit data files, loaded in order instead of scanning `path`.
    #[serde(default)]
    pub data_files: Vec<String>,

    /// Extra `key=value` options forwarded to the record loader.
    #[serde(default)]
    pub optional_args: Vec<String>,

    /// Render prompts through the chat template.
    #[serde(default = "default_true")]
    pub apply_chat_template: bool,

    /// Chat format name (e.g. "chatml", "llama3"). Detected when unset.
    #[serde(default)]
    pub chat_format: Option<String>,

    /// Maximum tokenized length. Falls back to the tokenizer's limit.
    #[serde(default)]
    pub max_length: Option<usize>,

    /// Hub revision used when `path` is a dataset identifier.
    #[serde(default)]
    pub revision: Option<String>,
}

impl Default for PromptOnlyConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            template: String::new(),
            name: None,
            size: None,
            split: None,
            data_files: Vec::new(),
            optional_args: Vec::new(),
            apply_chat_template: true,
            chat_format: None,
            max_length: None,
            revision: None,
        }
    }
}

impl PromptOnlyConfig {
    /// Create a configuration for a dataset path and template name.
    pub fn new(path: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
            ..Default::default()
        }
    }

    /// Set the split.
    #[must_use]
    pub fn with_split(mut self, split: impl Into<String>) -> Self {
        self.split = Some(split.into());
        self
    }

    /// Set the maximum number of records kept.
    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Enable or disable chat template rendering.
    #[must_use]
    pub fn with_apply_chat_template(mut self, apply: bool) -> Self {
        self.apply_chat_template = apply;
        self
    }

    /// Check the required fields.
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(PAlignError::Config(format!(
                "You must set a valid dataset path, got {:?}",
                self.path
            )));
        }
        if self.template.trim().is_empty() {
            return Err(PAlignError::Config(format!(
                "You must set a valid template name, got {:?}",
                self.template
            )));
        }
        if self.max_length == Some(0) {
            return Err(PAlignError::Config(
                "max_length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }
}

fn default_true() -> bool {
    true
}
