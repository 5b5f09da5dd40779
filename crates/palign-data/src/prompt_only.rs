//! Prompt-only dataset: load, deduplicate, and tokenize prompts.

use crate::chat_templates::{ChatTemplate, ChatTemplateType};
use crate::collator::PromptOnlyCollator;
use crate::source::{load_records, LoadRequest, LocalLoader, RawSample, RecordLoader};
use crate::template::{PromptTemplate, TemplateRegistry};
use crate::tokenizer::{PaddingStrategy, TokenizeOptions, Tokenizer, TruncationStrategy};
use palign_core::{PAlignError, PromptOnlyConfig, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// A tokenized prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOnlySample {
    /// Prompt token IDs, ending with EOS.
    pub input_ids: Vec<u32>,
}

impl PromptOnlySample {
    /// Create a sample from token IDs.
    pub fn new(input_ids: Vec<u32>) -> Self {
        Self { input_ids }
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    /// Check if the sample has no tokens.
    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Settings applied after records are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptOnlyOptions {
    /// Render through the chat template.
    pub apply_chat_template: bool,
    /// Token limit; `None` uses the tokenizer's `model_max_length`.
    pub max_length: Option<usize>,
    /// Keep only the first `size` unique records.
    pub size: Option<usize>,
}

impl Default for PromptOnlyOptions {
    fn default() -> Self {
        Self {
            apply_chat_template: true,
            max_length: None,
            size: None,
        }
    }
}

impl From<&PromptOnlyConfig> for PromptOnlyOptions {
    fn from(config: &PromptOnlyConfig) -> Self {
        Self {
            apply_chat_template: config.apply_chat_template,
            max_length: config.max_length,
            size: config.size,
        }
    }
}

/// Drop records whose rendered prompt was already seen.
///
/// The first occurrence wins and the input order is kept.
pub fn remove_duplicate_prompts(
    records: Vec<RawSample>,
    template: &dyn PromptTemplate,
    apply_chat_template: bool,
) -> Result<Vec<RawSample>> {
    let mut seen_prompts = HashSet::with_capacity(records.len());
    let mut unique = Vec::with_capacity(records.len());

    for record in records {
        let prompt = template
            .format_prompt_only_sample(&record, apply_chat_template)?
            .text;
        if seen_prompts.insert(prompt) {
            unique.push(record);
        }
    }

    Ok(unique)
}

/// Dataset of prompt-only samples, tokenized on access.
pub struct PromptOnlyDataset {
    tokenizer: Arc<Tokenizer>,
    template: Arc<dyn PromptTemplate>,
    raw_data: Vec<RawSample>,
    options: PromptOnlyOptions,
    eos_token: String,
    eos_token_id: u32,
}

impl PromptOnlyDataset {
    /// Load a dataset described by `config`.
    ///
    /// The template is resolved by name from the built-in registry, rendered
    /// with `config.chat_format` (ChatML when unset), and records are read from
    /// local files.
    pub fn new(config: &PromptOnlyConfig, tokenizer: Arc<Tokenizer>) -> Result<Self> {
        config.validate()?;
        let chat = match config.chat_format.as_deref() {
            Some(format) => ChatTemplate::new(format.parse::<ChatTemplateType>()?),
            None => ChatTemplate::chatml(),
        };
        let template = TemplateRegistry::with_builtins(chat).get(&config.template)?;
        Self::with_template(config, tokenizer, template, &LocalLoader)
    }

    /// Load a dataset with an explicit template and record loader.
    pub fn with_template(
        config: &PromptOnlyConfig,
        tokenizer: Arc<Tokenizer>,
        template: Arc<dyn PromptTemplate>,
        loader: &dyn RecordLoader,
    ) -> Result<Self> {
        config.validate()?;
        let records = load_records(&LoadRequest::from_config(config), loader)?;
        Self::from_records(records, tokenizer, template, PromptOnlyOptions::from(config))
    }

    /// Build a dataset from already loaded records.
    pub fn from_records(
        records: Vec<RawSample>,
        tokenizer: Arc<Tokenizer>,
        template: Arc<dyn PromptTemplate>,
        options: PromptOnlyOptions,
    ) -> Result<Self> {
        let eos_token = tokenizer
            .eos_token()
            .ok_or_else(|| PAlignError::Tokenizer("tokenizer has no EOS token".to_string()))?
            .to_string();
        let eos_token_id = tokenizer.eos_token_id().ok_or_else(|| {
            PAlignError::Tokenizer(format!("EOS token '{}' has no id", eos_token))
        })?;

        if options.max_length.or_else(|| tokenizer.model_max_length()) == Some(0) {
            return Err(PAlignError::Config(
                "max_length must be greater than zero".to_string(),
            ));
        }

        let total = records.len();
        let mut raw_data =
            remove_duplicate_prompts(records, template.as_ref(), options.apply_chat_template)?;
        let unique = raw_data.len();
        if let Some(size) = options.size {
            raw_data.truncate(size);
        }

        tracing::info!(
            template = template.name(),
            total,
            duplicates = total - unique,
            kept = raw_data.len(),
            "Prepared prompt-only dataset"
        );

        Ok(Self {
            tokenizer,
            template,
            raw_data,
            options,
            eos_token,
            eos_token_id,
        })
    }

    /// Render, terminate with EOS, and tokenize one raw record.
    pub fn preprocess(&self, raw_sample: &RawSample) -> Result<PromptOnlySample> {
        let raw_text = self.render_with_eos(raw_sample)?;
        let mut input_ids = self.tokenize(&raw_text, &self.tokenize_options())?;

        // Truncation can cut the EOS off; the last kept position takes it back.
        if input_ids.last() != Some(&self.eos_token_id) {
            let at_limit = self
                .max_length()
                .is_some_and(|max| input_ids.len() >= max);
            match input_ids.last_mut() {
                Some(last) if at_limit => *last = self.eos_token_id,
                _ => input_ids.push(self.eos_token_id),
            }
        }

        Ok(PromptOnlySample::new(input_ids))
    }

    fn render_with_eos(&self, raw_sample: &RawSample) -> Result<String> {
        let mut raw_text = self
            .template
            .format_prompt_only_sample(raw_sample, self.options.apply_chat_template)?
            .text;
        if !raw_text.ends_with(&self.eos_token) {
            raw_text.push_str(&self.eos_token);
        }
        Ok(raw_text)
    }

    /// Token count of a sample before truncation, EOS included.
    pub fn untruncated_len(&self, index: usize) -> Result<usize> {
        let raw_text = self.render_with_eos(self.raw_sample(index)?)?;
        let options = TokenizeOptions {
            truncation: TruncationStrategy::DoNotTruncate,
            max_length: None,
            ..self.tokenize_options()
        };
        Ok(self.tokenize(&raw_text, &options)?.len())
    }

    /// Tokenize text into IDs.
    pub fn tokenize(&self, text: &str, options: &TokenizeOptions) -> Result<Vec<u32>> {
        self.tokenizer.tokenize(text, options)
    }

    /// Tokenization options used by [`preprocess`](Self::preprocess).
    pub fn tokenize_options(&self) -> TokenizeOptions {
        TokenizeOptions {
            add_special_tokens: true,
            padding: PaddingStrategy::DoNotPad,
            truncation: TruncationStrategy::LongestFirst,
            max_length: self.max_length(),
        }
    }

    fn max_length(&self) -> Option<usize> {
        self.options
            .max_length
            .or_else(|| self.tokenizer.model_max_length())
    }

    /// Get a tokenized sample by index.
    pub fn get(&self, index: usize) -> Result<PromptOnlySample> {
        self.preprocess(self.raw_sample(index)?)
    }

    fn raw_sample(&self, index: usize) -> Result<&RawSample> {
        self.raw_data.get(index).ok_or_else(|| {
            PAlignError::InvalidArgument(format!(
                "index {} out of range for dataset of {} samples",
                index,
                self.raw_data.len()
            ))
        })
    }

    /// Iterate over tokenized samples in order.
    pub fn iter(&self) -> impl Iterator<Item = Result<PromptOnlySample>> + '_ {
        self.raw_data.iter().map(move |raw| self.preprocess(raw))
    }

    /// Get the number of samples.
    pub fn len(&self) -> usize {
        self.raw_data.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.raw_data.is_empty()
    }

    /// The deduplicated raw records.
    pub fn raw_samples(&self) -> &[RawSample] {
        &self.raw_data
    }

    /// The prompt template in use.
    pub fn template(&self) -> &dyn PromptTemplate {
        self.template.as_ref()
    }

    /// The tokenizer in use.
    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// A collator padding with the tokenizer's pad token (EOS when it has none).
    pub fn get_collator(&self) -> PromptOnlyCollator {
        PromptOnlyCollator::new(self.tokenizer.pad_token_id().unwrap_or(self.eos_token_id))
    }
}

impl std::fmt::Debug for PromptOnlyDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptOnlyDataset")
            .field("template", &self.template.name())
            .field("len", &self.raw_data.len())
            .field("options", &self.options)
            .field("eos_token", &self.eos_token)
            .finish()
    }
}
