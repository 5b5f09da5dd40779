//! Tokenizer integration.

use palign_core::{PAlignError, Result};
use serde_json::Value;
use std::path::Path;

/// File name of the serialized tokenizer inside a model directory.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// File name of the tokenizer configuration inside a model directory.
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Limits at or above this are treated as "no limit" (HF writes 1e30 there).
const UNBOUNDED_MODEL_MAX_LENGTH: f64 = 1e12;

/// Padding strategy applied to a single tokenized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaddingStrategy {
    /// Leave the sequence as is.
    #[default]
    DoNotPad,
    /// Pad to the longest sequence; a no-op for one sequence.
    Longest,
    /// Pad up to `max_length` with the pad token.
    MaxLength,
}

/// Truncation strategy applied to a single tokenized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncationStrategy {
    /// Truncate to `max_length`, longest sequence first.
    #[default]
    LongestFirst,
    /// Truncate only the first sequence.
    OnlyFirst,
    /// Never truncate.
    DoNotTruncate,
}

/// Options for [`Tokenizer::tokenize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenizeOptions {
    /// Let the tokenizer's post-processor add its special tokens.
    pub add_special_tokens: bool,
    /// Padding strategy.
    pub padding: PaddingStrategy,
    /// Truncation strategy.
    pub truncation: TruncationStrategy,
    /// Length limit. `None` uses the tokenizer's `model_max_length`.
    pub max_length: Option<usize>,
}

impl Default for TokenizeOptions {
    fn default() -> Self {
        Self {
            add_special_tokens: true,
            padding: PaddingStrategy::DoNotPad,
            truncation: TruncationStrategy::LongestFirst,
            max_length: None,
        }
    }
}

/// Special tokens and limits read from `tokenizer_config.json`.
#[derive(Debug, Clone, Default)]
struct SpecialTokens {
    eos: Option<String>,
    pad: Option<String>,
    bos: Option<String>,
    model_max_length: Option<usize>,
}

impl SpecialTokens {
    fn from_config(config: &Value) -> Self {
        // Tokens are either plain strings or AddedToken objects with "content".
        let token = |key: &str| match config.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(obj)) => obj
                .get("content")
                .and_then(Value::as_str)
                .map(String::from),
            _ => None,
        };

        let model_max_length = config
            .get("model_max_length")
            .and_then(Value::as_f64)
            .filter(|&len| len >= 1.0 && len < UNBOUNDED_MODEL_MAX_LENGTH)
            .map(|len| len as usize);

        Self {
            eos: token("eos_token"),
            pad: token("pad_token"),
            bos: token("bos_token"),
            model_max_length,
        }
    }
}

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    special: SpecialTokens,
}

impl Tokenizer {
    /// Load a tokenizer from a local `tokenizer.json` file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path.as_ref()).map_err(|e| {
            PAlignError::Tokenizer(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Ok(Self {
            inner,
            special: SpecialTokens::default(),
        })
    }

    /// Load a tokenizer from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| PAlignError::Tokenizer(e.to_string()))?;
        Ok(Self {
            inner,
            special: SpecialTokens::default(),
        })
    }

    /// Load a tokenizer from a model directory.
    ///
    /// Reads `tokenizer.json` and, when present, `tokenizer_config.json` for
    /// the EOS/PAD/BOS tokens and `model_max_length`.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let tokenizer = Self::from_file(dir.join(TOKENIZER_FILE))?;

        let config_path = dir.join(TOKENIZER_CONFIG_FILE);
        if !config_path.exists() {
            tracing::debug!("No {} in {}", TOKENIZER_CONFIG_FILE, dir.display());
            return Ok(tokenizer);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Value = serde_json::from_str(&content)?;
        Ok(tokenizer.with_config(&config))
    }

    /// Load from either a `tokenizer.json` file or a model directory.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::from_dir(path)
        } else {
            Self::from_file(path)
        }
    }

    /// Apply the special tokens and limits of a parsed `tokenizer_config.json`.
    #[must_use]
    pub fn with_config(mut self, config: &Value) -> Self {
        self.special = SpecialTokens::from_config(config);
        self
    }

    /// Override the EOS token.
    #[must_use]
    pub fn with_eos_token(mut self, token: impl Into<String>) -> Self {
        self.special.eos = Some(token.into());
        self
    }

    /// Override the model's maximum length.
    #[must_use]
    pub fn with_model_max_length(mut self, max_length: usize) -> Self {
        self.special.model_max_length = Some(max_length);
        self
    }

    /// Encode text to token IDs.
    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| PAlignError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Tokenize text with padding and truncation applied.
    pub fn tokenize(&self, text: &str, options: &TokenizeOptions) -> Result<Vec<u32>> {
        let mut ids = self.encode(text, options.add_special_tokens)?;
        let max_length = options.max_length.or(self.special.model_max_length);

        if options.truncation != TruncationStrategy::DoNotTruncate {
            if let Some(max) = max_length {
                ids.truncate(max);
            }
        }

        if options.padding == PaddingStrategy::MaxLength {
            let max = max_length.ok_or_else(|| {
                PAlignError::InvalidArgument(
                    "max_length padding requires a max_length or model_max_length".to_string(),
                )
            })?;
            let pad = self.pad_token_id().ok_or_else(|| {
                PAlignError::Tokenizer("tokenizer has no padding token".to_string())
            })?;
            if ids.len() < max {
                ids.resize(max, pad);
            }
        }

        Ok(ids)
    }

    /// Decode token IDs to text.
    pub fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| PAlignError::Tokenizer(e.to_string()))
    }

    /// Get vocabulary size, including added tokens.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    /// The model's maximum length, if bounded.
    pub fn model_max_length(&self) -> Option<usize> {
        self.special.model_max_length
    }

    /// The EOS token string.
    ///
    /// Uses the configured token when it is in the vocabulary, otherwise the
    /// first common EOS spelling the vocabulary knows.
    pub fn eos_token(&self) -> Option<&str> {
        self.known(self.special.eos.as_deref())
            .or_else(|| self.first_known(&["</s>", "<|endoftext|>", "<|end_of_text|>", "<eos>"]))
    }

    /// Get EOS token ID if available.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.eos_token().and_then(|t| self.inner.token_to_id(t))
    }

    /// Get pad token ID if available.
    ///
    /// Tries the configured pad token and common pad names, then falls back to EOS.
    pub fn pad_token_id(&self) -> Option<u32> {
        const PAD_NAMES: [&str; 4] = ["<pad>", "[PAD]", "<|pad|>", "<|finetune_right_pad_id|>"];
        self.known(self.special.pad.as_deref())
            .or_else(|| self.first_known(&PAD_NAMES))
            .and_then(|t| self.inner.token_to_id(t))
            .or_else(|| self.eos_token_id())
    }

    /// Get BOS token ID if available.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.known(self.special.bos.as_deref())
            .or_else(|| self.first_known(&["<s>", "<|begin_of_text|>", "<bos>"]))
            .and_then(|t| self.inner.token_to_id(t))
    }

    fn known<'a>(&self, token: Option<&'a str>) -> Option<&'a str> {
        token.filter(|t| self.inner.token_to_id(t).is_some())
    }

    fn first_known<'a>(&self, candidates: &[&'a str]) -> Option<&'a str> {
        candidates
            .iter()
            .copied()
            .find(|t| self.inner.token_to_id(t).is_some())
    }
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("eos_token", &self.eos_token())
            .field("model_max_length", &self.special.model_max_length)
            .finish()
    }
}
