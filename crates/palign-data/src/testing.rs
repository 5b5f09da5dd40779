//! Shared fixtures for unit tests.

use crate::source::RawSample;
use crate::tokenizer::Tokenizer;
use serde_json::Value;
use std::path::PathBuf;

/// Directory holding `tokenizer.json` and `tokenizer_config.json`.
pub(crate) fn fixture_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// Word-level tokenizer over a small vocabulary, without tokenizer config.
pub(crate) fn test_tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(include_bytes!("../tests/fixtures/tokenizer.json")).unwrap()
}

pub(crate) fn record(value: Value) -> RawSample {
    match value {
        Value::Object(obj) => obj,
        other => panic!("fixture record must be an object, got {}", other),
    }
}
