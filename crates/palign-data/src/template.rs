//! Prompt templates: turning raw records into prompt strings.
//!
//! A [`PromptTemplate`] knows which fields of a record hold the prompt and
//! renders them, optionally through a [`ChatTemplate`]. Templates are looked
//! up by name in a [`TemplateRegistry`].

use crate::chat_templates::{ChatTemplate, Message};
use crate::source::RawSample;
use palign_core::{PAlignError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A rendered prompt-only sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedPrompt {
    /// Prompt text fed to the tokenizer.
    pub text: String,
    /// Messages extracted from the record.
    pub messages: Vec<Message>,
}

/// Renders prompt-only samples from raw records.
pub trait PromptTemplate: Send + Sync {
    /// Registry name of the template.
    fn name(&self) -> &str;

    /// Render the prompt of a raw record.
    ///
    /// With `apply_chat_template` the messages go through the chat format and
    /// end with the assistant generation header; otherwise the message
    /// contents are returned as plain text.
    fn format_prompt_only_sample(
        &self,
        sample: &RawSample,
        apply_chat_template: bool,
    ) -> Result<FormattedPrompt>;
}

/// Where a field template finds the prompt in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptFields {
    /// A single text field.
    Single(String),
    /// An instruction field plus an optional input field appended below it.
    Instruction {
        /// Instruction field name.
        instruction: String,
        /// Optional input field name.
        input: String,
    },
    /// OpenAI `messages` or ShareGPT `conversations`, up to the last user turn.
    Conversation,
}

/// Template that reads prompt fields from a record.
///
/// A `system` string field, when present, becomes the system message.
#[derive(Debug, Clone)]
pub struct FieldTemplate {
    name: String,
    fields: PromptFields,
    chat: ChatTemplate,
}

impl FieldTemplate {
    /// Create a field template.
    pub fn new(name: impl Into<String>, fields: PromptFields, chat: ChatTemplate) -> Self {
        Self {
            name: name.into(),
            fields,
            chat,
        }
    }

    /// Template reading a single text field.
    pub fn single(name: impl Into<String>, key: impl Into<String>, chat: ChatTemplate) -> Self {
        Self::new(name, PromptFields::Single(key.into()), chat)
    }

    /// The chat format used when rendering with the chat template.
    pub fn chat_template(&self) -> &ChatTemplate {
        &self.chat
    }

    fn messages(&self, sample: &RawSample) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        if let Some(system) = optional_text(sample, "system")? {
            messages.push(Message::system(system));
        }

        match &self.fields {
            PromptFields::Single(key) => {
                messages.push(Message::user(required_text(sample, key)?));
            }
            PromptFields::Instruction { instruction, input } => {
                let mut prompt = required_text(sample, instruction)?;
                if let Some(input) = optional_text(sample, input)? {
                    if !input.is_empty() {
                        prompt.push_str("\n\n");
                        prompt.push_str(&input);
                    }
                }
                messages.push(Message::user(prompt));
            }
            PromptFields::Conversation => {
                messages.extend(conversation_prefix(sample)?);
            }
        }

        Ok(messages)
    }
}

impl PromptTemplate for FieldTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn format_prompt_only_sample(
        &self,
        sample: &RawSample,
        apply_chat_template: bool,
    ) -> Result<FormattedPrompt> {
        let messages = self.messages(sample)?;
        let text = if apply_chat_template {
            self.chat.render_prompt(&messages)
        } else {
            messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };
        Ok(FormattedPrompt { text, messages })
    }
}

/// Read a field as text. Numbers and booleans are stringified.
fn optional_text(sample: &RawSample, key: &str) -> Result<Option<String>> {
    match sample.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v @ (Value::Number(_) | Value::Bool(_))) => Ok(Some(v.to_string())),
        Some(other) => Err(PAlignError::Template(format!(
            "field '{}' must be text, got {}",
            key,
            json_kind(other)
        ))),
    }
}

fn required_text(sample: &RawSample, key: &str) -> Result<String> {
    optional_text(sample, key)?.ok_or_else(|| {
        PAlignError::Template(format!(
            "record has no '{}' field (fields: {})",
            key,
            sample.keys().cloned().collect::<Vec<_>>().join(", ")
        ))
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Extract the turns up to and including the last user turn.
fn conversation_prefix(sample: &RawSample) -> Result<Vec<Message>> {
    let (turns, role_key, content_key) = if let Some(turns) = sample.get("messages") {
        (turns, "role", "content")
    } else if let Some(turns) = sample.get("conversations") {
        (turns, "from", "value")
    } else {
        return Err(PAlignError::Template(
            "record has neither 'messages' nor 'conversations'".to_string(),
        ));
    };

    let turns = turns.as_array().ok_or_else(|| {
        PAlignError::Template(format!("conversation must be an array, got {}", json_kind(turns)))
    })?;

    let mut messages = Vec::with_capacity(turns.len());
    for (i, turn) in turns.iter().enumerate() {
        let field = |key: &str| {
            turn.get(key).and_then(Value::as_str).ok_or_else(|| {
                PAlignError::Template(format!("turn {} has no text '{}' field", i, key))
            })
        };
        let role = match field(role_key)? {
            "human" | "user" => "user",
            "gpt" | "assistant" | "model" => "assistant",
            other => other,
        };
        messages.push(Message::new(role, field(content_key)?));
    }

    let last_user = messages
        .iter()
        .rposition(|m| m.role == "user")
        .ok_or_else(|| PAlignError::Template("conversation has no user turn".to_string()))?;
    messages.truncate(last_user + 1);
    Ok(messages)
}

/// Named collection of prompt templates.
#[derive(Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<dyn PromptTemplate>>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in field templates.
    ///
    /// | name                     | prompt source                      |
    /// |--------------------------|------------------------------------|
    /// | `Prompt`, `PKUSafeRLHF`  | `prompt`                           |
    /// | `Question`               | `question`                         |
    /// | `Text`                   | `text`                             |
    /// | `Instruction`, `Alpaca`  | `instruction` + optional `input`   |
    /// | `Conversation`           | `messages` / `conversations`       |
    pub fn with_builtins(chat: ChatTemplate) -> Self {
        let instruction = || PromptFields::Instruction {
            instruction: "instruction".to_string(),
            input: "input".to_string(),
        };

        let mut registry = Self::new();
        registry.register(FieldTemplate::single("Prompt", "prompt", chat.clone()));
        registry.register(FieldTemplate::single("PKUSafeRLHF", "prompt", chat.clone()));
        registry.register(FieldTemplate::single("Question", "question", chat.clone()));
        registry.register(FieldTemplate::single("Text", "text", chat.clone()));
        registry.register(FieldTemplate::new("Instruction", instruction(), chat.clone()));
        registry.register(FieldTemplate::new("Alpaca", instruction(), chat.clone()));
        registry.register(FieldTemplate::new("Conversation", PromptFields::Conversation, chat));
        registry
    }

    /// Register a template under its name, replacing any previous one.
    pub fn register<T: PromptTemplate + 'static>(&mut self, template: T) {
        self.templates
            .insert(template.name().to_string(), Arc::new(template));
    }

    /// Look up a template by name (exact match first, then case-insensitive).
    pub fn get(&self, name: &str) -> Result<Arc<dyn PromptTemplate>> {
        if let Some(template) = self.templates.get(name) {
            return Ok(Arc::clone(template));
        }

        self.templates
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, template)| Arc::clone(template))
            .ok_or_else(|| {
                PAlignError::Template(format!(
                    "unknown template '{}', available: {}",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for TemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::record;
    use serde_json::json;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::with_builtins(ChatTemplate::chatml())
    }

    #[test]
    fn test_single_field_with_chat_template() {
        let template = registry().get("Prompt").unwrap();
        let formatted = template
            .format_prompt_only_sample(&record(json!({"prompt": "Hello"})), true)
            .unwrap();
        assert_eq!(
            formatted.text,
            "<|im_start|>user\nHello<|im_end|>\n<|im_start|>assistant\n"
        );
        assert_eq!(formatted.messages, vec![Message::user("Hello")]);
    }

    #[test]
    fn test_single_field_plain() {
        let template = registry().get("Prompt").unwrap();
        let formatted = template
            .format_prompt_only_sample(&record(json!({"prompt": "Hello", "response": "x"})), false)
            .unwrap();
        assert_eq!(formatted.text, "Hello");
    }

    #[test]
    fn test_system_field() {
        let template = registry().get("Question").unwrap();
        let sample = record(json!({"system": "Be brief.", "question": "Why?"}));
        let formatted = template.format_prompt_only_sample(&sample, false).unwrap();
        assert_eq!(formatted.text, "Be brief.\n\nWhy?");
        assert_eq!(formatted.messages[0], Message::system("Be brief."));
    }

    #[test]
    fn test_instruction_with_input() {
        let template = registry().get("Alpaca").unwrap();
        let sample = record(json!({
            "instruction": "Translate to German",
            "input": "Good morning",
            "output": "Guten Morgen"
        }));
        let formatted = template.format_prompt_only_sample(&sample, false).unwrap();
        assert_eq!(formatted.text, "Translate to German\n\nGood morning");
    }

    #[test]
    fn test_instruction_empty_input_is_skipped() {
        let template = registry().get("Instruction").unwrap();
        let sample = record(json!({"instruction": "Write a poem", "input": ""}));
        let formatted = template.format_prompt_only_sample(&sample, false).unwrap();
        assert_eq!(formatted.text, "Write a poem");
    }

    #[test]
    fn test_conversation_stops_at_last_user_turn() {
        let template = registry().get("Conversation").unwrap();
        let sample = record(json!({
            "conversations": [
                {"from": "human", "value": "Hi"},
                {"from": "gpt", "value": "Hello!"},
                {"from": "human", "value": "Tell me a joke"},
                {"from": "gpt", "value": "No."}
            ]
        }));
        let formatted = template.format_prompt_only_sample(&sample, true).unwrap();
        assert_eq!(formatted.messages.len(), 3);
        assert!(formatted.text.contains("<|im_start|>assistant\nHello!<|im_end|>"));
        assert!(!formatted.text.contains("No."));
        assert!(formatted.text.ends_with("<|im_start|>assistant\n"));
    }

    #[test]
    fn test_conversation_without_user_turn() {
        let template = registry().get("Conversation").unwrap();
        let sample = record(json!({"messages": [{"role": "assistant", "content": "Hi"}]}));
        assert!(template.format_prompt_only_sample(&sample, true).is_err());
    }

    #[test]
    fn test_missing_field_names_available_fields() {
        let template = registry().get("Prompt").unwrap();
        let err = template
            .format_prompt_only_sample(&record(json!({"question": "Why?"})), true)
            .unwrap_err()
            .to_string();
        assert!(err.contains("'prompt'"), "{}", err);
        assert!(err.contains("question"), "{}", err);
    }

    #[test]
    fn test_non_text_field() {
        let template = registry().get("Prompt").unwrap();
        let err = template
            .format_prompt_only_sample(&record(json!({"prompt": ["a"]})), true)
            .unwrap_err()
            .to_string();
        assert!(err.contains("an array"), "{}", err);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert_eq!(registry.get("pkusaferlhf").unwrap().name(), "PKUSafeRLHF");
        let err = registry.get("Missing").err().unwrap().to_string();
        assert!(err.contains("available"), "{}", err);
        assert!(registry.names().contains(&"Conversation".to_string()));
    }

    #[test]
    fn test_register_custom_template() {
        let mut registry = TemplateRegistry::new();
        registry.register(FieldTemplate::single("Query", "query", ChatTemplate::llama3()));
        let template = registry.get("Query").unwrap();
        let formatted = template
            .format_prompt_only_sample(&record(json!({"query": "What is Rust?"})), true)
            .unwrap();
        assert!(formatted.text.contains("<|start_header_id|>user<|end_header_id|>"));
    }
}
