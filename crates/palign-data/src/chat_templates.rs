//! Chat formats for rendering generation prompts.
//!
//! Every format renders the conversation so far and ends with the header the
//! model continues from, so the rendered text is ready for generation.

use palign_core::PAlignError;
use std::str::FromStr;

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Role: "system", "user", or "assistant"
    pub role: String,
    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new message.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    fn is_system(&self) -> bool {
        self.role == "system"
    }
}

/// Known chat formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatTemplateType {
    /// `<|im_start|>role\ncontent<|im_end|>`
    ChatMl,
    /// `[INST] <<SYS>>...<</SYS>> message [/INST]`
    Llama2,
    /// `<|start_header_id|>role<|end_header_id|>\n\ncontent<|eot_id|>`
    Llama3,
    /// `[INST] message [/INST]`
    Mistral,
    /// `<start_of_turn>role\ncontent<end_of_turn>`
    Gemma,
    /// `<|user|>\ncontent<|end|>`
    Phi3,
    /// `### Instruction:` / `### Response:` sections
    Alpaca,
    /// Message contents joined by blank lines, no markup
    Plain,
}

impl ChatTemplateType {
    /// All formats, in display order.
    pub const ALL: [ChatTemplateType; 8] = [
        Self::ChatMl,
        Self::Llama2,
        Self::Llama3,
        Self::Mistral,
        Self::Gemma,
        Self::Phi3,
        Self::Alpaca,
        Self::Plain,
    ];

    /// Canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatMl => "chatml",
            Self::Llama2 => "llama2",
            Self::Llama3 => "llama3",
            Self::Mistral => "mistral",
            Self::Gemma => "gemma",
            Self::Phi3 => "phi3",
            Self::Alpaca => "alpaca",
            Self::Plain => "plain",
        }
    }

    /// Get the EOS token for this format.
    pub fn eos_token(&self) -> &'static str {
        match self {
            Self::ChatMl => "<|im_end|>",
            Self::Llama3 => "<|eot_id|>",
            Self::Gemma => "<end_of_turn>",
            Self::Phi3 => "<|end|>",
            Self::Llama2 | Self::Mistral | Self::Alpaca | Self::Plain => "</s>",
        }
    }

    /// Get the BOS token for this format (if any).
    pub fn bos_token(&self) -> Option<&'static str> {
        match self {
            Self::Llama2 | Self::Mistral => Some("<s>"),
            Self::Llama3 => Some("<|begin_of_text|>"),
            Self::Gemma => Some("<bos>"),
            _ => None,
        }
    }
}

impl FromStr for ChatTemplateType {
    type Err = PAlignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "chatml" | "qwen" => Ok(Self::ChatMl),
            "llama2" => Ok(Self::Llama2),
            "llama3" => Ok(Self::Llama3),
            "mistral" => Ok(Self::Mistral),
            "gemma" => Ok(Self::Gemma),
            "phi3" => Ok(Self::Phi3),
            "alpaca" => Ok(Self::Alpaca),
            "plain" | "none" => Ok(Self::Plain),
            _ => Err(PAlignError::Template(format!(
                "unknown chat format '{}', expected one of: {}",
                s,
                Self::ALL.map(|t| t.name()).join(", ")
            ))),
        }
    }
}

const ALPACA_SYSTEM: &str = "Below is an instruction that describes a task. \
Write a response that appropriately completes the request.";

/// Chat format configuration and rendering.
#[derive(Debug, Clone)]
pub struct ChatTemplate {
    /// The format.
    pub template_type: ChatTemplateType,
    /// System message used when the conversation has none.
    pub default_system_message: Option<String>,
    /// Whether to prefix the BOS token.
    pub add_bos: bool,
}

impl ChatTemplate {
    /// Create a new chat template with the given format.
    ///
    /// BOS is off by default since most tokenizers add it as a special token.
    pub fn new(template_type: ChatTemplateType) -> Self {
        Self {
            template_type,
            default_system_message: None,
            add_bos: false,
        }
    }

    /// Create a ChatML template.
    pub fn chatml() -> Self {
        Self::new(ChatTemplateType::ChatMl)
    }

    /// Create a Llama-3 template.
    pub fn llama3() -> Self {
        Self::new(ChatTemplateType::Llama3)
    }

    /// Create an Alpaca template with the usual preamble.
    pub fn alpaca() -> Self {
        Self::new(ChatTemplateType::Alpaca).with_system_message(ALPACA_SYSTEM)
    }

    /// Set the default system message.
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.default_system_message = Some(message.into());
        self
    }

    /// Set whether to add BOS.
    pub fn with_add_bos(mut self, add_bos: bool) -> Self {
        self.add_bos = add_bos;
        self
    }

    /// Render a conversation followed by the assistant generation header.
    pub fn render_prompt(&self, messages: &[Message]) -> String {
        let (system, turns) = self.split_system(messages);
        let mut text = String::new();

        if self.add_bos {
            if let Some(bos) = self.template_type.bos_token() {
                text.push_str(bos);
            }
        }

        match self.template_type {
            ChatTemplateType::ChatMl => {
                let system_turn = system.map(Message::system);
                for msg in system_turn.iter().chain(turns.iter().copied()) {
                    text.push_str(&format!(
                        "<|im_start|>{}\n{}<|im_end|>\n",
                        msg.role, msg.content
                    ));
                }
                text.push_str("<|im_start|>assistant\n");
            }
            ChatTemplateType::Llama3 => {
                let system_turn = system.map(Message::system);
                for msg in system_turn.iter().chain(turns.iter().copied()) {
                    text.push_str(&format!(
                        "<|start_header_id|>{}<|end_header_id|>\n\n{}<|eot_id|>",
                        msg.role,
                        msg.content.trim()
                    ));
                }
                text.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
            }
            ChatTemplateType::Llama2 => {
                let mut pending_system = system.map(|s| format!("<<SYS>>\n{}\n<</SYS>>\n\n", s));
                for msg in &turns {
                    if msg.role == "assistant" {
                        text.push_str(&format!(" {} </s>", msg.content.trim()));
                    } else {
                        let sys = pending_system.take().unwrap_or_default();
                        text.push_str(&format!("[INST] {}{} [/INST]", sys, msg.content.trim()));
                    }
                }
            }
            ChatTemplateType::Mistral => {
                let mut pending_system = system.map(|s| format!("{}\n\n", s));
                for msg in &turns {
                    if msg.role == "assistant" {
                        text.push_str(&format!("{}</s>", msg.content.trim()));
                    } else {
                        let sys = pending_system.take().unwrap_or_default();
                        text.push_str(&format!("[INST] {}{} [/INST]", sys, msg.content.trim()));
                    }
                }
            }
            ChatTemplateType::Gemma => {
                // No system role; it is folded into the first user turn.
                let mut pending_system = system.map(|s| format!("{}\n\n", s));
                for msg in &turns {
                    let role = if msg.role == "assistant" { "model" } else { "user" };
                    let sys = if role == "user" {
                        pending_system.take().unwrap_or_default()
                    } else {
                        String::new()
                    };
                    text.push_str(&format!(
                        "<start_of_turn>{}\n{}{}<end_of_turn>\n",
                        role, sys, msg.content
                    ));
                }
                text.push_str("<start_of_turn>model\n");
            }
            ChatTemplateType::Phi3 => {
                let system_turn = system.map(Message::system);
                for msg in system_turn.iter().chain(turns.iter().copied()) {
                    text.push_str(&format!("<|{}|>\n{}<|end|>\n", msg.role, msg.content));
                }
                text.push_str("<|assistant|>\n");
            }
            ChatTemplateType::Alpaca => {
                if let Some(sys) = system {
                    text.push_str(sys);
                    text.push_str("\n\n");
                }
                for msg in &turns {
                    let header = if msg.role == "assistant" {
                        "### Response:"
                    } else {
                        "### Instruction:"
                    };
                    text.push_str(&format!("{}\n{}\n\n", header, msg.content));
                }
                text.push_str("### Response:\n");
            }
            ChatTemplateType::Plain => {
                let parts: Vec<&str> = system
                    .into_iter()
                    .chain(turns.iter().map(|m| m.content.as_str()))
                    .collect();
                text.push_str(&parts.join("\n\n"));
            }
        }

        text
    }

    /// Separate the system prompt (explicit, else the default) from the turns.
    fn split_system<'a>(&'a self, messages: &'a [Message]) -> (Option<&'a str>, Vec<&'a Message>) {
        let explicit = messages
            .iter()
            .find(|m| m.is_system())
            .map(|m| m.content.as_str());
        let system = explicit.or(self.default_system_message.as_deref());
        let turns = messages.iter().filter(|m| !m.is_system()).collect();
        (system, turns)
    }
}

impl Default for ChatTemplate {
    fn default() -> Self {
        Self::chatml()
    }
}

/// Detect the appropriate chat format from a model or tokenizer name.
pub fn detect_template_from_model(model_name: &str) -> ChatTemplate {
    let name = model_name.to_lowercase();

    if name.contains("llama-3") || name.contains("llama3") {
        ChatTemplate::llama3()
    } else if name.contains("llama-2") || name.contains("llama2") {
        ChatTemplate::new(ChatTemplateType::Llama2)
    } else if name.contains("llama") {
        ChatTemplate::llama3()
    } else if name.contains("mistral") || name.contains("mixtral") {
        ChatTemplate::new(ChatTemplateType::Mistral)
    } else if name.contains("gemma") {
        ChatTemplate::new(ChatTemplateType::Gemma)
    } else if name.contains("phi-3") || name.contains("phi3") {
        ChatTemplate::new(ChatTemplateType::Phi3)
    } else if name.contains("alpaca") {
        ChatTemplate::alpaca()
    } else {
        ChatTemplate::chatml()
    }
}
