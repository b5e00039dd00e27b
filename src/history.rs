//! Per-node conversation log.
//!
//! A node owns its history outright and the host runs a node instance one
//! call at a time, so there is no locking here.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

const TRANSCRIPT_RULE: &str = "----------------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only message log: at most one leading system entry, then strictly
/// alternating user/assistant pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    messages: Vec<ChatMessage>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the system prompt. Only applies to an empty history.
    pub fn ensure_system(&mut self, prompt: &str) {
        if self.messages.is_empty() && !prompt.trim().is_empty() {
            self.messages.push(ChatMessage::system(prompt));
        }
    }

    /// Everything to send for the next call: the log plus the new user turn.
    pub fn pending_with(&self, user: &str) -> Vec<ChatMessage> {
        let mut out = self.messages.clone();
        out.push(ChatMessage::user(user));
        out
    }

    /// Commit a completed exchange. Call only after the model answered.
    pub fn record_turn(&mut self, user: &str, assistant: &str) {
        self.messages.push(ChatMessage::user(user));
        self.messages.push(ChatMessage::assistant(assistant));
    }

    pub fn reset(&mut self) {
        self.messages.clear();
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count(&self, role: ChatRole) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// `role: content` per message, each followed by a dashed rule.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}\n{}", m.role, m.content, TRANSCRIPT_RULE))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_markdown(&self) -> String {
        self.messages
            .iter()
            .map(|m| {
                let heading = match m.role {
                    ChatRole::System => "### System",
                    ChatRole::User => "### User",
                    ChatRole::Assistant => "### Assistant",
                };
                format!("{heading}\n\n{}\n", m.content.trim())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
