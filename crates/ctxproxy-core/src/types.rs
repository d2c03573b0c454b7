//! Wire-level data model shared across the pipeline.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat message in the OpenAI-compatible shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: "system".to_string(),
            content: Some(content.into()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// A message is tool-bearing iff it carries `tool_calls` or `tool_call_id`.
    pub fn is_tool_bearing(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|v| !v.is_empty()) || self.tool_call_id.is_some()
    }

    /// A message is code-bearing iff its content contains a fenced block,
    /// a four-space indent, or a tab.
    pub fn is_code_bearing(&self) -> bool {
        let Some(content) = &self.content else {
            return false;
        };
        content.contains("```") || content.contains("    ") || content.contains('\t')
    }

    /// A message is attachment-bearing iff its content contains any of the
    /// fixed attachment markers, matched case-insensitively.
    pub fn is_attachment_bearing(&self) -> bool {
        let Some(content) = &self.content else {
            return false;
        };
        let lower = content.to_lowercase();
        const MARKERS: [&str; 5] = [
            "[attached file",
            "[file:",
            "<file>",
            "content-type:",
            "data:application",
        ];
        MARKERS.iter().any(|m| lower.contains(m))
    }
}

/// An incoming chat-completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    /// Any additional OpenAI-shaped fields are preserved and forwarded
    /// unmodified (e.g. `stream_options`, vendor extensions).
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ChatRequest {
    /// Content of the last `user`-role message, if any.
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.as_deref())
    }

    pub fn has_tool_bearing_message(&self) -> bool {
        self.messages.iter().any(Message::is_tool_bearing)
    }
}

/// Per-message preservation flags, derived by the sanitizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub has_code_block: bool,
    pub has_tool_call: bool,
    pub has_attachment: bool,
    pub is_system_prompt: bool,
    pub should_preserve: bool,
}

/// Classified conversational intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Casual,
    Coding,
    Retrieval,
    ToolUse,
    Document,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Casual => "casual",
            Intent::Coding => "coding",
            Intent::Retrieval => "retrieval",
            Intent::ToolUse => "tool_use",
            Intent::Document => "document",
            Intent::Unknown => "unknown",
        }
    }
}
