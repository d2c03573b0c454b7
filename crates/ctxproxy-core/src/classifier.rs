//! Rule-based intent classification.

use tracing::debug;

use crate::types::{ChatRequest, Intent};

const CODING_KEYWORDS: &[&str] = &[
    "code",
    "编程",
    "函数",
    "class",
    "def",
    "import",
    "bug",
    "error",
    "exception",
    "debug",
    "fix",
    "python",
    "javascript",
    "typescript",
    "rust",
    "go",
    "implement",
    "write a script",
    "refactor",
];

const RETRIEVAL_KEYWORDS: &[&str] = &[
    "remember",
    "recall",
    "what did",
    "之前",
    "上次",
    "find",
    "search",
    "look up",
    "查询",
    "查找",
    "history",
    "past",
    "previous",
    "earlier",
];

const DOCUMENT_KEYWORDS: &[&str] = &[
    "file",
    "document",
    "pdf",
    "markdown",
    "readme",
    "analyze this",
    "review the",
    "文档",
    "文件",
];

/// Protocol for intent classification, so a future model-backed classifier
/// can be dropped in without touching pipeline call sites.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, request: &ChatRequest) -> Intent;
}

/// Fixed keyword-matching classifier.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleBasedClassifier;

impl IntentClassifier for RuleBasedClassifier {
    fn classify(&self, request: &ChatRequest) -> Intent {
        if request.tools.as_ref().is_some_and(|t| !t.is_empty()) || request.has_tool_bearing_message() {
            debug!(intent = Intent::ToolUse.as_str(), "classifier.classified");
            return Intent::ToolUse;
        }

        let Some(content) = request.last_user_content() else {
            debug!(intent = Intent::Unknown.as_str(), "classifier.classified");
            return Intent::Unknown;
        };

        if content.is_empty() {
            debug!(intent = Intent::Unknown.as_str(), "classifier.classified");
            return Intent::Unknown;
        }

        let lower = content.to_lowercase();

        let intent = if CODING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Intent::Coding
        } else if RETRIEVAL_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Intent::Retrieval
        } else if DOCUMENT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            Intent::Document
        } else {
            Intent::Casual
        };

        debug!(intent = intent.as_str(), "classifier.classified");
        intent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;
    use serde_json::json;

    fn req(messages: Vec<Message>, tools: Option<Vec<serde_json::Value>>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
            tools,
            tool_choice: None,
            extra: Default::default(),
        }
    }

    fn user(content: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn tools_present_forces_tool_use() {
        let r = req(
            vec![user("help me fix this bug in my python code")],
            Some(vec![json!({"type": "function"})]),
        );
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::ToolUse);
    }

    #[test]
    fn tool_bearing_message_forces_tool_use_without_tools_field() {
        let mut m = user("ignored");
        m.tool_call_id = Some("call_1".to_string());
        let r = req(vec![m], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::ToolUse);
    }

    #[test]
    fn coding_keyword_wins_over_retrieval_when_both_present() {
        let r = req(vec![user("please fix this bug, can you find it")], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Coding);
    }

    #[test]
    fn retrieval_keyword() {
        let r = req(vec![user("what did we discuss last time")], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Retrieval);
    }

    #[test]
    fn document_keyword() {
        let r = req(vec![user("can you review the readme")], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Document);
    }

    #[test]
    fn empty_last_user_is_unknown() {
        let r = req(vec![user("")], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Unknown);
    }

    #[test]
    fn no_user_message_is_unknown() {
        let r = req(
            vec![Message {
                role: "system".to_string(),
                content: Some("hi".to_string()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
            None,
        );
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Unknown);
    }

    #[test]
    fn casual_default() {
        let r = req(vec![user("how's the weather")], None);
        assert_eq!(RuleBasedClassifier.classify(&r), Intent::Casual);
    }
}
