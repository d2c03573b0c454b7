//! Request sanitizer: scans a request's messages and emits preservation
//! flags without mutating anything.

use std::collections::HashMap;

use tracing::debug;

use crate::types::{ChatRequest, MessageFlags};

/// Minimum content length for a code-bearing message to be preserved on its
/// own merit (short snippets don't warrant keeping an otherwise-droppable
/// middle message around).
const CODE_PRESERVE_MIN_LEN: usize = 500;

/// Scan every message in `request` and return its preservation flags,
/// keyed by index. Pure and stateless.
pub fn sanitize(request: &ChatRequest) -> HashMap<usize, MessageFlags> {
    let mut flags = HashMap::with_capacity(request.messages.len());
    let mut preserve_count = 0usize;

    for (idx, message) in request.messages.iter().enumerate() {
        let has_code_block = message.is_code_bearing();
        let has_tool_call = message.is_tool_bearing();
        let has_attachment = message.is_attachment_bearing();
        let is_system_prompt = idx == 0 && message.role == "system";
        let long_code = has_code_block
            && message
                .content
                .as_ref()
                .is_some_and(|c| c.len() > CODE_PRESERVE_MIN_LEN);
        let should_preserve = has_tool_call || long_code;

        if should_preserve {
            preserve_count += 1;
        }

        flags.insert(
            idx,
            MessageFlags {
                has_code_block,
                has_tool_call,
                has_attachment,
                is_system_prompt,
                should_preserve,
            },
        );
    }

    debug!(preserve_count, total = request.messages.len(), "sanitizer.scanned");
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn req(messages: Vec<Message>) -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
            tools: None,
            tool_choice: None,
            extra: Default::default(),
        }
    }

    fn msg(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn short_code_block_not_preserved() {
        let r = req(vec![msg("user", "```\nfn main() {}\n```")]);
        let flags = sanitize(&r);
        assert!(flags[&0].has_code_block);
        assert!(!flags[&0].should_preserve);
    }

    #[test]
    fn long_code_block_preserved() {
        let long = format!("```\n{}\n```", "x".repeat(600));
        let r = req(vec![msg("user", &long)]);
        let flags = sanitize(&r);
        assert!(flags[&0].has_code_block);
        assert!(flags[&0].should_preserve);
    }

    #[test]
    fn tool_bearing_always_preserved() {
        let mut m = msg("assistant", "short");
        m.tool_call_id = Some("call_1".to_string());
        let r = req(vec![m]);
        let flags = sanitize(&r);
        assert!(flags[&0].has_tool_call);
        assert!(flags[&0].should_preserve);
    }

    #[test]
    fn system_prompt_flagged_only_at_index_zero() {
        let r = req(vec![msg("system", "be nice"), msg("user", "hi")]);
        let flags = sanitize(&r);
        assert!(flags[&0].is_system_prompt);
        assert!(!flags[&1].is_system_prompt);
    }

    #[test]
    fn attachment_markers_detected_case_insensitively() {
        let r = req(vec![msg("user", "See [ATTACHED FILE: report.pdf]")]);
        let flags = sanitize(&r);
        assert!(flags[&0].has_attachment);
    }
}
