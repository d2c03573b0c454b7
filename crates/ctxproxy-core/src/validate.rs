//! Post-assembly output validation: catches assembler bugs before an
//! optimized request is allowed to reach memory injection or forwarding.

use crate::error::ValidationFailure;
use crate::types::ChatRequest;

/// Verify that `optimized` is a legitimate derivative of `original`:
/// the system prompt (if any) must survive, and the most recent message
/// must be forwarded bit-for-bit.
pub fn validate_request(original: &ChatRequest, optimized: &ChatRequest) -> Result<(), ValidationFailure> {
    let original_system = original.messages.first().filter(|m| m.role == "system");
    if let Some(original_system) = original_system {
        let survived = optimized
            .messages
            .first()
            .is_some_and(|m| m.role == "system" && m.content.is_some());
        if !survived {
            return Err(ValidationFailure::SystemMessageLost);
        }
        let _ = original_system;
    }

    match (original.messages.last(), optimized.messages.last()) {
        (Some(a), Some(b)) if a == b => Ok(()),
        (None, None) => Ok(()),
        _ => Err(ValidationFailure::LastMessageModified),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn msg(role: &str, content: &str) -> Message {
        Message {
            role: role.to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

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

    #[test]
    fn passes_when_system_and_last_message_preserved() {
        let original = req(vec![msg("system", "s"), msg("user", "u1"), msg("user", "u2")]);
        let optimized = req(vec![msg("system", "s"), msg("user", "u2")]);
        assert!(validate_request(&original, &optimized).is_ok());
    }

    #[test]
    fn fails_when_system_message_dropped() {
        let original = req(vec![msg("system", "s"), msg("user", "u1")]);
        let optimized = req(vec![msg("user", "u1")]);
        assert_eq!(
            validate_request(&original, &optimized),
            Err(ValidationFailure::SystemMessageLost)
        );
    }

    #[test]
    fn fails_when_last_message_modified() {
        let original = req(vec![msg("system", "s"), msg("user", "u1")]);
        let optimized = req(vec![msg("system", "s"), msg("user", "u1-modified")]);
        assert_eq!(
            validate_request(&original, &optimized),
            Err(ValidationFailure::LastMessageModified)
        );
    }

    #[test]
    fn passes_with_no_system_message_at_all() {
        let original = req(vec![msg("user", "u1")]);
        let optimized = req(vec![msg("user", "u1")]);
        assert!(validate_request(&original, &optimized).is_ok());
    }
}
