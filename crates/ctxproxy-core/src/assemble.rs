//! Sliding-window context assembler.
//!
//! Rebuilds `messages` under a token/message budget while protecting the
//! system prompt, flagged middles (tool calls, long code blocks) and the
//! recent tail needed to answer the current turn.

use std::collections::HashMap;

use tracing::info;

use crate::token::estimate_message_tokens;
use crate::types::{ChatRequest, Intent, Message, MessageFlags};

#[derive(Debug, Clone, Copy)]
pub struct AssemblyConfig {
    pub preserve_last_n: usize,
    pub max_history_tokens: usize,
    pub enable_system_cleanup: bool,
    pub max_messages: usize,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        AssemblyConfig {
            preserve_last_n: 2,
            max_history_tokens: 2000,
            enable_system_cleanup: true,
            max_messages: 20,
        }
    }
}

/// One message carried through the window, tagged with whether it is
/// eligible for later token-budget eviction.
struct WindowEntry {
    message: Message,
    /// `Some(original_index)` iff this entry was included purely because it
    /// was flagged (a "middle" message, neither the system prompt nor part
    /// of the recent tail) and may be dropped to meet `max_history_tokens`.
    droppable: Option<usize>,
}

/// Window-construction algorithm, parameterized by a multiplier selected by
/// intent.
pub struct SlidingWindow {
    config: AssemblyConfig,
}

impl SlidingWindow {
    pub fn new(config: AssemblyConfig) -> Self {
        SlidingWindow { config }
    }

    pub fn apply(
        &self,
        messages: &[Message],
        preserve_flags: &HashMap<usize, MessageFlags>,
        window_mult: f64,
    ) -> Vec<Message> {
        if messages.len() <= self.config.preserve_last_n + 1 {
            return messages.to_vec();
        }

        let leading_system = if self.config.enable_system_cleanup {
            count_leading_system(messages)
        } else {
            usize::from(!messages.is_empty() && messages[0].role == "system")
        };

        let mut entries: Vec<WindowEntry> = Vec::new();
        if leading_system > 0 {
            entries.push(WindowEntry {
                message: merged_system_message(messages, leading_system),
                droppable: None,
            });
        }

        let recent_count = (self.config.preserve_last_n as f64 * window_mult).floor() as usize;
        let recent_start = std::cmp::max(leading_system.max(1), messages.len().saturating_sub(recent_count));

        for idx in leading_system.max(1)..recent_start {
            if preserve_flags.get(&idx).is_some_and(|f| f.should_preserve) {
                entries.push(WindowEntry {
                    message: messages[idx].clone(),
                    droppable: Some(idx),
                });
            }
        }

        for message in &messages[recent_start..] {
            entries.push(WindowEntry {
                message: message.clone(),
                droppable: None,
            });
        }

        let max_msgs = (self.config.max_messages as f64 * window_mult).floor() as usize;
        if entries.len() > max_msgs {
            entries = truncate_entries(entries, max_msgs);
        }

        enforce_token_budget(entries, self.config.max_history_tokens)
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}

fn count_leading_system(messages: &[Message]) -> usize {
    messages.iter().take_while(|m| m.role == "system").count()
}

fn merged_system_message(messages: &[Message], leading_system: usize) -> Message {
    if leading_system <= 1 {
        return messages[0].clone();
    }
    let merged_content = messages[..leading_system]
        .iter()
        .filter_map(|m| m.content.as_deref())
        .collect::<Vec<_>>()
        .join("\n\n");
    Message {
        role: "system".to_string(),
        content: Some(merged_content),
        name: None,
        tool_calls: None,
        tool_call_id: None,
    }
}

fn truncate_entries(entries: Vec<WindowEntry>, max_msgs: usize) -> Vec<WindowEntry> {
    let has_system = entries.first().is_some_and(|e| e.message.role == "system" && e.droppable.is_none());
    let keep_count = max_msgs.saturating_sub(usize::from(has_system));
    let tail_start = entries.len().saturating_sub(keep_count);

    let mut out = Vec::with_capacity(max_msgs);
    if has_system {
        out.push(entries[0].clone_shallow());
    }
    out.extend(entries[tail_start.max(usize::from(has_system))..].iter().map(WindowEntry::clone_shallow));
    out
}

impl WindowEntry {
    fn clone_shallow(&self) -> Self {
        WindowEntry {
            message: self.message.clone(),
            droppable: self.droppable,
        }
    }
}

/// Drop droppable (flagged-middle) entries, oldest original index first,
/// until the estimated token total is within budget or none remain.
fn enforce_token_budget(mut entries: Vec<WindowEntry>, max_history_tokens: usize) -> Vec<WindowEntry> {
    let total = |entries: &[WindowEntry]| -> usize {
        entries
            .iter()
            .map(|e| estimate_message_tokens(e.message.content.as_deref()))
            .sum()
    };

    while total(&entries) > max_history_tokens {
        let drop_pos = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.droppable.is_some())
            .min_by_key(|(_, e)| e.droppable.unwrap())
            .map(|(pos, _)| pos);

        match drop_pos {
            Some(pos) => {
                entries.remove(pos);
            }
            None => break,
        }
    }

    entries
}

/// Composes the sliding window with an intent-driven multiplier and
/// implements the `tool_use` passthrough policy.
pub struct ContextAssembler {
    window: SlidingWindow,
}

impl ContextAssembler {
    pub fn new(config: AssemblyConfig) -> Self {
        ContextAssembler {
            window: SlidingWindow::new(config),
        }
    }

    pub fn assemble(
        &self,
        request: &ChatRequest,
        intent: Intent,
        preserve_flags: &HashMap<usize, MessageFlags>,
    ) -> ChatRequest {
        if intent == Intent::ToolUse {
            info!(intent = intent.as_str(), "assembly.passthrough");
            return request.clone();
        }

        let window_mult = match intent {
            Intent::Retrieval => 1.5,
            _ => 1.0,
        };

        let messages = self.window.apply(&request.messages, preserve_flags, window_mult);

        info!(
            original = request.messages.len(),
            optimized = messages.len(),
            intent = intent.as_str(),
            "assembly.complete"
        );

        ChatRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: request.stream,
            tools: request.tools.clone(),
            tool_choice: request.tool_choice.clone(),
            extra: request.extra.clone(),
        }
    }
}
