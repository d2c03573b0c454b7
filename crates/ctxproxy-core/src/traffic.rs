//! Traffic analyzer: per-request token accounting and rolling stats.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::token::estimate_message_tokens;
use crate::types::{Intent, Message};

const MAX_HISTORY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub original_tokens: usize,
    pub optimized_tokens: usize,
    pub tokens_saved: usize,
    pub intent: Intent,
    pub optimization_applied: bool,
    pub response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub total_tokens_saved: usize,
    pub avg_savings_pct: f64,
    pub optimization_rate: f64,
    pub intent_distribution: HashMap<String, usize>,
}

/// Bounded history of the last `MAX_HISTORY` requests, behind a single
/// mutex (read and write paths share the same short critical section).
pub struct TrafficAnalyzer {
    history: Mutex<VecDeque<RequestMetrics>>,
}

impl TrafficAnalyzer {
    pub fn new() -> Self {
        TrafficAnalyzer {
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    fn count_message_tokens(messages: &[Message]) -> usize {
        messages.iter().map(|m| estimate_message_tokens(m.content.as_deref())).sum()
    }

    /// Count tokens in both message lists, record the resulting metrics,
    /// and evict the oldest entry if the history is at capacity.
    pub fn analyze_request(
        &self,
        request_id: String,
        model: String,
        original_messages: &[Message],
        optimized_messages: &[Message],
        intent: Intent,
        optimization_enabled: bool,
        response_time_ms: f64,
    ) -> RequestMetrics {
        let original_tokens = Self::count_message_tokens(original_messages);
        let optimized_tokens = Self::count_message_tokens(optimized_messages);
        let tokens_saved = original_tokens.saturating_sub(optimized_tokens);

        let metrics = RequestMetrics {
            request_id,
            timestamp: Utc::now(),
            model,
            original_tokens,
            optimized_tokens,
            tokens_saved,
            intent,
            optimization_applied: optimization_enabled && tokens_saved > 0,
            response_time_ms,
        };

        let mut history = self.history.lock().unwrap();
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(metrics.clone());

        info!(
            request_id = %metrics.request_id,
            original_tokens,
            optimized_tokens,
            tokens_saved,
            intent = intent.as_str(),
            "traffic.analyzed"
        );

        metrics
    }

    pub fn get_stats(&self) -> TrafficStats {
        let history = self.history.lock().unwrap();
        if history.is_empty() {
            return TrafficStats::default();
        }

        let total_requests = history.len();
        let total_saved: usize = history.iter().map(|m| m.tokens_saved).sum();
        let avg_savings_pct = history
            .iter()
            .map(|m| m.tokens_saved as f64 / m.original_tokens.max(1) as f64 * 100.0)
            .sum::<f64>()
            / total_requests as f64;
        let optimization_rate =
            history.iter().filter(|m| m.optimization_applied).count() as f64 / total_requests as f64 * 100.0;

        let mut intent_distribution = HashMap::new();
        for m in history.iter() {
            *intent_distribution.entry(m.intent.as_str().to_string()).or_insert(0) += 1;
        }

        TrafficStats {
            total_requests,
            total_tokens_saved: total_saved,
            avg_savings_pct,
            optimization_rate,
            intent_distribution,
        }
    }

    pub fn recent(&self, n: usize) -> Vec<RequestMetrics> {
        let history = self.history.lock().unwrap();
        history.iter().rev().take(n).cloned().collect()
    }
}

impl Default for TrafficAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[test]
    fn tokens_saved_is_never_negative() {
        let analyzer = TrafficAnalyzer::new();
        let original = vec![msg("short")];
        let optimized = vec![msg("a much longer message than the original one")];
        let metrics = analyzer.analyze_request(
            "abc123".to_string(),
            "gpt-4".to_string(),
            &original,
            &optimized,
            Intent::Casual,
            true,
            12.0,
        );
        assert_eq!(metrics.tokens_saved, 0);
        assert!(!metrics.optimization_applied);
    }

    #[test]
    fn optimization_applied_requires_actual_savings() {
        let analyzer = TrafficAnalyzer::new();
        let original: Vec<Message> = (0..10).map(|i| msg(&format!("message number {i}"))).collect();
        let optimized = vec![original.last().unwrap().clone()];
        let metrics = analyzer.analyze_request(
            "abc123".to_string(),
            "gpt-4".to_string(),
            &original,
            &optimized,
            Intent::Casual,
            true,
            5.0,
        );
        assert!(metrics.tokens_saved > 0);
        assert!(metrics.optimization_applied);
    }

    #[test]
    fn optimization_disabled_is_never_applied_even_with_savings() {
        let analyzer = TrafficAnalyzer::new();
        let original: Vec<Message> = (0..5).map(|i| msg(&format!("message {i}"))).collect();
        let optimized = vec![original.last().unwrap().clone()];
        let metrics = analyzer.analyze_request(
            "abc123".to_string(),
            "gpt-4".to_string(),
            &original,
            &optimized,
            Intent::Casual,
            false,
            5.0,
        );
        assert!(!metrics.optimization_applied);
    }

    #[test]
    fn history_evicts_oldest_past_capacity() {
        let analyzer = TrafficAnalyzer::new();
        for i in 0..(MAX_HISTORY + 5) {
            analyzer.analyze_request(
                format!("req-{i}"),
                "gpt-4".to_string(),
                &[msg("x")],
                &[msg("x")],
                Intent::Casual,
                true,
                1.0,
            );
        }
        let stats = analyzer.get_stats();
        assert_eq!(stats.total_requests, MAX_HISTORY);
    }

    #[test]
    fn stats_empty_history_is_zeroed() {
        let analyzer = TrafficAnalyzer::new();
        let stats = analyzer.get_stats();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_savings_pct, 0.0);
    }

    #[test]
    fn intent_distribution_counts_each_bucket() {
        let analyzer = TrafficAnalyzer::new();
        analyzer.analyze_request("a".to_string(), "gpt-4".to_string(), &[msg("x")], &[msg("x")], Intent::Coding, true, 1.0);
        analyzer.analyze_request("b".to_string(), "gpt-4".to_string(), &[msg("x")], &[msg("x")], Intent::Coding, true, 1.0);
        analyzer.analyze_request("c".to_string(), "gpt-4".to_string(), &[msg("x")], &[msg("x")], Intent::Casual, true, 1.0);
        let stats = analyzer.get_stats();
        assert_eq!(stats.intent_distribution.get("coding"), Some(&2));
        assert_eq!(stats.intent_distribution.get("casual"), Some(&1));
    }

    #[test]
    fn recent_returns_most_recent_first() {
        let analyzer = TrafficAnalyzer::new();
        analyzer.analyze_request("a".to_string(), "gpt-4".to_string(), &[msg("x")], &[msg("x")], Intent::Casual, true, 1.0);
        analyzer.analyze_request("b".to_string(), "gpt-4".to_string(), &[msg("x")], &[msg("x")], Intent::Casual, true, 1.0);
        let recent = analyzer.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].request_id, "b");
    }
}
