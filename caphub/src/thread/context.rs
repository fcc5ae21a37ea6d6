//! Context-window assembly: fit a thread into an agent's token budget.
//!
//! Three strategies: `recent` (newest until budget), `summary` (stored
//! summary replaces the covered prefix), `hybrid` (summary + pinned decision
//! points + recent tail). A minimum tail of verbatim messages is always
//! retained, even when it overshoots the budget.

use serde::{Deserialize, Serialize};

use crate::thread::{Thread, ThreadMessage};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStrategy {
    #[default]
    Recent,
    Summary,
    Hybrid,
}

#[derive(Clone, Copy, Debug)]
pub struct ContextPolicy {
    pub strategy: ContextStrategy,
    /// Newest messages always included verbatim.
    pub min_tail: usize,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            strategy: ContextStrategy::Recent,
            min_tail: 4,
        }
    }
}

/// Assembled prompt context.
#[derive(Clone, Debug, Serialize)]
pub struct ContextWindow {
    pub messages: Vec<ThreadMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub token_estimate: u32,
    /// True when at least one log message was left out.
    pub truncated: bool,
}

/// 4 chars ≈ 1 token. Good enough for budgeting; exact counts belong to the
/// model provider.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() as u32) / 4 + 1
}

fn message_cost(message: &ThreadMessage) -> u32 {
    estimate_tokens(&message.content)
}

/// Newest-first selection honoring the budget and the minimum tail; returns
/// the kept messages in chronological order.
fn take_tail(messages: &[ThreadMessage], budget: u32, min_tail: usize) -> Vec<ThreadMessage> {
    let mut kept: Vec<ThreadMessage> = Vec::new();
    let mut used = 0u32;
    for message in messages.iter().rev() {
        let cost = message_cost(message);
        if kept.len() >= min_tail && used + cost > budget {
            break;
        }
        used += cost;
        kept.push(message.clone());
    }
    kept.reverse();
    kept
}

pub(crate) fn assemble(
    thread: &Thread,
    messages: Vec<ThreadMessage>,
    budget_tokens: u32,
    policy: &ContextPolicy,
) -> ContextWindow {
    let total = messages.len();
    match policy.strategy {
        ContextStrategy::Recent => {
            let kept = take_tail(&messages, budget_tokens, policy.min_tail);
            finish(kept, None, total)
        }
        ContextStrategy::Summary => {
            let Some(summary) = &thread.summary else {
                let kept = take_tail(&messages, budget_tokens, policy.min_tail);
                return finish(kept, None, total);
            };
            let summary_cost = estimate_tokens(&summary.content);
            let tail: Vec<ThreadMessage> = messages
                .iter()
                .filter(|m| m.seq > summary.covers_seq)
                .cloned()
                .collect();
            let kept = take_tail(
                &tail,
                budget_tokens.saturating_sub(summary_cost),
                policy.min_tail,
            );
            finish(kept, Some(summary.content.clone()), total)
        }
        ContextStrategy::Hybrid => {
            let summary = thread.summary.as_ref();
            let covers = summary.map(|s| s.covers_seq).unwrap_or(0);
            let summary_cost = summary
                .map(|s| estimate_tokens(&s.content))
                .unwrap_or(0);
            // Pinned decision points from the summarized prefix stay verbatim.
            let pinned: Vec<ThreadMessage> = messages
                .iter()
                .filter(|m| m.seq <= covers && m.metadata.pinned)
                .cloned()
                .collect();
            let pinned_cost: u32 = pinned.iter().map(message_cost).sum();
            let tail_source: Vec<ThreadMessage> = messages
                .iter()
                .filter(|m| m.seq > covers)
                .cloned()
                .collect();
            let tail = take_tail(
                &tail_source,
                budget_tokens
                    .saturating_sub(summary_cost)
                    .saturating_sub(pinned_cost),
                policy.min_tail,
            );
            let mut kept = pinned;
            kept.extend(tail);
            kept.sort_by_key(|m| m.seq);
            finish(kept, summary.map(|s| s.content.clone()), total)
        }
    }
}

fn finish(messages: Vec<ThreadMessage>, summary: Option<String>, total: usize) -> ContextWindow {
    let token_estimate = messages.iter().map(message_cost).sum::<u32>()
        + summary.as_deref().map(estimate_tokens).unwrap_or(0);
    let truncated = messages.len() < total;
    ContextWindow {
        messages,
        summary,
        token_estimate,
        truncated,
    }
}
