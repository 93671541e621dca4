//! Pre-reasoning history mutation.
//!
//! Two passes run before every reasoning step: file-retrieval tool results
//! lose their `metadata` field (image payloads must not be re-sent to the
//! model), and message contents are trimmed newest-first under a shrinking
//! character budget.

use serde_json::Value;
use tracing::debug;

use crate::llm::{ChatMessage, MessageRole};
use crate::tools::FILE_SEARCH;

pub const TRUNCATION_NOTICE: &str = "...message is too long, truncating rest";

/// Strip the `metadata` field from past file-search tool results.
pub fn sanitize_file_tool_results(history: &mut [ChatMessage]) {
    for msg in history.iter_mut() {
        if msg.role != MessageRole::Tool || msg.tool_name.as_deref() != Some(FILE_SEARCH) {
            continue;
        }
        let Ok(Value::Object(mut payload)) = serde_json::from_str::<Value>(&msg.content) else {
            continue;
        };
        if payload.remove("metadata").is_some() {
            msg.content = Value::Object(payload).to_string();
            debug!("stripped metadata from file-search tool result");
        }
    }
}

/// Greedy reverse-chronological trimming.
///
/// Walking newest to oldest, any message longer than 70% of the remaining
/// budget is cut to that limit (truncation notice included), and the limit is
/// deducted from the budget. Each truncation shrinks the allowance for older
/// messages geometrically; content only ever gets shorter.
pub fn trim_history(history: &mut [ChatMessage], budget: usize) {
    let mut remaining = budget;
    for msg in history.iter_mut().rev() {
        let limit = remaining * 7 / 10;
        let length = msg.content.chars().count();
        if length <= limit {
            continue;
        }

        let notice_len = TRUNCATION_NOTICE.chars().count();
        msg.content = if limit > notice_len {
            let mut cut: String = msg.content.chars().take(limit - notice_len).collect();
            cut.push_str(TRUNCATION_NOTICE);
            cut
        } else {
            msg.content.chars().take(limit).collect()
        };
        debug!(from = length, to = limit, "trimmed history message");
        remaining -= limit;
    }
}
