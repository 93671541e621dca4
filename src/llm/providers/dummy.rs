//! Dummy reasoning provider — scripted replies, or `[echo]` fallback.
//! Used for exercising the conversation loop and ingestion pipeline without a
//! real API key.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::llm::{ChatMessage, LlmReply, MessageRole, ToolSpec};

#[derive(Debug, Clone, Default)]
pub struct DummyClient {
    script: Arc<Mutex<VecDeque<LlmReply>>>,
}

impl DummyClient {
    /// Pure echo mode: every call answers `[echo] <last user message>`.
    pub fn echo() -> Self {
        Self::default()
    }

    /// Queue replies to be returned in order; once drained, falls back to echo.
    pub fn scripted(replies: Vec<LlmReply>) -> Self {
        Self { script: Arc::new(Mutex::new(replies.into())) }
    }

    pub async fn chat(
        &self,
        _system: Option<&str>,
        history: &[ChatMessage],
        _tools: &[ToolSpec],
    ) -> Result<LlmReply, AppError> {
        if let Some(reply) = self.pop() {
            return Ok(reply);
        }
        let last_user = history
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        Ok(LlmReply { text: Some(format!("[echo] {last_user}")), tool_calls: Vec::new() })
    }

    pub async fn describe_image(
        &self,
        prompt: &str,
        _image_data_url: &str,
    ) -> Result<String, AppError> {
        if let Some(reply) = self.pop() {
            return reply
                .text
                .ok_or_else(|| AppError::Provider("scripted reply has no text".into()));
        }
        Ok(format!("[echo] {prompt}"))
    }

    fn pop(&self) -> Option<LlmReply> {
        self.script.lock().expect("dummy script lock").pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use serde_json::Value;

    #[tokio::test]
    async fn echo_answers_last_user_message() {
        let c = DummyClient::echo();
        let history = [ChatMessage::user("hello", Value::Null)];
        let reply = c.chat(None, &history, &[]).await.unwrap();
        assert_eq!(reply.text.as_deref(), Some("[echo] hello"));
    }

    #[tokio::test]
    async fn scripted_replies_drain_in_order() {
        let c = DummyClient::scripted(vec![
            LlmReply {
                text: None,
                tool_calls: vec![ToolCall {
                    id: "call_1".into(),
                    name: "file-filter-search".into(),
                    arguments: "{}".into(),
                }],
            },
            LlmReply { text: Some("done".into()), tool_calls: Vec::new() },
        ]);

        let history = [ChatMessage::user("q", Value::Null)];
        let first = c.chat(None, &history, &[]).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        let second = c.chat(None, &history, &[]).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("done"));
        // Drained — echo fallback.
        let third = c.chat(None, &history, &[]).await.unwrap();
        assert_eq!(third.text.as_deref(), Some("[echo] q"));
    }
}
