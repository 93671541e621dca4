//! Reasoning provider abstraction.
//!
//! `LlmClient` is an enum over concrete provider implementations; add a new
//! variant + module in `providers/` for each additional backend. Enum dispatch
//! avoids `dyn` trait objects and the `async-trait` dependency.
//!
//! This module also owns the provider-neutral message history and tool-call
//! contract types. Each tool declares its parameters as an explicit
//! [`ToolSpec`]; translating that into a provider's schema format is the
//! provider module's job.

pub mod providers;

use serde_json::Value;

use crate::error::AppError;

pub use providers::dummy::DummyClient;
pub use providers::openai_compatible::OpenAiCompatibleClient;

// ── Message history ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

/// A structured tool-invocation request returned by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument object, exactly as the model produced it.
    pub arguments: String,
}

/// One entry of the conversation history.
///
/// `meta` rides along on user messages (timestamp, username, role, timezone)
/// and is never sent to the provider; tools read the caller context from it.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Set on assistant messages that request tool execution.
    pub tool_calls: Vec<ToolCall>,
    /// Set on tool-result messages: the call this message answers.
    pub tool_call_id: Option<String>,
    /// Set on tool-result messages: the tool that produced it.
    pub tool_name: Option<String>,
    pub meta: Option<Value>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>, meta: Value) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            meta: Some(meta),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            meta: None,
        }
    }

    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
            tool_name: None,
            meta: None,
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            meta: None,
        }
    }
}

/// Model output for one reasoning step: free text, tool-invocation requests,
/// or (rarely) both.
#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

// ── Tool-call contract ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    StringList,
    Integer,
    Boolean,
}

/// One declared tool parameter: name, type, optionality, default, bounds.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    pub default: Option<Value>,
    pub maximum: Option<i64>,
}

/// Provider-neutral declaration of a callable tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
}

// ── Client enum ──────────────────────────────────────────────────────────────

/// All available reasoning backends.
///
/// Client instances are shared immutable capabilities — clone them freely.
#[derive(Debug, Clone)]
pub enum LlmClient {
    OpenAiCompatible(OpenAiCompatibleClient),
    Dummy(DummyClient),
}

impl LlmClient {
    /// One reasoning step over the full history, with optional tool
    /// declarations the model may invoke.
    pub async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, AppError> {
        match self {
            LlmClient::OpenAiCompatible(c) => c.chat(system, history, tools).await,
            LlmClient::Dummy(c) => c.chat(system, history, tools).await,
        }
    }

    /// Single tool-less round trip: `content` as the sole user message.
    pub async fn complete(&self, system: Option<&str>, content: &str) -> Result<String, AppError> {
        let history = [ChatMessage::user(content, Value::Null)];
        let reply = self.chat(system, &history, &[]).await?;
        reply
            .text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Provider("empty or missing content in response".into()))
    }

    /// Vision round trip: `prompt` plus one inlined `data:` image URL.
    pub async fn describe_image(
        &self,
        prompt: &str,
        image_data_url: &str,
    ) -> Result<String, AppError> {
        match self {
            LlmClient::OpenAiCompatible(c) => c.describe_image(prompt, image_data_url).await,
            LlmClient::Dummy(c) => c.describe_image(prompt, image_data_url).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id_and_name() {
        let m = ChatMessage::tool_result("call_1", "file-filter-search", "{}");
        assert_eq!(m.role, MessageRole::Tool);
        assert_eq!(m.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(m.tool_name.as_deref(), Some("file-filter-search"));
    }

    #[tokio::test]
    async fn complete_rejects_empty_reply() {
        let client = LlmClient::Dummy(DummyClient::scripted(vec![LlmReply::default()]));
        assert!(client.complete(None, "hello").await.is_err());
    }
}
