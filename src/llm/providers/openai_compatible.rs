//! OpenAI-compatible chat completion provider (`/v1/chat/completions`).
//!
//! Covers OpenAI, Azure-style gateways, and OpenAI-compatible local servers
//! (Ollama, LM Studio…). All wire types are private to this module — callers
//! only see the provider-neutral types from [`crate::llm`]. Tool-loop
//! management belongs at the conversation layer; this provider is stateless.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, trace};

use crate::error::AppError;
use crate::llm::{ChatMessage, LlmReply, MessageRole, ParamKind, ToolCall, ToolSpec};

/// Adapter for any HTTP endpoint implementing `/v1/chat/completions`.
///
/// Constructed once at startup, then cheaply cloned because `reqwest::Client`
/// is an `Arc` internally.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    api_base_url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiCompatibleClient {
    /// Build a client from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local models. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        temperature: f32,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_base_url, model, temperature, api_key })
    }

    /// One reasoning step over the accumulated history.
    pub async fn chat(
        &self,
        system: Option<&str>,
        history: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> Result<LlmReply, AppError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if let Some(sys) = system {
            messages.push(WireMessage::text("system", sys));
        }
        for msg in history {
            messages.push(WireMessage::from_history(msg));
        }

        let tools = if tools.is_empty() {
            None
        } else {
            Some(tools.iter().map(function_schema).collect())
        };

        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature_param(),
            tools,
        };
        let parsed = self.send(&payload).await?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AppError::Provider("no choices in completion response".into()))?;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|c| ToolCall { id: c.id, name: c.function.name, arguments: c.function.arguments })
            .collect();

        Ok(LlmReply {
            text: message
                .content
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            tool_calls,
        })
    }

    /// Vision round trip: `prompt` plus one inlined `data:` image URL.
    pub async fn describe_image(
        &self,
        prompt: &str,
        image_data_url: &str,
    ) -> Result<String, AppError> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![WireMessage {
                role: "user".to_string(),
                content: Some(WireContent::Parts(vec![
                    ContentPart::text(prompt),
                    ContentPart::image(image_data_url),
                ])),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            }],
            temperature: self.temperature_param(),
            tools: None,
        };
        let parsed = self.send(&payload).await?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::Provider("empty or missing content in response".into()))
    }

    fn temperature_param(&self) -> Option<f32> {
        // Some models (gpt-5 family) do not accept a temperature parameter.
        if self.model.starts_with("gpt-5") {
            None
        } else {
            Some(self.temperature)
        }
    }

    async fn send(
        &self,
        payload: &ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, AppError> {
        debug!(
            model = %payload.model,
            messages = payload.messages.len(),
            tools = payload.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending LLM request"
        );
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string_pretty(payload)
                .unwrap_or_else(|e| format!("<serialization failed: {e}>"));
            trace!(payload = %json, "full LLM request payload");
        }

        let mut req = self.client.post(&self.api_base_url).json(payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await.map_err(|e| {
            error!(url = %self.api_base_url, error = %e, "LLM HTTP request failed (transport)");
            AppError::Provider(e.to_string())
        })?;
        let response = check_status(response).await?;

        response.json::<ChatCompletionResponse>().await.map_err(|e| {
            error!(error = %e, "failed to deserialize LLM response");
            AppError::Provider(format!("failed to parse response body: {e}"))
        })
    }
}

/// Translate a provider-neutral [`ToolSpec`] into the function-call schema
/// this API family expects.
fn function_schema(spec: &ToolSpec) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in &spec.params {
        let mut prop = serde_json::Map::new();
        match param.kind {
            ParamKind::String => {
                prop.insert("type".into(), json!("string"));
            }
            ParamKind::StringList => {
                prop.insert("type".into(), json!("array"));
                prop.insert("items".into(), json!({"type": "string"}));
            }
            ParamKind::Integer => {
                prop.insert("type".into(), json!("integer"));
            }
            ParamKind::Boolean => {
                prop.insert("type".into(), json!("boolean"));
            }
        }
        prop.insert("description".into(), json!(param.description));
        if let Some(default) = &param.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(max) = param.maximum {
            prop.insert("maximum".into(), json!(max));
        }
        properties.insert(param.name.to_string(), Value::Object(prop));
        if param.required {
            required.push(param.name);
        }
    }

    json!({
        "type": "function",
        "function": {
            "name": spec.name,
            "description": spec.description,
            "parameters": {
                "type": "object",
                "properties": properties,
                "required": required,
            },
        },
    })
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(WireContent::Text(content.to_string())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    fn from_history(msg: &ChatMessage) -> Self {
        let tool_calls = if msg.tool_calls.is_empty() {
            None
        } else {
            Some(
                msg.tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: "function".to_string(),
                        function: WireFunction {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
            )
        };
        Self {
            role: msg.role.as_str().to_string(),
            // Assistant tool-call messages legitimately carry empty content.
            content: if msg.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(WireContent::Text(msg.content.clone()))
            },
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: if msg.role == MessageRole::Tool {
                msg.tool_name.clone()
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<ImageUrl>,
}

impl ContentPart {
    fn text(text: &str) -> Self {
        Self { kind: "text".to_string(), text: Some(text.to_string()), image_url: None }
    }

    fn image(url: &str) -> Self {
        Self {
            kind: "image_url".to_string(),
            text: None,
            image_url: Some(ImageUrl { url: url.to_string() }),
        }
    }
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    code: Option<Value>,
}

/// Consume the response and return it if successful, or a structured error.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = if let Ok(env) = serde_json::from_str::<ErrorEnvelope>(&body) {
        let code = env
            .error
            .code
            .map(|v| match v {
                Value::String(s) => format!(" [code={s}]"),
                other => format!(" [code={other}]"),
            })
            .unwrap_or_default();
        format!("HTTP {status}{code}: {}", env.error.message)
    } else {
        format!("HTTP {status}: {body}")
    };

    error!(%status, %message, "LLM request returned HTTP error");
    Err(AppError::Provider(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ParamSpec;

    fn sample_spec() -> ToolSpec {
        ToolSpec {
            name: "file-filter-search",
            description: "search uploaded files",
            params: vec![
                ParamSpec {
                    name: "filter_file_name",
                    kind: ParamKind::StringList,
                    description: "file names to pick",
                    required: false,
                    default: None,
                    maximum: None,
                },
                ParamSpec {
                    name: "limit_by",
                    kind: ParamKind::Integer,
                    description: "max records",
                    required: false,
                    default: Some(json!(4)),
                    maximum: Some(10),
                },
            ],
        }
    }

    #[test]
    fn function_schema_carries_defaults_and_bounds() {
        let schema = function_schema(&sample_spec());
        let params = &schema["function"]["parameters"]["properties"];
        assert_eq!(params["filter_file_name"]["type"], "array");
        assert_eq!(params["filter_file_name"]["items"]["type"], "string");
        assert_eq!(params["limit_by"]["default"], 4);
        assert_eq!(params["limit_by"]["maximum"], 10);
        assert_eq!(schema["function"]["name"], "file-filter-search");
    }

    #[test]
    fn function_schema_lists_required_params_only() {
        let mut spec = sample_spec();
        spec.params[0].required = true;
        let schema = function_schema(&spec);
        let required = schema["function"]["parameters"]["required"]
            .as_array()
            .expect("required array");
        assert_eq!(required.len(), 1);
        assert_eq!(required[0], "filter_file_name");
    }

    #[test]
    fn tool_result_message_serializes_with_name_and_call_id() {
        let msg = ChatMessage::tool_result("call_9", "file-filter-search", "{\"readable\":[]}");
        let wire = WireMessage::from_history(&msg);
        let v = serde_json::to_value(&wire).expect("serialize");
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "call_9");
        assert_eq!(v["name"], "file-filter-search");
    }

    #[test]
    fn assistant_tool_call_message_omits_empty_content() {
        let msg = ChatMessage::assistant_tool_calls(vec![ToolCall {
            id: "call_1".into(),
            name: "previous-chat-filter-search".into(),
            arguments: "{}".into(),
        }]);
        let wire = WireMessage::from_history(&msg);
        let v = serde_json::to_value(&wire).expect("serialize");
        assert!(v.get("content").is_none());
        assert_eq!(v["tool_calls"][0]["function"]["name"], "previous-chat-filter-search");
    }
}
