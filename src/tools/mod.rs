//! Retrieval tools exposed to the conversation loop.
//!
//! Two callable capabilities — file-context search and previous-chat search —
//! both scoped by the caller's identity and role. Each tool declares its
//! parameters as a typed [`ToolSpec`]; the provider adapter turns that into
//! whatever schema the reasoning API wants. Tool input is validated here:
//! malformed dates and missing caller context are hard errors, raised before
//! any store query runs.

mod chat_search;
mod file_search;

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::embedding::EmbeddingClient;
use crate::error::AppError;
use crate::llm::{ChatMessage, MessageRole, ParamKind, ParamSpec, ToolSpec};
use crate::store::{AccessRole, GraphStore};

pub const FILE_SEARCH: &str = "file-filter-search";
pub const CHAT_SEARCH: &str = "previous-chat-filter-search";

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("date pattern"));

/// Reject any date filter that is not exactly `yyyy-MM-dd`.
pub fn validate_date(field: &str, value: &str) -> Result<(), AppError> {
    if DATE_PATTERN.is_match(value) {
        Ok(())
    } else {
        Err(AppError::Rejected(format!("{field} must be in yyyy-MM-dd format")))
    }
}

/// Who is asking, extracted from the conversation state.
#[derive(Debug, Clone)]
pub struct CallerContext {
    pub username: String,
    pub role: AccessRole,
}

/// Pull the caller's identity from the first user-authored message's
/// metadata. Absence of the message, the metadata, or the username is a
/// fatal precondition failure for the tool invocation.
pub fn caller_context(history: &[ChatMessage]) -> Result<CallerContext, AppError> {
    let meta = history
        .iter()
        .find(|m| m.role == MessageRole::User)
        .and_then(|m| m.meta.as_ref())
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AppError::Rejected("could not find user message containing user metadata".into())
        })?;

    let username = meta
        .get("username")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Rejected("could not find username in user metadata".into()))?;
    let role = meta
        .get("role")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Rejected("could not find role in user metadata".into()))?;

    Ok(CallerContext {
        username: username.to_string(),
        role: AccessRole::parse(role),
    })
}

/// Structured result of one tool run. `readable` goes back to the model;
/// `metadata` carries side-channel payloads (image data) that the UI consumes
/// and the history sanitizer strips before the next reasoning step.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub readable: Value,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn to_json(&self) -> Value {
        let mut out = json!({"readable": self.readable});
        if let Some(meta) = &self.metadata {
            out["metadata"] = meta.clone();
        }
        out
    }
}

/// The tools offered to the reasoning provider, with store access to run them.
#[derive(Debug, Clone)]
pub struct Toolbox {
    store: GraphStore,
    embedder: EmbeddingClient,
}

impl Toolbox {
    pub fn new(store: GraphStore, embedder: EmbeddingClient) -> Self {
        Self { store, embedder }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        vec![file_search_spec(), chat_search_spec()]
    }

    /// Run one tool call against the caller context carried in `history`.
    pub async fn execute(
        &self,
        tool: &str,
        args_json: &str,
        history: &[ChatMessage],
    ) -> Result<ToolOutput, AppError> {
        let ctx = caller_context(history)?;
        match tool {
            FILE_SEARCH => {
                let args = parse_args(args_json)?;
                file_search::run(&self.store, &self.embedder, &ctx, args).await
            }
            CHAT_SEARCH => {
                let args = parse_args(args_json)?;
                chat_search::run(&self.store, &self.embedder, &ctx, args).await
            }
            other => Err(AppError::Rejected(format!("unknown tool: {other}"))),
        }
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(args_json: &str) -> Result<T, AppError> {
    serde_json::from_str(args_json)
        .map_err(|e| AppError::Rejected(format!("malformed tool arguments: {e}")))
}

fn file_search_spec() -> ToolSpec {
    ToolSpec {
        name: FILE_SEARCH,
        description: "Search the user's current or previously uploaded files. Supports \
            filename lookup (full contents), upload-date range filters (UTC, inclusive), \
            and similarity search over file chunks via similarity_search_message. Set \
            show_image together with filter_file_name to return image payloads for \
            jpeg/png/pdf files. Resolve relative time references against the user \
            message timestamps before filling date filters.",
        params: vec![
            ParamSpec {
                name: "filter_file_name",
                kind: ParamKind::StringList,
                description: "File names for which uploaded files will be picked; use when \
                    exact names are known or images must be shown",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "filter_date_from",
                kind: ParamKind::String,
                description: "Files uploaded starting from this date (inclusive), format \
                    yyyy-MM-dd",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "filter_date_till",
                kind: ParamKind::String,
                description: "Files uploaded till this date (inclusive), format yyyy-MM-dd",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "similarity_search_message",
                kind: ParamKind::String,
                description: "Keywords or phrase for similarity search over file chunks; \
                    leave empty when fetching whole files by name",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "limit_by",
                kind: ParamKind::Integer,
                description: "Limits number of output records, maximum is 10",
                required: false,
                default: Some(json!(4)),
                maximum: Some(10),
            },
            ParamSpec {
                name: "show_image",
                kind: ParamKind::Boolean,
                description: "With filter_file_name, return the files' image payloads for \
                    display; works for jpeg/png/pdf files only",
                required: false,
                default: Some(json!(false)),
                maximum: None,
            },
        ],
    }
}

fn chat_search_spec() -> ToolSpec {
    ToolSpec {
        name: CHAT_SEARCH,
        description: "Search past conversations with the current user. Supports date range \
            filters (UTC, inclusive) and similarity search over past exchanges via \
            similarity_search_message. Returns whole sessions: the root timestamp plus \
            the full turn chain. Resolve relative time references against the user \
            message timestamps before filling date filters.",
        params: vec![
            ParamSpec {
                name: "filter_date_from",
                kind: ParamKind::String,
                description: "Chat messages to consider starting from this date (inclusive), \
                    format yyyy-MM-dd",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "filter_date_till",
                kind: ParamKind::String,
                description: "Chat messages to consider till this date (inclusive), format \
                    yyyy-MM-dd",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "similarity_search_message",
                kind: ParamKind::String,
                description: "Keywords or phrase for similarity search over older chat \
                    messages; leave empty to fetch the most recent sessions",
                required: false,
                default: None,
                maximum: None,
            },
            ParamSpec {
                name: "limit_by",
                kind: ParamKind::Integer,
                description: "Limits number of output records, maximum is 10",
                required: false,
                default: Some(json!(10)),
                maximum: Some(10),
            },
        ],
    }
}
