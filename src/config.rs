//! Configuration loading.
//!
//! Settings come from a TOML file (default `config/default.toml`), with the
//! log level overridable via `DOCENT_LOG_LEVEL`. Secrets never live in TOML:
//! the graph password and provider API keys are read from the environment
//! only (see [`Secrets`]), with `.env` support via `dotenvy` at startup.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ── Resolved config ──────────────────────────────────────────────────────────

/// Graph store connection settings (HTTP transactional endpoint).
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Full transactional-commit endpoint URL.
    pub uri: String,
    /// Basic-auth user. The password comes from `GRAPH_PASSWORD`.
    pub user: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Reasoning provider settings (`/chat/completions`-compatible endpoint).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Provider backend: `"openai_compatible"` or `"dummy"`.
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

/// Embedding provider settings (`/embeddings`-compatible endpoint).
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Provider backend: `"http"` or `"fixed"`.
    pub provider: String,
    pub api_base_url: String,
    pub model: String,
    pub timeout_seconds: u64,
}

/// Ingestion pipeline knobs.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Characters per text chunk (no overlap).
    pub chunk_chars: usize,
    /// Character cap applied to the file-summary prompt.
    pub summary_prompt_budget: usize,
}

/// Conversation loop knobs.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Character budget for history trimming before each reasoning step.
    pub history_budget: usize,
    /// Ceiling on reasoning/tool-execution alternations per user turn.
    pub max_steps: usize,
    /// How many recent chat sessions to load at session start.
    pub recent_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub ingest: IngestConfig,
    pub chat: ChatConfig,
}

/// Environment-only credentials.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub graph_password: Option<String>,
    pub llm_api_key: Option<String>,
    pub embedding_api_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            graph_password: env::var("GRAPH_PASSWORD").ok(),
            llm_api_key: env::var("LLM_API_KEY").ok(),
            embedding_api_key: env::var("EMBEDDING_API_KEY").ok(),
        }
    }
}

// ── Raw TOML shapes ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    log: RawLog,
    #[serde(default)]
    graph: RawGraph,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    embedding: RawEmbedding,
    #[serde(default)]
    ingest: RawIngest,
    #[serde(default)]
    chat: RawChat,
}

#[derive(Debug, Default, Deserialize)]
struct RawLog {
    level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGraph {
    uri: Option<String>,
    user: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawLlm {
    provider: Option<String>,
    api_base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEmbedding {
    provider: Option<String>,
    api_base_url: Option<String>,
    model: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawIngest {
    chunk_chars: Option<usize>,
    summary_prompt_budget: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawChat {
    history_budget: Option<usize>,
    max_steps: Option<usize>,
    recent_sessions: Option<usize>,
}

// ── Loading ──────────────────────────────────────────────────────────────────

/// Load config from `path`, or [`DEFAULT_CONFIG_PATH`] when `None`.
///
/// A missing default file yields built-in defaults; a missing explicit path is
/// an error. `DOCENT_LOG_LEVEL` overrides the configured log level.
pub fn load(path: Option<&str>) -> Result<Config, AppError> {
    let raw = match path {
        Some(p) => parse_file(Path::new(p))?,
        None => {
            let p = Path::new(DEFAULT_CONFIG_PATH);
            if p.exists() {
                parse_file(p)?
            } else {
                RawConfig::default()
            }
        }
    };
    Ok(resolve(raw))
}

fn parse_file(path: &Path) -> Result<RawConfig, AppError> {
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    toml::from_str(&text)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))
}

fn resolve(raw: RawConfig) -> Config {
    let log_level = env::var("DOCENT_LOG_LEVEL")
        .ok()
        .or(raw.log.level)
        .unwrap_or_else(|| "info".to_string());

    Config {
        log_level,
        graph: GraphConfig {
            uri: raw
                .graph
                .uri
                .unwrap_or_else(|| "http://localhost:7474/db/neo4j/tx/commit".to_string()),
            user: raw.graph.user.unwrap_or_else(|| "neo4j".to_string()),
            timeout_seconds: raw.graph.timeout_seconds.unwrap_or(30),
        },
        llm: LlmConfig {
            provider: raw
                .llm
                .provider
                .unwrap_or_else(|| "openai_compatible".to_string()),
            api_base_url: raw
                .llm
                .api_base_url
                .unwrap_or_else(|| "https://api.openai.com/v1/chat/completions".to_string()),
            model: raw.llm.model.unwrap_or_else(|| "gpt-4o".to_string()),
            temperature: raw.llm.temperature.unwrap_or(0.0),
            timeout_seconds: raw.llm.timeout_seconds.unwrap_or(120),
        },
        embedding: EmbeddingConfig {
            provider: raw.embedding.provider.unwrap_or_else(|| "http".to_string()),
            api_base_url: raw
                .embedding
                .api_base_url
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".to_string()),
            model: raw
                .embedding
                .model
                .unwrap_or_else(|| "text-embedding-3-small".to_string()),
            timeout_seconds: raw.embedding.timeout_seconds.unwrap_or(30),
        },
        ingest: IngestConfig {
            chunk_chars: raw.ingest.chunk_chars.unwrap_or(2000),
            summary_prompt_budget: raw.ingest.summary_prompt_budget.unwrap_or(32_000),
        },
        chat: ChatConfig {
            history_budget: raw.chat.history_budget.unwrap_or(30_000),
            max_steps: raw.chat.max_steps.unwrap_or(25),
            recent_sessions: raw.chat.recent_sessions.unwrap_or(3),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_resolve() {
        let cfg = resolve(RawConfig::default());
        assert_eq!(cfg.ingest.chunk_chars, 2000);
        assert_eq!(cfg.chat.history_budget, 30_000);
        assert_eq!(cfg.chat.max_steps, 25);
        assert_eq!(cfg.graph.user, "neo4j");
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            f,
            "[ingest]\nchunk_chars = 512\n\n[llm]\nmodel = \"local-model\"\n"
        )
        .expect("write");

        let cfg = load(Some(f.path().to_str().unwrap())).expect("load");
        assert_eq!(cfg.ingest.chunk_chars, 512);
        assert_eq!(cfg.llm.model, "local-model");
        // untouched sections keep defaults
        assert_eq!(cfg.ingest.summary_prompt_budget, 32_000);
    }

    #[test]
    fn missing_explicit_path_errors() {
        assert!(load(Some("/nonexistent/docent.toml")).is_err());
    }
}
