//! Concrete reasoning provider backends.

pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::error::AppError;
use crate::llm::LlmClient;

/// Build the configured backend. `api_key` comes from `LLM_API_KEY` env —
/// never TOML.
pub fn build(config: &LlmConfig, api_key: Option<String>) -> Result<LlmClient, AppError> {
    match config.provider.as_str() {
        "openai_compatible" => Ok(LlmClient::OpenAiCompatible(
            openai_compatible::OpenAiCompatibleClient::new(
                config.api_base_url.clone(),
                config.model.clone(),
                config.temperature,
                config.timeout_seconds,
                api_key,
            )?,
        )),
        "dummy" => Ok(LlmClient::Dummy(dummy::DummyClient::echo())),
        other => Err(AppError::Config(format!("unknown llm provider: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            api_base_url: "http://localhost:11434/v1/chat/completions".to_string(),
            model: "test-model".to_string(),
            temperature: 0.0,
            timeout_seconds: 5,
        }
    }

    #[test]
    fn builds_known_providers() {
        assert!(build(&config_for("openai_compatible"), None).is_ok());
        assert!(build(&config_for("dummy"), None).is_ok());
    }

    #[test]
    fn unknown_provider_errors() {
        assert!(build(&config_for("wizard"), None).is_err());
    }
}
