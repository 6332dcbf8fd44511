//! Supported-model registry: maps providers to known model names and resolves
//! `(model_provider, model_name)` payload fields into a concrete client.
//!
//! Unknown model names fall back to prefix matching (so new point releases of
//! a known family resolve without a table update), then to the provider's
//! default model. The `mock` provider yields a [`QueuedLlm`] driven by the
//! script file named in `FOREMAN_MOCK_LLM_SCRIPT` — the test mode used by
//! end-to-end worker runs.

use std::sync::Arc;

use crate::llm::{AnthropicClient, LlmClient, LlmError, OpenAiClient, QueuedLlm};

pub const PROVIDER_ANTHROPIC: &str = "anthropic";
pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_MOCK: &str = "mock";

/// Env var naming the scripted-response file for the mock provider.
pub const MOCK_SCRIPT_ENV: &str = "FOREMAN_MOCK_LLM_SCRIPT";

const ANTHROPIC_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-3-7-sonnet-latest",
    "claude-3-5-sonnet-latest",
    "claude-3-5-haiku-latest",
];

const OPENAI_MODELS: &[&str] = &[
    "gpt-4.1",
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4",
    "gpt-3.5-turbo",
];

const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-7-sonnet-latest";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";

/// Known model names for a provider, or `None` for unknown providers.
pub fn models_for_provider(provider: &str) -> Option<&'static [&'static str]> {
    match provider {
        PROVIDER_ANTHROPIC => Some(ANTHROPIC_MODELS),
        PROVIDER_OPENAI => Some(OPENAI_MODELS),
        _ => None,
    }
}

/// Finds the provider owning `model_name`: exact match first, then prefix
/// match against the known families.
pub fn provider_for_model(model_name: &str) -> Option<&'static str> {
    for (provider, models) in [
        (PROVIDER_ANTHROPIC, ANTHROPIC_MODELS),
        (PROVIDER_OPENAI, OPENAI_MODELS),
    ] {
        if models.contains(&model_name) {
            return Some(provider);
        }
    }
    if model_name.starts_with("claude") {
        return Some(PROVIDER_ANTHROPIC);
    }
    if model_name.starts_with("gpt") {
        return Some(PROVIDER_OPENAI);
    }
    None
}

fn default_model(provider: &str) -> &'static str {
    match provider {
        PROVIDER_OPENAI => DEFAULT_OPENAI_MODEL,
        _ => DEFAULT_ANTHROPIC_MODEL,
    }
}

/// Resolves payload `(model_provider, model_name)` into a client.
///
/// * Both set: the provider is authoritative.
/// * Only the model set: the provider is inferred from the model name.
/// * Neither set: the anthropic default model.
pub fn resolve_client(
    provider: Option<&str>,
    model: Option<&str>,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    let provider = match (provider, model) {
        (Some(p), _) => p.to_string(),
        (None, Some(m)) => provider_for_model(m)
            .ok_or_else(|| LlmError::UnsupportedModel(m.to_string()))?
            .to_string(),
        (None, None) => PROVIDER_ANTHROPIC.to_string(),
    };

    match provider.as_str() {
        PROVIDER_ANTHROPIC => {
            let model = model.unwrap_or(DEFAULT_ANTHROPIC_MODEL);
            Ok(Arc::new(AnthropicClient::from_env(model)?))
        }
        PROVIDER_OPENAI => {
            let model = model.unwrap_or(DEFAULT_OPENAI_MODEL);
            Ok(Arc::new(OpenAiClient::from_env(model)?))
        }
        PROVIDER_MOCK => {
            let path = std::env::var(MOCK_SCRIPT_ENV).map_err(|_| {
                LlmError::MissingCredentials(format!("{MOCK_SCRIPT_ENV} (mock provider)"))
            })?;
            Ok(Arc::new(QueuedLlm::from_script_file(
                std::path::Path::new(&path),
            )?))
        }
        other => Err(LlmError::UnsupportedModel(format!(
            "unknown provider: {other} (model {})",
            model.unwrap_or(default_model(other))
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: exact model names map to their provider; unknown point
    /// releases resolve by prefix.
    #[test]
    fn provider_lookup_exact_and_prefix() {
        assert_eq!(
            provider_for_model("claude-3-5-haiku-latest"),
            Some(PROVIDER_ANTHROPIC)
        );
        assert_eq!(provider_for_model("gpt-4o"), Some(PROVIDER_OPENAI));
        assert_eq!(
            provider_for_model("claude-99-experimental"),
            Some(PROVIDER_ANTHROPIC)
        );
        assert_eq!(provider_for_model("llama-3"), None);
    }

    /// **Scenario**: the provider tables agree with the reverse lookup — every
    /// listed model resolves back to its owning provider.
    #[test]
    fn model_tables_consistent() {
        for provider in [PROVIDER_ANTHROPIC, PROVIDER_OPENAI] {
            let models = models_for_provider(provider).unwrap();
            assert!(!models.is_empty());
            for &model in models {
                assert_eq!(provider_for_model(model), Some(provider));
            }
        }
        assert!(models_for_provider(PROVIDER_MOCK).is_none());
    }

    /// **Scenario**: the mock provider requires its script env var.
    #[test]
    fn mock_provider_requires_script() {
        std::env::remove_var(MOCK_SCRIPT_ENV);
        let err = resolve_client(Some(PROVIDER_MOCK), None).unwrap_err();
        assert!(matches!(err, LlmError::MissingCredentials(_)));
    }

    /// **Scenario**: an unknown provider is rejected rather than guessed.
    #[test]
    fn unknown_provider_rejected() {
        let err = resolve_client(Some("palm"), Some("bison")).unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedModel(_)));
    }
}
