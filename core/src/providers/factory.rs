use crate::config::Config;
use crate::providers::openai::DEFAULT_BASE_URL;
use crate::providers::{OpenAIProvider, RetryProvider};
use crate::traits::Provider;
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;

struct Endpoint {
    name: &'static str,
    base_url: &'static str,
    key_vars: &'static [&'static str],
    requires_key: bool,
}

const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        name: "openai",
        base_url: DEFAULT_BASE_URL,
        key_vars: &["OPENAI_API_KEY", "TOOLOOP_OPENAI_API_KEY"],
        requires_key: true,
    },
    Endpoint {
        name: "openrouter",
        base_url: "https://openrouter.ai/api/v1",
        key_vars: &["OPENROUTER_API_KEY", "TOOLOOP_OPENROUTER_API_KEY"],
        requires_key: true,
    },
    Endpoint {
        name: "ollama",
        base_url: "http://localhost:11434/v1",
        key_vars: &[],
        requires_key: false,
    },
    Endpoint {
        name: "glm",
        base_url: "https://api.z.ai/api/paas/v4",
        key_vars: &["ZAI_API_KEY", "GLM_API_KEY", "TOOLOOP_ZAI_API_KEY", "TOOLOOP_GLM_API_KEY"],
        requires_key: true,
    },
];

fn endpoint(name: &str) -> Option<&'static Endpoint> {
    let name = match name {
        "zai" => "glm",
        other => other,
    };
    ENDPOINTS.iter().find(|e| e.name == name)
}

/// Builds the configured provider, wrapped in [`RetryProvider`] when retries are enabled.
pub fn create_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let provider_name = config
        .provider
        .as_deref()
        .unwrap_or("openai")
        .to_lowercase();

    let endpoint = endpoint(&provider_name).ok_or_else(|| {
        anyhow!(
            "Unknown provider: {}. Available: openai, openrouter, ollama, glm/zai",
            provider_name
        )
    })?;

    let api_key = resolve_api_key_with_fallback(endpoint.key_vars, &config.api_key);
    if endpoint.requires_key && api_key.is_empty() {
        return Err(anyhow!(
            "No API key found for {}. Set {} or api_key in the config file.",
            endpoint.name,
            endpoint.key_vars.first().copied().unwrap_or("api_key")
        ));
    }

    let provider = OpenAIProvider::new(api_key)
        .with_name(endpoint.name)
        .with_model(config.model.clone())
        .with_base_url(
            config
                .base_url
                .clone()
                .unwrap_or_else(|| endpoint.base_url.to_string()),
        );

    let provider: Arc<dyn Provider> = Arc::new(provider);
    if config.retry.max_retries > 0 {
        return Ok(Arc::new(RetryProvider::new(
            provider,
            config.retry.max_retries,
            Duration::from_millis(config.retry.backoff_ms),
        )));
    }

    Ok(provider)
}

fn resolve_api_key_with_fallback(env_vars: &[&str], config_key: &str) -> String {
    env_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| config_key.to_string())
}
