use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cli::Provider;
use crate::config::RuntimeConfig;
use crate::model::ChatModel;
use crate::model::ollama::{DEFAULT_OLLAMA_HOST, OllamaModel};
use crate::model::openai::{DEFAULT_OPENAI_BASE_URL, OpenAiModel};

pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

pub fn resolve_model(cfg: &RuntimeConfig) -> Result<(Arc<dyn ChatModel>, Provider, String)> {
    let provider = match cfg.provider {
        Provider::Auto => detect_provider(),
        p => p,
    };
    let timeout = Duration::from_secs(cfg.request_timeout_secs);

    match provider {
        Provider::Openai => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY is required for OpenAI provider")?;
            let base_url = cfg
                .model_host
                .clone()
                .or_else(|| env_value("OPENAI_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());
            let model_name = cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
            let model = OpenAiModel::new(&base_url, &api_key, &model_name, timeout)?;
            Ok((Arc::new(model), provider, model_name))
        }
        Provider::Ollama | Provider::Auto => {
            let host = cfg
                .model_host
                .clone()
                .or_else(|| env_value("OLLAMA_HOST"))
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            let model_name = cfg
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());
            let model = OllamaModel::new(&normalize_host(&host), &model_name, timeout)?;
            Ok((Arc::new(model), Provider::Ollama, model_name))
        }
    }
}

/// OpenAI when a key is exported, otherwise a local Ollama server.
pub fn detect_provider() -> Provider {
    if env_present("OPENAI_API_KEY") {
        return Provider::Openai;
    }
    Provider::Ollama
}

pub fn env_present(key: &str) -> bool {
    std::env::var(key)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `OLLAMA_HOST` is often exported as a bare `host:port`.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_gain_a_scheme() {
        assert_eq!(normalize_host("127.0.0.1:11434"), "http://127.0.0.1:11434");
        assert_eq!(normalize_host("https://gpu.local/"), "https://gpu.local");
    }
}
