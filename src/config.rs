use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::{Cli, Provider};

pub const DEFAULT_STORE_PATH: &str = ".agent-router/todo-list.json";
pub const DEFAULT_TELEMETRY_PATH: &str = ".agent-router/telemetry/events.jsonl";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: String,
    pub config_path: String,
    pub provider: Provider,
    pub model: Option<String>,
    pub model_host: Option<String>,
    pub request_timeout_secs: u64,
    pub store_path: String,
    pub extraction_max_retries: u32,
    pub extraction_retry_delay_ms: u64,
    pub planner_max_attempts: u32,
    pub telemetry_enabled: bool,
    pub telemetry_path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilesFile {
    #[serde(default)]
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub model_host: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub store_path: Option<String>,
    pub extraction_max_retries: Option<u32>,
    pub extraction_retry_delay_ms: Option<u64>,
    pub planner_max_attempts: Option<u32>,
    pub telemetry_enabled: Option<bool>,
    pub telemetry_path: Option<String>,
}

pub fn load_profiles(config_path: &str) -> Result<ProfilesFile> {
    let path = Path::new(config_path);
    if !path.exists() {
        return Ok(ProfilesFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read profile config file at '{}'", path.display()))?;
    toml::from_str::<ProfilesFile>(&content).with_context(|| {
        format!(
            "invalid profile configuration in '{}'. Check profile keys and values.",
            path.display()
        )
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Merge CLI flags (and their env vars) over the selected profile over defaults.
pub fn resolve_runtime_config(cli: &Cli, profiles: &ProfilesFile) -> Result<RuntimeConfig> {
    let selected = cli.profile.trim();
    if selected.is_empty() {
        return Err(anyhow::anyhow!(
            "profile name cannot be empty. Set --profile <name>."
        ));
    }

    let profile = if selected == "default" && !profiles.profiles.contains_key("default") {
        ProfileConfig::default()
    } else {
        profiles.profiles.get(selected).cloned().ok_or_else(|| {
            let mut names = profiles.profiles.keys().cloned().collect::<Vec<String>>();
            names.sort();
            if names.is_empty() {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. No profiles are defined yet.",
                    selected,
                    cli.config_path
                )
            } else {
                anyhow::anyhow!(
                    "profile '{}' not found in '{}'. Available profiles: {}",
                    selected,
                    cli.config_path,
                    names.join(", ")
                )
            }
        })?
    };

    let provider = if cli.provider != Provider::Auto {
        cli.provider
    } else {
        profile.provider.unwrap_or(Provider::Auto)
    };

    Ok(RuntimeConfig {
        profile: selected.to_string(),
        config_path: cli.config_path.clone(),
        provider,
        model: non_empty(cli.model.clone()).or(non_empty(profile.model)),
        model_host: non_empty(cli.model_host.clone()).or(non_empty(profile.model_host)),
        request_timeout_secs: cli
            .request_timeout_secs
            .or(profile.request_timeout_secs)
            .unwrap_or(120)
            .max(1),
        store_path: non_empty(cli.store_path.clone())
            .or(non_empty(profile.store_path))
            .unwrap_or_else(|| DEFAULT_STORE_PATH.to_string()),
        extraction_max_retries: cli
            .extraction_max_retries
            .or(profile.extraction_max_retries)
            .unwrap_or(3)
            .max(1),
        extraction_retry_delay_ms: cli
            .extraction_retry_delay_ms
            .or(profile.extraction_retry_delay_ms)
            .unwrap_or(1000),
        planner_max_attempts: cli
            .planner_max_attempts
            .or(profile.planner_max_attempts)
            .unwrap_or(crate::planner::DEFAULT_PLANNER_ATTEMPTS)
            .max(1),
        telemetry_enabled: cli
            .telemetry_enabled
            .or(profile.telemetry_enabled)
            .unwrap_or(true),
        telemetry_path: non_empty(cli.telemetry_path.clone())
            .or(non_empty(profile.telemetry_path))
            .unwrap_or_else(|| DEFAULT_TELEMETRY_PATH.to_string()),
    })
}
