use std::path::Path;

use anyhow::Result;

use crate::config::RuntimeConfig;
use crate::provider::{detect_provider, env_present};
use crate::todos::TodoStore;

pub fn run_doctor(cfg: &RuntimeConfig) -> Result<()> {
    println!(
        "Active profile: '{}' (config: {})",
        cfg.profile, cfg.config_path
    );

    let checks = [
        ("OPENAI_API_KEY", env_present("OPENAI_API_KEY")),
        ("OPENAI_BASE_URL", env_present("OPENAI_BASE_URL")),
        ("OLLAMA_HOST", env_present("OLLAMA_HOST")),
        (
            "AGENT_ROUTER_SERVER_AUTH_TOKEN",
            env_present("AGENT_ROUTER_SERVER_AUTH_TOKEN"),
        ),
    ];

    println!("Provider environment check:");
    for (key, ok) in checks {
        let status = if ok { "set" } else { "missing" };
        println!("- {key}: {status}");
    }

    println!(
        "Provider: configured={} auto_resolution={}",
        cfg.provider.label(),
        detect_provider().label()
    );
    println!(
        "Model: {} host={} timeout_secs={}",
        cfg.model.as_deref().unwrap_or("<provider-default>"),
        cfg.model_host.as_deref().unwrap_or("<provider-default>"),
        cfg.request_timeout_secs
    );
    println!(
        "Retries: extraction_max_retries={} extraction_retry_delay_ms={} planner_max_attempts={}",
        cfg.extraction_max_retries, cfg.extraction_retry_delay_ms, cfg.planner_max_attempts
    );

    let store = TodoStore::from_template(&cfg.store_path);
    match store.load() {
        Ok(records) => println!(
            "Todo store: {} ({} records)",
            store.path().display(),
            records.len()
        ),
        Err(err) => println!("Todo store: {} unreadable: {err:#}", store.path().display()),
    }

    let telemetry_dir = Path::new(&cfg.telemetry_path)
        .parent()
        .map(|parent| parent.display().to_string())
        .unwrap_or_default();
    println!(
        "Telemetry: enabled={} path={} dir={}",
        cfg.telemetry_enabled, cfg.telemetry_path, telemetry_dir
    );

    Ok(())
}
