use std::collections::{BTreeSet, HashMap};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

pub fn unix_ms_now() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Clone)]
pub struct TelemetrySink {
    pub enabled: bool,
    pub path: PathBuf,
    pub run_id: String,
    pub command: String,
    pub file_lock: Arc<std::sync::Mutex<()>>,
}

impl TelemetrySink {
    pub fn new(cfg: &RuntimeConfig, command: String) -> Self {
        let run_id = format!("run-{}-{}", unix_ms_now(), std::process::id());
        Self {
            enabled: cfg.telemetry_enabled,
            path: PathBuf::from(&cfg.telemetry_path),
            run_id,
            command,
            file_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    /// Sink that drops every event; used by tests and when no config is loaded.
    pub fn disabled(command: &str) -> Self {
        Self {
            enabled: false,
            path: PathBuf::new(),
            run_id: format!("run-{}-{}", unix_ms_now(), std::process::id()),
            command: command.to_string(),
            file_lock: Arc::new(std::sync::Mutex::new(())),
        }
    }

    pub fn emit(&self, event: &str, payload: Value) {
        if !self.enabled {
            return;
        }

        let mut record = json!({
            "ts_unix_ms": unix_ms_now(),
            "event": event,
            "run_id": self.run_id,
            "command": self.command,
        });
        if let (Some(target), Value::Object(fields)) = (record.as_object_mut(), payload) {
            target.extend(fields);
        }

        if let Err(err) = self.append_event_line(&record) {
            tracing::warn!(
                event = event,
                path = %self.path.display(),
                error = %err,
                "telemetry write failed"
            );
        }
    }

    fn append_event_line(&self, value: &Value) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create telemetry directory '{}'",
                    parent.display()
                )
            })?;
        }

        let _guard = self.file_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open telemetry path '{}'", self.path.display()))?;

        serde_json::to_writer(&mut file, value).with_context(|| {
            format!("failed to serialize telemetry event for '{}'", self.command)
        })?;
        writeln!(file).context("failed to write telemetry newline")
    }
}

#[derive(Debug, Default)]
pub struct TelemetrySummary {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub parse_errors: usize,
    pub unique_runs: BTreeSet<String>,
    pub command_completed: usize,
    pub command_failed: usize,
    pub routed_conversational: usize,
    pub routed_tool: usize,
    pub plans_generated: usize,
    pub plan_attempts_failed: usize,
    pub plans_failed: usize,
    pub steps_succeeded: usize,
    pub steps_failed: usize,
    pub failing_agents: HashMap<String, usize>,
}

pub fn summarize_telemetry_lines(lines: Vec<String>, limit: usize) -> TelemetrySummary {
    let mut summary = TelemetrySummary::default();
    let max_events = limit.max(1);
    summary.total_lines = lines.len();

    for line in lines.into_iter().rev().take(max_events) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parsed = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(_) => {
                summary.parse_errors += 1;
                continue;
            }
        };

        summary.parsed_events += 1;

        if let Some(run_id) = parsed.get("run_id").and_then(Value::as_str)
            && !run_id.is_empty()
        {
            summary.unique_runs.insert(run_id.to_string());
        }

        match parsed
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or_default()
        {
            "command.completed" => summary.command_completed += 1,
            "command.failed" => summary.command_failed += 1,
            "message.routed" => match parsed.get("agent_class").and_then(Value::as_str) {
                Some("conversational") => summary.routed_conversational += 1,
                Some("tool") => summary.routed_tool += 1,
                _ => {}
            },
            "plan.generated" => summary.plans_generated += 1,
            "plan.attempt.failed" => summary.plan_attempts_failed += 1,
            "plan.failed" => summary.plans_failed += 1,
            "step.succeeded" => summary.steps_succeeded += 1,
            "step.failed" => {
                summary.steps_failed += 1;
                if let Some(agent) = parsed.get("agent").and_then(Value::as_str) {
                    *summary
                        .failing_agents
                        .entry(agent.to_string())
                        .or_insert(0) += 1;
                }
            }
            _ => {}
        }
    }

    summary
}

pub fn run_telemetry_report(
    cfg: &RuntimeConfig,
    path_override: Option<String>,
    limit: usize,
) -> Result<()> {
    let path = PathBuf::from(path_override.unwrap_or_else(|| cfg.telemetry_path.clone()));
    if !path.exists() {
        println!("No telemetry file found at '{}'.", path.display());
        return Ok(());
    }

    let file = std::fs::File::open(&path)
        .with_context(|| format!("failed to open telemetry file '{}'", path.display()))?;
    let reader = io::BufReader::new(file);
    let lines = reader
        .lines()
        .collect::<std::result::Result<Vec<String>, std::io::Error>>()
        .with_context(|| format!("failed to read telemetry file '{}'", path.display()))?;

    let summary = summarize_telemetry_lines(lines, limit);

    println!("Telemetry report");
    println!("Path: {}", path.display());
    println!("Lines in file: {}", summary.total_lines);
    println!(
        "Events analyzed: {} (parse_errors={})",
        summary.parsed_events, summary.parse_errors
    );
    println!("Unique runs: {}", summary.unique_runs.len());
    println!(
        "Command outcomes: completed={} failed={}",
        summary.command_completed, summary.command_failed
    );
    println!(
        "Routing: conversational={} tool={}",
        summary.routed_conversational, summary.routed_tool
    );
    println!(
        "Planning: generated={} failed={} rejected_attempts={}",
        summary.plans_generated, summary.plans_failed, summary.plan_attempts_failed
    );
    println!(
        "Steps: succeeded={} failed={}",
        summary.steps_succeeded, summary.steps_failed
    );

    let mut failing = summary.failing_agents.iter().collect::<Vec<_>>();
    failing.sort_by_key(|(name, count)| (std::cmp::Reverse(**count), (*name).clone()));
    if !failing.is_empty() {
        println!("Agents with failed steps:");
        for (name, count) in failing.into_iter().take(5) {
            println!("- {}: {}", name, count);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_routing_planning_and_step_events() {
        let lines = vec![
            r#"{"event":"message.routed","agent_class":"tool","run_id":"r1","command":"ask","ts_unix_ms":10}"#,
            r#"{"event":"plan.attempt.failed","attempt":1,"run_id":"r1","command":"ask"}"#,
            r#"{"event":"plan.generated","attempt":2,"run_id":"r1","command":"ask"}"#,
            r#"{"event":"step.succeeded","agent":"todo_agent","run_id":"r1","command":"ask"}"#,
            r#"{"event":"step.failed","agent":"ghost_agent","run_id":"r1","command":"ask"}"#,
            r#"{"event":"message.routed","agent_class":"conversational","run_id":"r2","command":"chat","ts_unix_ms":42}"#,
            "not json",
            "",
        ]
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

        let summary = summarize_telemetry_lines(lines, 100);
        assert_eq!(summary.total_lines, 8);
        assert_eq!(summary.parse_errors, 1);
        assert_eq!(summary.unique_runs.len(), 2);
        assert_eq!(summary.routed_tool, 1);
        assert_eq!(summary.routed_conversational, 1);
        assert_eq!(summary.plans_generated, 1);
        assert_eq!(summary.plan_attempts_failed, 1);
        assert_eq!(summary.steps_succeeded, 1);
        assert_eq!(summary.steps_failed, 1);
        assert_eq!(summary.failing_agents.get("ghost_agent"), Some(&1));
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TelemetrySink::disabled("ask");
        sink.path = dir.path().join("events.jsonl");
        sink.emit("message.routed", json!({"agent_class": "tool"}));
        assert!(!sink.path.exists());
    }

    #[test]
    fn enabled_sink_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = TelemetrySink::disabled("plan");
        sink.enabled = true;
        sink.path = dir.path().join("nested").join("events.jsonl");
        sink.emit("plan.generated", json!({"steps": 2}));
        sink.emit("plan.failed", json!({"attempts": 3}));

        let content = std::fs::read_to_string(&sink.path).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "plan.generated");
        assert_eq!(first["command"], "plan");
        assert_eq!(first["steps"], 2);
    }
}
