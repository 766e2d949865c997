/// Per-message control flow: route, then either stream a conversational
/// reply or plan and dispatch tool steps.
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::agents::build_default_registry;
use crate::config::RuntimeConfig;
use crate::dispatcher::{StepOutcome, TaskDispatcher};
use crate::error::RouterError;
use crate::model::{ChatModel, ExtractionRetry, collect_stream};
use crate::planner::{Plan, TaskPlanner};
use crate::provider::resolve_model;
use crate::registry::AgentRegistry;
use crate::router::{AgentClass, route};
use crate::telemetry::TelemetrySink;
use crate::todos::TodoStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub extraction: ExtractionRetry,
    pub planner_max_attempts: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            extraction: ExtractionRetry::default(),
            planner_max_attempts: crate::planner::DEFAULT_PLANNER_ATTEMPTS,
        }
    }
}

impl From<&RuntimeConfig> for PipelineSettings {
    fn from(cfg: &RuntimeConfig) -> Self {
        Self {
            extraction: ExtractionRetry::new(
                cfg.extraction_max_retries,
                Duration::from_millis(cfg.extraction_retry_delay_ms),
            ),
            planner_max_attempts: cfg.planner_max_attempts,
        }
    }
}

/// What one message produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Conversational { reply: String },
    Tool { plan: Plan, results: Vec<StepOutcome> },
}

#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn ChatModel>,
    registry: Arc<AgentRegistry>,
    settings: PipelineSettings,
    telemetry: TelemetrySink,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn ChatModel>,
        registry: Arc<AgentRegistry>,
        settings: PipelineSettings,
        telemetry: TelemetrySink,
    ) -> Self {
        Self {
            model,
            registry,
            settings,
            telemetry,
        }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Handle one message end to end. Conversational chunks go to `on_chunk`
    /// as they arrive. Routing and planning failures abort the message; step
    /// failures are carried inside the outcome.
    pub async fn run(&self, message: &str, on_chunk: impl FnMut(&str)) -> Result<Outcome> {
        let message = non_empty_message(message)?;

        let decision = route(self.model.as_ref(), message, &self.settings.extraction).await?;
        self.telemetry.emit(
            "message.routed",
            json!({ "agent_class": decision.agent_class.label() }),
        );

        match decision.agent_class {
            AgentClass::Conversational => {
                let chunks = self.model.stream(message).await?;
                let reply = collect_stream(chunks, on_chunk).await?;
                Ok(Outcome::Conversational { reply })
            }
            AgentClass::Tool => {
                let plan = self.generate_plan(message).await?;
                let results = self.dispatch(&plan).await;
                Ok(Outcome::Tool { plan, results })
            }
        }
    }

    /// Plan without dispatching. Rejects blank messages like `run`.
    pub async fn plan(&self, message: &str) -> Result<Plan> {
        let message = non_empty_message(message)?;
        Ok(self.generate_plan(message).await?)
    }

    async fn generate_plan(&self, message: &str) -> Result<Plan, RouterError> {
        let agents = self.registry.descriptors();
        TaskPlanner::new(
            self.model.as_ref(),
            self.settings.extraction,
            self.settings.planner_max_attempts,
        )
        .with_telemetry(&self.telemetry)
        .generate(message, &agents)
        .await
    }

    pub async fn dispatch(&self, plan: &Plan) -> Vec<StepOutcome> {
        TaskDispatcher::new(self.model.as_ref(), &self.registry, self.settings.extraction)
            .with_telemetry(&self.telemetry)
            .route(plan)
            .await
    }
}

fn non_empty_message(message: &str) -> Result<&str> {
    let message = message.trim();
    if message.is_empty() {
        anyhow::bail!("message cannot be empty");
    }
    Ok(message)
}

/// Wire the configured model, the todo store, and the default registry.
pub fn build_pipeline(
    cfg: &RuntimeConfig,
    telemetry: TelemetrySink,
) -> Result<(Pipeline, Arc<TodoStore>)> {
    let (model, provider, model_name) = resolve_model(cfg)?;
    tracing::info!(provider = provider.label(), model = %model_name, "model resolved");
    let store = Arc::new(TodoStore::from_template(&cfg.store_path));
    let registry = build_default_registry(store.clone())?;
    let pipeline = Pipeline::new(
        model,
        Arc::new(registry),
        PipelineSettings::from(cfg),
        telemetry,
    );
    Ok((pipeline, store))
}
