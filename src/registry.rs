/// Agent contract and the registry that owns every agent for a process.
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::RouterError;
use crate::model::ToolSpec;

/// Identity and contract of a callable capability.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDescriptor {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub input_schema: ToolSpec,
    pub output_schema: Value,
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn descriptor(&self) -> &AgentDescriptor;

    /// Perform the agent's action. Domain failures (bad arguments, missing
    /// records) come back as failed envelopes; `Err` is reserved for faults
    /// such as I/O errors, which the dispatcher converts at the step boundary.
    async fn execute(&self, arguments: Value) -> anyhow::Result<Envelope>;

    fn name(&self) -> &str {
        &self.descriptor().name
    }
}

/// Ordered, name-unique collection of agents. Built at startup, read-only after.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, agent: Arc<dyn Agent>) -> Result<(), RouterError> {
        let name = agent.name().to_string();
        if self.get(&name).is_some() {
            return Err(RouterError::DuplicateAgent { name });
        }
        tracing::info!(agent = %name, "registering agent");
        self.agents.push(agent);
        Ok(())
    }

    pub fn list(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    pub fn descriptors(&self) -> Vec<&AgentDescriptor> {
        self.agents.iter().map(|agent| agent.descriptor()).collect()
    }

    /// Case-sensitive exact lookup.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents
            .iter()
            .find(|agent| agent.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoAgent {
        descriptor: AgentDescriptor,
    }

    impl EchoAgent {
        fn named(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                descriptor: AgentDescriptor {
                    name: name.to_string(),
                    description: "echoes its arguments".to_string(),
                    system_prompt: "Echo.".to_string(),
                    input_schema: ToolSpec::new("echo", "Echo", json!({"type": "object"})),
                    output_schema: json!({"type": "object"}),
                },
            })
        }
    }

    #[async_trait]
    impl Agent for EchoAgent {
        fn descriptor(&self) -> &AgentDescriptor {
            &self.descriptor
        }

        async fn execute(&self, arguments: Value) -> anyhow::Result<Envelope> {
            Ok(Envelope::success(arguments))
        }
    }

    #[test]
    fn registered_agents_resolve_by_exact_name() {
        let mut registry = AgentRegistry::new();
        registry.add(EchoAgent::named("todo_agent")).unwrap();
        registry.add(EchoAgent::named("weather_agent")).unwrap();

        assert_eq!(registry.get("todo_agent").unwrap().name(), "todo_agent");
        assert!(registry.get("Todo_Agent").is_none());
        assert!(registry.get("ghost_agent").is_none());
        let names = registry
            .list()
            .iter()
            .map(|agent| agent.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["todo_agent", "weather_agent"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = AgentRegistry::new();
        registry.add(EchoAgent::named("todo_agent")).unwrap();
        let err = registry.add(EchoAgent::named("todo_agent")).unwrap_err();
        assert!(matches!(err, RouterError::DuplicateAgent { name } if name == "todo_agent"));
        assert_eq!(registry.len(), 1);
    }
}
