use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::envelope::Envelope;
use crate::model::ToolSpec;
use crate::registry::{Agent, AgentDescriptor};
use crate::todos::{
    NewTodo, TodoFilter, TodoPatch, TodoPriority, TodoSelector, TodoStatus, TodoStore,
    optional_date,
};

pub const TODO_AGENT_NAME: &str = "todo_agent";
pub const TODO_TOOL_NAME: &str = "manage_todo";

const TODO_SYSTEM_PROMPT: &str = "\
You manage the user's to-do list. Translate the request into exactly one call to the
manage_todo function.
- action \"add\": put the task text in description; set priority and due_date only when stated.
- action \"update\": identify the task by id, or by its current text in target; supply only the
  fields that change (description, status, priority, due_date).
- action \"delete\": identify the task by id or by its text in target.
- action \"list\": optionally filter by status, priority, or due_date.
Dates are YYYY-MM-DD. Status is one of pending, in_progress, completed.";

/// One todo operation, decoded from the model's arguments.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TodoCommand {
    Add {
        #[serde(default, alias = "task")]
        description: Option<String>,
        #[serde(default)]
        priority: Option<TodoPriority>,
        #[serde(default, deserialize_with = "optional_date")]
        due_date: Option<NaiveDate>,
    },
    Update {
        #[serde(default, deserialize_with = "optional_id")]
        id: Option<u64>,
        #[serde(default)]
        target: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        status: Option<TodoStatus>,
        #[serde(default)]
        priority: Option<TodoPriority>,
        #[serde(default, deserialize_with = "optional_date")]
        due_date: Option<NaiveDate>,
    },
    Delete {
        #[serde(default, deserialize_with = "optional_id")]
        id: Option<u64>,
        #[serde(default, alias = "description", alias = "task")]
        target: Option<String>,
    },
    List {
        #[serde(default)]
        status: Option<TodoStatus>,
        #[serde(default)]
        priority: Option<TodoPriority>,
        #[serde(default, deserialize_with = "optional_date")]
        due_date: Option<NaiveDate>,
    },
}

/// Models often send ids as strings; accept `7`, `"7"`, `null`, or `""`.
fn optional_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match Option::<RawId>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawId::Number(id)) => Ok(Some(id)),
        Some(RawId::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(RawId::Text(text)) => text
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id '{text}'"))),
    }
}

fn selector(id: Option<u64>, target: Option<String>) -> Option<TodoSelector> {
    match (id, target) {
        (Some(id), _) => Some(TodoSelector::Id(id)),
        (None, Some(text)) if !text.trim().is_empty() => Some(TodoSelector::Description(text)),
        _ => None,
    }
}

pub struct TodoAgent {
    descriptor: AgentDescriptor,
    store: Arc<TodoStore>,
}

impl TodoAgent {
    pub fn new(store: Arc<TodoStore>) -> Self {
        Self {
            descriptor: AgentDescriptor {
                name: TODO_AGENT_NAME.to_string(),
                description: "Manages the to-do list: add, update, delete, and list tasks \
                              with status, priority, and due date."
                    .to_string(),
                system_prompt: TODO_SYSTEM_PROMPT.to_string(),
                input_schema: ToolSpec::new(
                    TODO_TOOL_NAME,
                    "Perform one operation on the to-do list",
                    input_schema(),
                ),
                output_schema: output_schema(),
            },
            store,
        }
    }

    fn apply(&self, command: TodoCommand) -> anyhow::Result<Envelope> {
        match command {
            TodoCommand::Add {
                description,
                priority,
                due_date,
            } => {
                let Some(description) = description.filter(|text| !text.trim().is_empty()) else {
                    return Ok(Envelope::failure("Task description cannot be empty"));
                };
                let record = self.store.add(NewTodo {
                    description,
                    priority,
                    due_date,
                })?;
                tracing::info!(id = record.id, "todo added");
                Ok(Envelope::success(serde_json::to_value(record)?))
            }
            TodoCommand::Update {
                id,
                target,
                description,
                status,
                priority,
                due_date,
            } => {
                let Some(selector) = selector(id, target) else {
                    return Ok(Envelope::failure("Update requires an 'id' or 'target'"));
                };
                let patch = TodoPatch {
                    description: description.filter(|text| !text.trim().is_empty()),
                    status,
                    priority,
                    due_date,
                };
                if patch.is_empty() {
                    return Ok(Envelope::failure("Update requires at least one field to change"));
                }
                match self.store.update(&selector, &patch)? {
                    Some(record) => {
                        tracing::info!(id = record.id, "todo updated");
                        Ok(Envelope::success(serde_json::to_value(record)?))
                    }
                    None => Ok(Envelope::failure(format!("Task with {selector} not found"))),
                }
            }
            TodoCommand::Delete { id, target } => {
                let Some(selector) = selector(id, target) else {
                    return Ok(Envelope::failure("Delete requires an 'id' or 'target'"));
                };
                match self.store.delete(&selector)? {
                    Some(record) => {
                        tracing::info!(id = record.id, "todo deleted");
                        Ok(Envelope::success(serde_json::to_value(record)?))
                    }
                    None => Ok(Envelope::failure(format!("Task with {selector} not found"))),
                }
            }
            TodoCommand::List {
                status,
                priority,
                due_date,
            } => {
                let filter = TodoFilter {
                    status,
                    priority,
                    due_date,
                };
                let records = self.store.list(&filter)?;
                Ok(Envelope::success(serde_json::to_value(records)?))
            }
        }
    }
}

#[async_trait]
impl Agent for TodoAgent {
    fn descriptor(&self) -> &AgentDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value) -> anyhow::Result<Envelope> {
        let command = match serde_json::from_value::<TodoCommand>(arguments) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(error = %err, "rejected todo arguments");
                return Ok(Envelope::failure(format!("Invalid arguments: {err}")));
            }
        };
        self.apply(command)
    }
}

fn input_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "action": {
                "type": "string",
                "enum": ["add", "update", "delete", "list"],
                "description": "Operation to perform on the to-do list"
            },
            "id": {
                "type": "integer",
                "description": "Identifier of an existing task (update, delete)"
            },
            "target": {
                "type": "string",
                "description": "Current text of an existing task when the id is unknown (update, delete)"
            },
            "description": {
                "type": "string",
                "description": "Task text (add) or replacement text (update)"
            },
            "status": {
                "type": "string",
                "enum": ["pending", "in_progress", "completed"]
            },
            "priority": {
                "type": "string",
                "enum": ["high", "medium", "low"]
            },
            "due_date": {
                "type": "string",
                "description": "Due date as YYYY-MM-DD"
            }
        },
        "required": ["action"]
    })
}

fn output_schema() -> Value {
    let record = json!({
        "type": "object",
        "properties": {
            "id": {"type": "integer"},
            "description": {"type": "string"},
            "status": {"type": "string"},
            "priority": {"type": ["string", "null"]},
            "due_date": {"type": ["string", "null"]},
            "created_at": {"type": "string"},
            "updated_at": {"type": "string"}
        }
    });
    json!({
        "oneOf": [record.clone(), {"type": "array", "items": record}]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_in(dir: &tempfile::TempDir) -> TodoAgent {
        TodoAgent::new(Arc::new(TodoStore::new(dir.path().join("todo-list.json"))))
    }

    #[tokio::test]
    async fn add_on_empty_store_returns_the_created_record() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let envelope = agent
            .execute(json!({"action": "add", "description": "buy groceries"}))
            .await
            .unwrap();
        let result = envelope.result().expect("add should succeed");
        assert_eq!(result["id"], 1);
        assert_eq!(result["description"], "buy groceries");
        assert_eq!(result["status"], "pending");
    }

    #[tokio::test]
    async fn add_requires_a_description() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let envelope = agent
            .execute(json!({"action": "add", "description": "   "}))
            .await
            .unwrap();
        assert_eq!(envelope.error(), Some("Task description cannot be empty"));
    }

    #[tokio::test]
    async fn update_by_string_id_changes_status() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        agent
            .execute(json!({"action": "add", "task": "walk dog", "priority": "low"}))
            .await
            .unwrap();
        let envelope = agent
            .execute(json!({"action": "update", "id": "1", "status": "closed"}))
            .await
            .unwrap();
        let result = envelope.result().expect("update should succeed");
        assert_eq!(result["status"], "completed");
        assert_eq!(result["priority"], "low");
    }

    #[tokio::test]
    async fn update_and_delete_of_unknown_records_fail() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let update = agent
            .execute(json!({"action": "update", "id": 42, "status": "completed"}))
            .await
            .unwrap();
        assert_eq!(update.error(), Some("Task with id 42 not found"));

        let delete = agent
            .execute(json!({"action": "delete", "target": "nothing here"}))
            .await
            .unwrap();
        assert_eq!(delete.error(), Some("Task with 'nothing here' not found"));
    }

    #[tokio::test]
    async fn delete_by_description_removes_first_match() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        agent
            .execute(json!({"action": "add", "description": "Pay rent"}))
            .await
            .unwrap();
        agent
            .execute(json!({"action": "add", "description": "pay rent"}))
            .await
            .unwrap();
        let envelope = agent
            .execute(json!({"action": "delete", "description": "PAY RENT"}))
            .await
            .unwrap();
        assert_eq!(envelope.result().unwrap()["id"], 1);

        let remaining = agent.execute(json!({"action": "list"})).await.unwrap();
        let remaining = remaining.result().unwrap().as_array().unwrap().clone();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["id"], 2);
    }

    #[tokio::test]
    async fn empty_list_is_a_success() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let envelope = agent
            .execute(json!({"action": "list", "status": "completed"}))
            .await
            .unwrap();
        assert_eq!(envelope, Envelope::success(json!([])));
    }

    #[tokio::test]
    async fn malformed_arguments_are_failure_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        for arguments in [
            json!({"action": "archive"}),
            json!({"description": "no action"}),
            json!({"action": "add", "description": "x", "due_date": "next tuesday"}),
            json!({"action": "update", "id": "seven", "status": "completed"}),
        ] {
            let envelope = agent.execute(arguments.clone()).await.unwrap();
            assert!(
                envelope.error().unwrap().starts_with("Invalid arguments"),
                "{arguments} should be rejected"
            );
        }
    }

    #[test]
    fn descriptor_exposes_the_tool_schema() {
        let dir = tempfile::tempdir().unwrap();
        let agent = agent_in(&dir);
        let descriptor = agent.descriptor();
        assert_eq!(descriptor.name, TODO_AGENT_NAME);
        assert_eq!(descriptor.input_schema.name, TODO_TOOL_NAME);
        assert_eq!(descriptor.input_schema.parameters["required"], json!(["action"]));
    }
}
