/// Concrete agents and the registry the binary starts with.
pub mod todo;

use std::sync::Arc;

use crate::error::RouterError;
use crate::registry::AgentRegistry;
use crate::todos::TodoStore;

pub use todo::{TODO_AGENT_NAME, TodoAgent, TodoCommand};

pub fn build_default_registry(store: Arc<TodoStore>) -> Result<AgentRegistry, RouterError> {
    let mut registry = AgentRegistry::new();
    registry.add(Arc::new(TodoAgent::new(store)))?;
    Ok(registry)
}
