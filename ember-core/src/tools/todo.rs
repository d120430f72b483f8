//! To-do items registered by tools during a turn.
//!
//! Planning tools record the steps they intend to take; the agent loop
//! refuses to stop early while any item is still open.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Tool, ToolContext, ToolDefinition, ToolError};

/// One planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Step description.
    pub text: String,
    /// Whether the step is done.
    pub done: bool,
}

/// To-do list owned by one agent turn.
#[derive(Debug, Default)]
pub struct TodoList {
    items: Mutex<Vec<TodoItem>>,
}

impl TodoList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an open item and return its position.
    pub fn add(&self, text: impl Into<String>) -> usize {
        let mut items = self.lock();
        items.push(TodoItem {
            text: text.into(),
            done: false,
        });
        items.len() - 1
    }

    /// Mark an item done. Returns `false` if the position is out of range.
    pub fn complete(&self, position: usize) -> bool {
        match self.lock().get_mut(position) {
            Some(item) => {
                item.done = true;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all items.
    pub fn items(&self) -> Vec<TodoItem> {
        self.lock().clone()
    }

    /// Whether any item is still open.
    pub fn has_incomplete(&self) -> bool {
        self.lock().iter().any(|item| !item.done)
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TodoItem>> {
        match self.items.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Planning tool: lets the model add steps and tick them off.
#[derive(Debug)]
pub struct TodoTool {
    definition: ToolDefinition,
}

#[derive(Debug, Default, Deserialize)]
struct TodoUpdate {
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    complete: Vec<usize>,
}

impl TodoTool {
    pub const NAME: &'static str = "update_todo_list";

    pub fn new() -> Self {
        Self {
            definition: ToolDefinition {
                name: Self::NAME.to_string(),
                description: Some(
                    "Record the steps you plan to take and mark steps done. \
                     Returns the numbered list."
                        .to_string(),
                ),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "add": {"type": "array", "items": {"type": "string"}},
                        "complete": {"type": "array", "items": {"type": "integer"}}
                    }
                }),
            },
        }
    }
}

impl Default for TodoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for TodoTool {
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    async fn run(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext<'_>,
    ) -> Result<String, ToolError> {
        let update: TodoUpdate = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        for text in update.add {
            ctx.todos.add(text);
        }
        for position in update.complete {
            if !ctx.todos.complete(position) {
                return Err(ToolError::InvalidArguments(format!(
                    "no to-do item at position {position}"
                )));
            }
        }

        let items = ctx.todos.items();
        if items.is_empty() {
            return Ok("The to-do list is empty.".to_string());
        }
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{i}. [{}] {}", if item.done { "x" } else { " " }, item.text))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
