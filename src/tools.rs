//! Tool registry
//!
//! Tools are capabilities supplied by the embedding application: a name, a
//! human-readable description, an advisory JSON-Schema-shaped input schema
//! (passed through to `tools/list` callers unvalidated), and a handler
//! invoked during `tools/run`/`tools/call`.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Handler capability: arguments mapping in, result value out.
///
/// Handlers run synchronously on the connection-handling task; a slow handler
/// stalls only that connection.
pub type ToolHandler =
    Arc<dyn Fn(serde_json::Map<String, Value>) -> anyhow::Result<Value> + Send + Sync>;

/// A registered tool entry
#[derive(Clone)]
pub struct RegisteredTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Concurrent-safe mapping from tool name to its registration.
///
/// Registration order is preserved for `tools/list`; re-registering a name
/// silently replaces the prior entry in place (last writer wins).
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<Vec<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing entry with the same name
    pub async fn register(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: ToolHandler,
    ) {
        let tool = RegisteredTool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            handler,
        };

        let mut tools = self.tools.write().await;
        match tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => {
                debug!("Replacing registered tool: {}", name);
                *existing = tool;
            }
            None => {
                debug!("Registering tool: {}", name);
                tools.push(tool);
            }
        }
    }

    /// Look up a tool by name
    pub async fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().await.iter().find(|t| t.name == name).cloned()
    }

    /// List all tools as `tools/list` entries, in registration order
    pub async fn list(&self) -> Vec<Value> {
        self.tools
            .read()
            .await
            .iter()
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.tools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tools.read().await.is_empty()
    }
}

/// Build an arguments mapping from a `params.arguments` value, defaulting to
/// an empty mapping for absent or non-object arguments.
pub fn arguments_from(params: Option<&Value>) -> serde_json::Map<String, Value> {
    params
        .and_then(|p| p.get("arguments"))
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default()
}
