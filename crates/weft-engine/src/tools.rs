use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use weft_core::error::{Result, WeftError};
use weft_core::traits::ToolCaller;

/// A named tool that tool nodes can call.
pub trait Tool: Send + Sync + 'static {
    /// Name tool nodes refer to in `tool_name`.
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Execute with already-resolved parameters.
    fn execute(&self, params: Value) -> BoxFuture<'_, Result<Value>>;

    /// Tool-level timeout in seconds. `None` leaves it to the node timeout.
    fn timeout_secs(&self) -> Option<u64> {
        None
    }
}

/// Registry of available tools, dispatching by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    fallback: Option<Arc<dyn ToolCaller>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Route calls for unregistered names to another caller instead of
    /// failing with `ToolNotFound`.
    pub fn with_fallback(mut self, fallback: impl ToolCaller) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: Value) -> Result<Value> {
        let Some(tool) = self.get(name) else {
            return match &self.fallback {
                Some(fallback) => fallback.call(name, params).await,
                None => Err(WeftError::ToolNotFound(name.to_string())),
            };
        };

        let Some(secs) = tool.timeout_secs() else {
            return tool.execute(params).await;
        };

        match tokio::time::timeout(Duration::from_secs(secs), tool.execute(params)).await {
            Ok(result) => result,
            Err(_) => Err(WeftError::ToolExecution {
                tool: name.to_string(),
                message: format!("timed out after {}s", secs),
            }),
        }
    }
}

impl ToolCaller for ToolRegistry {
    fn call(&self, tool_name: &str, params: Value) -> BoxFuture<'_, Result<Value>> {
        let name = tool_name.to_string();
        Box::pin(async move { self.execute(&name, params).await })
    }
}
