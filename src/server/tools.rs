//! Tool registry for dynamic tool registration.

use crate::error::{HandlerError, HandlerResult};
use crate::protocol::handler::{RequestContext, ToolHandler};
use crate::schema::{CallToolResult, ListToolsResult, Tool};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error};

/// A single named tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definition(&self) -> Tool;
    async fn execute(&self, ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult>;
}

/// Serves `tools/list` and `tools/call` from a set of registered tools.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    pub fn register<T: ToolExecutor + 'static>(&self, tool: T) {
        let definition = tool.definition();
        let name = definition.name.clone();
        debug!("Registering tool: {}", name);
        self.tools.insert(name, Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).map(|r| Arc::clone(&*r))
    }

    /// Definitions sorted by name.
    pub fn definitions(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self.tools.iter().map(|r| r.value().definition()).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for ToolRegistry {
    async fn list(
        &self,
        _ctx: &RequestContext,
        _cursor: Option<String>,
    ) -> HandlerResult<ListToolsResult> {
        let tools = self.definitions();
        debug!("Listing {} tools", tools.len());
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    /// Unknown tools fail the request; tool failures become `isError` results.
    async fn call(
        &self,
        ctx: &RequestContext,
        name: String,
        arguments: Value,
    ) -> HandlerResult<CallToolResult> {
        debug!("Tool call: {}", name);
        let tool = self
            .get(&name)
            .ok_or_else(|| HandlerError::new(format!("unknown tool: {}", name)))?;

        match tool.execute(ctx, arguments).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Tool execution error: {}", e);
                Ok(CallToolResult::error(e.to_string()))
            }
        }
    }
}

#[macro_export]
macro_rules! define_tool {
    (
        name: $name:expr,
        description: $desc:expr,
        schema: $schema:tt
    ) => {
        $crate::schema::Tool {
            name: $name.into(),
            description: Some($desc.into()),
            input_schema: serde_json::json!($schema),
        }
    };
}

/// Returns its `text` argument unchanged.
pub struct EchoTool;

#[async_trait]
impl ToolExecutor for EchoTool {
    fn definition(&self) -> Tool {
        crate::define_tool! {
            name: "echo",
            description: "Echo the given text back",
            schema: {
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo"}
                },
                "required": ["text"]
            }
        }
    }

    async fn execute(&self, _ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::new("missing string argument 'text'"))?;
        Ok(CallToolResult::text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Content;
    use serde_json::json;

    fn ctx() -> RequestContext {
        RequestContext::new(Some(1.into()), "tools/call")
    }

    #[test]
    fn test_registry() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("unknown").is_none());

        let tools = registry.definitions();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].input_schema["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_echo() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .call(&ctx(), "echo".into(), json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result.content, vec![Content::text("hi")]);
        assert!(result.is_error.is_none());
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .call(&ctx(), "echo".into(), json!({}))
            .await
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_request() {
        let registry = ToolRegistry::new();
        let err = registry
            .call(&ctx(), "nope".into(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.message, "unknown tool: nope");
    }
}
