//! Default handlers.
//!
//! Every capability answers with an empty but well-formed result, so a server
//! built without custom handlers still speaks the full method set.

use crate::error::HandlerResult;
use crate::protocol::handler::{
    NotificationHandler, PromptHandler, RequestContext, ResourceHandler, SystemHandler,
    ToolHandler,
};
use crate::protocol::types::JsonRpcNotification;
use crate::schema::*;
use crate::server::state::ServerState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Default implementation of every capability handler.
pub struct DefaultHandler {
    state: Arc<ServerState>,
}

impl DefaultHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }
}

#[async_trait]
impl ResourceHandler for DefaultHandler {
    async fn list(
        &self,
        _ctx: &RequestContext,
        _cursor: Option<String>,
    ) -> HandlerResult<ListResourcesResult> {
        Ok(ListResourcesResult::default())
    }

    async fn read(&self, _ctx: &RequestContext, uri: String) -> HandlerResult<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(uri, "")],
        })
    }

    async fn subscribe(&self, _ctx: &RequestContext, uri: String) -> HandlerResult<()> {
        debug!(%uri, "Resource subscribed");
        self.state.subscribe(uri);
        Ok(())
    }

    async fn unsubscribe(&self, _ctx: &RequestContext, uri: String) -> HandlerResult<()> {
        debug!(%uri, "Resource unsubscribed");
        self.state.unsubscribe(&uri);
        Ok(())
    }
}

#[async_trait]
impl PromptHandler for DefaultHandler {
    async fn list(
        &self,
        _ctx: &RequestContext,
        _cursor: Option<String>,
    ) -> HandlerResult<ListPromptsResult> {
        Ok(ListPromptsResult::default())
    }

    async fn get(
        &self,
        _ctx: &RequestContext,
        _name: String,
        _arguments: HashMap<String, String>,
    ) -> HandlerResult<GetPromptResult> {
        Ok(GetPromptResult::default())
    }
}

#[async_trait]
impl ToolHandler for DefaultHandler {
    async fn list(
        &self,
        _ctx: &RequestContext,
        _cursor: Option<String>,
    ) -> HandlerResult<ListToolsResult> {
        Ok(ListToolsResult::default())
    }

    async fn call(
        &self,
        _ctx: &RequestContext,
        _name: String,
        _arguments: Value,
    ) -> HandlerResult<CallToolResult> {
        Ok(CallToolResult::text(""))
    }
}

#[async_trait]
impl SystemHandler for DefaultHandler {
    async fn initialize(
        &self,
        _ctx: &RequestContext,
        params: InitializeParams,
    ) -> HandlerResult<InitializeResult> {
        info!(
            "Initialize request from {} v{}",
            params.client_info.name, params.client_info.version
        );
        debug!("Client capabilities: {:?}", params.capabilities);

        // Echo the client's version; fall back to ours when it sent none.
        let protocol_version = if params.protocol_version.is_empty() {
            self.state.config.protocol_version.to_string()
        } else {
            params.protocol_version
        };
        self.state
            .begin_session(params.client_info, protocol_version.clone());

        Ok(InitializeResult {
            protocol_version,
            capabilities: self.state.capabilities.clone(),
            server_info: self.state.server_info(),
            instructions: self.state.config.instructions.clone(),
        })
    }

    async fn set_level(&self, _ctx: &RequestContext, level: LoggingLevel) -> HandlerResult<()> {
        debug!(?level, "Logging level changed");
        self.state.set_log_level(level);
        Ok(())
    }

    async fn complete(
        &self,
        _ctx: &RequestContext,
        _reference: Reference,
        _argument: CompleteArgument,
    ) -> HandlerResult<CompleteResult> {
        Ok(CompleteResult::default())
    }
}

/// Marks the session initialized on `notifications/initialized`.
pub struct InitializedHandler {
    state: Arc<ServerState>,
}

impl InitializedHandler {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl NotificationHandler for InitializedHandler {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        _notification: &JsonRpcNotification,
    ) -> HandlerResult<()> {
        info!("Server initialized successfully");
        self.state.set_initialized();
        Ok(())
    }
}

/// Logs `notifications/cancelled`. In-flight handlers are not interrupted.
pub struct CancelledHandler;

#[async_trait]
impl NotificationHandler for CancelledHandler {
    async fn handle(
        &self,
        _ctx: &RequestContext,
        notification: &JsonRpcNotification,
    ) -> HandlerResult<()> {
        let params: CancelledParams = crate::protocol::handler::decode_params(
            notification.params.as_deref(),
        )
        .map_err(|e| e.to_string())?;
        debug!(request_id = %params.request_id, reason = ?params.reason, "Peer cancelled request");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::ServerStateBuilder;

    fn handler() -> DefaultHandler {
        DefaultHandler::new(Arc::new(ServerStateBuilder::new().build()))
    }

    fn ctx(method: &str) -> RequestContext {
        RequestContext::new(Some(1.into()), method)
    }

    #[tokio::test]
    async fn test_initialize_echoes_protocol_version() {
        let handler = handler();
        let result = handler
            .initialize(
                &ctx("initialize"),
                InitializeParams {
                    protocol_version: "2024-11-05".into(),
                    capabilities: ClientCapabilities::default(),
                    client_info: Implementation::new("client", "0.1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(result.server_info.name, "mcp-stdio");
        assert_eq!(handler.state().client_info().unwrap().name, "client");
        assert!(!handler.state().is_initialized());
    }

    #[tokio::test]
    async fn test_initialize_falls_back_to_configured_version() {
        let handler = handler();
        let result = handler
            .initialize(
                &ctx("initialize"),
                InitializeParams {
                    protocol_version: String::new(),
                    capabilities: ClientCapabilities::default(),
                    client_info: Implementation::new("client", "0.1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(result.protocol_version, handler.state().config.protocol_version);
        assert_eq!(
            handler.state().protocol_version().as_deref(),
            Some(result.protocol_version.as_str())
        );
    }

    #[tokio::test]
    async fn test_defaults_are_empty() {
        let handler = handler();
        let ctx = ctx("x");

        assert!(ResourceHandler::list(&handler, &ctx, None).await.unwrap().resources.is_empty());
        assert!(PromptHandler::list(&handler, &ctx, None).await.unwrap().prompts.is_empty());
        assert!(ToolHandler::list(&handler, &ctx, None).await.unwrap().tools.is_empty());

        let read = handler.read(&ctx, "file:///a".into()).await.unwrap();
        assert_eq!(read.contents, vec![ResourceContents::text("file:///a", "")]);

        let call = handler.call(&ctx, "any".into(), Value::Null).await.unwrap();
        assert_eq!(call.content, vec![Content::text("")]);
    }

    #[tokio::test]
    async fn test_set_level_and_subscribe_update_state() {
        let handler = handler();
        let ctx = ctx("x");

        handler.set_level(&ctx, LoggingLevel::Error).await.unwrap();
        assert_eq!(handler.state().log_level(), LoggingLevel::Error);

        handler.subscribe(&ctx, "file:///b".into()).await.unwrap();
        assert!(handler.state().is_subscribed("file:///b"));
        handler.unsubscribe(&ctx, "file:///b".into()).await.unwrap();
        assert!(!handler.state().is_subscribed("file:///b"));
    }

    #[tokio::test]
    async fn test_initialized_notification_marks_state() {
        let state = Arc::new(ServerStateBuilder::new().build());
        let handler = InitializedHandler::new(Arc::clone(&state));
        let notification = JsonRpcNotification::new(methods::NOTIFICATION_INITIALIZED);

        handler
            .handle(&RequestContext::new(None, methods::NOTIFICATION_INITIALIZED), &notification)
            .await
            .unwrap();
        assert!(state.is_initialized());
    }
}
