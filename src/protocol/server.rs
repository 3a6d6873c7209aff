//! MCP server with lifecycle management.

use crate::config::ServerConfig;
use crate::error::{McpError, ProtocolError, Result};
use crate::protocol::codec::Frame;
use crate::protocol::handler::{
    Dispatched, Dispatcher, Handlers, NotificationHandler, PromptHandler, ResourceHandler,
    SystemHandler, ToolHandler,
};
use crate::protocol::transport::{StdioTransport, Transport};
use crate::protocol::types::*;
use crate::schema::{
    ListChangedCapability, ResourcesCapability, ServerCapabilities, methods,
};
use crate::server::{CancelledHandler, DefaultHandler, InitializedHandler, ServerState};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Server created, no `initialize` seen yet.
    Created,
    /// Initialize request received, awaiting initialized notification.
    Initializing,
    /// Server is fully operational.
    Running,
    /// The serve loop has returned.
    Stopped,
}

/// MCP Server.
pub struct McpServer {
    config: ServerConfig,
    state: Arc<ServerState>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<RwLock<Lifecycle>>,
}

impl McpServer {
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Get current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read()
    }

    /// Serve over stdin/stdout until EOF or `shutdown` fires.
    pub async fn serve_stdio(&self, shutdown: CancellationToken) -> Result<()> {
        let transport = Arc::new(StdioTransport::stdio_with_max_line_bytes(
            self.config.max_line_bytes,
        ));
        self.serve(transport, shutdown).await
    }

    /// Serve one connection.
    ///
    /// Protocol faults are answered and the loop continues. Returns `Ok` on
    /// EOF or shutdown, and the error on a transport failure. Requests already
    /// running in concurrent mode are drained before returning.
    #[instrument(skip_all, fields(server = %self.config.name))]
    pub async fn serve<T: Transport + 'static>(
        &self,
        transport: Arc<T>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        info!(
            "Starting MCP server: {} v{}",
            self.config.name, self.config.version
        );

        let mut in_flight: JoinSet<Result<()>> = JoinSet::new();
        let result = loop {
            let frame = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                frame = transport.read_frame() => frame,
            };

            let line = match frame {
                Ok(Some(Frame::Line(line))) => line,
                Ok(Some(Frame::Oversized { len })) => {
                    warn!(len, "Rejecting oversized message");
                    let response = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::from(ProtocolError::ParseError)
                            .with_data(json!({ "reason": "message exceeds line limit", "len": len })),
                    );
                    if let Err(e) = transport.send(&response.into()).await {
                        break Err(e);
                    }
                    continue;
                }
                Ok(None) => {
                    debug!("EOF received, shutting down");
                    break Ok(());
                }
                Err(e) => {
                    error!("Transport error: {}", e);
                    break Err(e.into());
                }
            };

            let envelope = match Envelope::decode(&line) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(error = %e, "Rejecting malformed message");
                    if let Err(e) = transport.send(&e.to_response().into()).await {
                        break Err(e);
                    }
                    continue;
                }
            };

            let concurrent = self.config.concurrent_requests
                && envelope
                    .method()
                    .is_some_and(|method| !method.starts_with(NOTIFICATION_PREFIX));
            if concurrent {
                let dispatcher = Arc::clone(&self.dispatcher);
                let lifecycle = Arc::clone(&self.lifecycle);
                let transport = Arc::clone(&transport);
                let shutdown = shutdown.clone();
                in_flight.spawn(async move {
                    respond(&dispatcher, &lifecycle, transport.as_ref(), envelope, &shutdown).await
                });
            } else if let Err(e) = respond(
                &self.dispatcher,
                &self.lifecycle,
                transport.as_ref(),
                envelope,
                &shutdown,
            )
            .await
            {
                break Err(e);
            }

            if let Some(e) = reap(&mut in_flight) {
                break Err(e);
            }
        };

        if !in_flight.is_empty() {
            debug!(pending = in_flight.len(), "Draining in-flight requests");
        }
        let mut result = result;
        while let Some(joined) = in_flight.join_next().await {
            if let Some(e) = task_error(joined)
                && result.is_ok()
            {
                result = Err(e);
            }
        }

        *self.lifecycle.write() = Lifecycle::Stopped;
        info!("Server stopped");
        result
    }
}

/// Dispatch one envelope, advance the lifecycle, and write the response, if any.
async fn respond<T: Transport>(
    dispatcher: &Dispatcher,
    lifecycle: &RwLock<Lifecycle>,
    transport: &T,
    envelope: Envelope,
    shutdown: &CancellationToken,
) -> Result<()> {
    let method = envelope.method().map(str::to_owned);
    let dispatched = dispatcher.dispatch(envelope, shutdown).await;
    if let Some(method) = method {
        advance(lifecycle, &method, &dispatched);
    }

    match dispatched {
        Dispatched::Reply(response) => transport.send(&response.into()).await,
        Dispatched::Notified(_) | Dispatched::Ignored => Ok(()),
    }
}

/// Move the lifecycle forward on a successful handshake step only.
fn advance(lifecycle: &RwLock<Lifecycle>, method: &str, dispatched: &Dispatched) {
    let succeeded = match dispatched {
        Dispatched::Reply(response) => !response.is_error(),
        Dispatched::Notified(result) => result.is_ok(),
        Dispatched::Ignored => false,
    };
    if !succeeded {
        return;
    }

    let mut lifecycle = lifecycle.write();
    match method {
        methods::INITIALIZE if *lifecycle == Lifecycle::Created => {
            *lifecycle = Lifecycle::Initializing;
        }
        methods::NOTIFICATION_INITIALIZED if *lifecycle == Lifecycle::Initializing => {
            *lifecycle = Lifecycle::Running;
            info!("Server initialized and running");
        }
        _ => {}
    }
}

/// Collect finished tasks; returns the first write failure.
fn reap(in_flight: &mut JoinSet<Result<()>>) -> Option<McpError> {
    while let Some(joined) = in_flight.try_join_next() {
        if let Some(e) = task_error(joined) {
            return Some(e);
        }
    }
    None
}

fn task_error(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Option<McpError> {
    match joined {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!("Failed to send response: {}", e);
            Some(e)
        }
        Err(e) => {
            error!("Request task failed: {}", e);
            None
        }
    }
}

/// Builder for MCP Server.
///
/// Handlers left unset fall back to [`DefaultHandler`].
pub struct McpServerBuilder {
    config: ServerConfig,
    resources: Option<Arc<dyn ResourceHandler>>,
    prompts: Option<Arc<dyn PromptHandler>>,
    tools: Option<Arc<dyn ToolHandler>>,
    system: Option<Arc<dyn SystemHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            resources: None,
            prompts: None,
            tools: None,
            system: None,
            notifications: HashMap::new(),
        }
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into().into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into().into();
        self
    }

    pub fn concurrent_requests(mut self, concurrent: bool) -> Self {
        self.config.concurrent_requests = concurrent;
        self
    }

    pub fn resources(mut self, handler: impl ResourceHandler + 'static) -> Self {
        self.resources = Some(Arc::new(handler));
        self
    }

    pub fn prompts(mut self, handler: impl PromptHandler + 'static) -> Self {
        self.prompts = Some(Arc::new(handler));
        self
    }

    pub fn tools(mut self, handler: impl ToolHandler + 'static) -> Self {
        self.tools = Some(Arc::new(handler));
        self
    }

    pub fn system(mut self, handler: impl SystemHandler + 'static) -> Self {
        self.system = Some(Arc::new(handler));
        self
    }

    /// Register a handler for one `notifications/*` method.
    pub fn notification(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        self.notifications.insert(method.into(), Arc::new(handler));
        self
    }

    fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            experimental: None,
            logging: Some(json!({})),
            prompts: self.prompts.as_ref().map(|_| ListChangedCapability::default()),
            resources: Some(ResourcesCapability {
                list_changed: Some(false),
                subscribe: Some(true),
            }),
            tools: self.tools.as_ref().map(|_| ListChangedCapability {
                list_changed: Some(false),
            }),
        }
    }

    pub fn build(self) -> Result<McpServer> {
        if self.config.max_line_bytes == 0 {
            return Err(McpError::Internal {
                message: "max_line_bytes must be greater than 0".into(),
            });
        }

        let state = Arc::new(ServerState::new(self.config.clone(), self.capabilities()));
        let defaults = Arc::new(DefaultHandler::new(Arc::clone(&state)));

        let handlers = Handlers {
            resources: self.resources.unwrap_or_else(|| defaults.clone()),
            prompts: self.prompts.unwrap_or_else(|| defaults.clone()),
            tools: self.tools.unwrap_or_else(|| defaults.clone()),
            system: self.system.unwrap_or_else(|| defaults.clone()),
        };

        let mut notifications = self.notifications;
        notifications
            .entry(methods::NOTIFICATION_INITIALIZED.into())
            .or_insert_with(|| Arc::new(InitializedHandler::new(Arc::clone(&state))));
        notifications
            .entry(methods::NOTIFICATION_CANCELLED.into())
            .or_insert_with(|| Arc::new(CancelledHandler));

        Ok(McpServer {
            config: self.config,
            state,
            dispatcher: Arc::new(Dispatcher::new(handlers, notifications)),
            lifecycle: Arc::new(RwLock::new(Lifecycle::Created)),
        })
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::protocol::transport::LineTransport;
    use crate::server::{EchoTool, ToolRegistry};
    use serde_json::Value;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    #[test]
    fn test_server_builder() {
        let tools = ToolRegistry::new();
        tools.register(EchoTool);

        let server = McpServerBuilder::new()
            .name("test-server")
            .version("0.1.0")
            .tools(tools)
            .build()
            .unwrap();

        assert_eq!(server.config().name, "test-server");
        assert_eq!(server.config().version, "0.1.0");
        assert!(server.state().capabilities.tools.is_some());
        assert!(server.state().capabilities.prompts.is_none());
        assert_eq!(server.lifecycle(), Lifecycle::Created);
    }

    #[tokio::test]
    async fn test_failed_initialize_keeps_lifecycle() {
        let server = McpServerBuilder::new().build().unwrap();
        let (client, server_io) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(server_io);
        let transport = Arc::new(LineTransport::new(read_half, write_half));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"protocolVersion\":7}}\n",
            )
            .await
            .unwrap();
        client_write.shutdown().await.unwrap();

        let shutdown = CancellationToken::new();
        let serving = server.serve(transport, shutdown);
        let mut lines = BufReader::new(client_read).lines();
        let (served, reply) = tokio::join!(serving, lines.next_line());
        served.unwrap();

        let reply: Value = serde_json::from_str(&reply.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], -32602);
        assert!(!server.state().is_initialized());
        assert!(server.state().client_info().is_none());
    }

    #[test]
    fn test_advance_requires_success() {
        let lifecycle = RwLock::new(Lifecycle::Created);
        let failed = Dispatched::Reply(JsonRpcResponse::error(
            RequestId::Number(1),
            ProtocolError::InvalidParams("missing field `clientInfo`".into()).into(),
        ));
        advance(&lifecycle, methods::INITIALIZE, &failed);
        assert_eq!(*lifecycle.read(), Lifecycle::Created);

        let ok = Dispatched::Reply(JsonRpcResponse::success(
            RequestId::Number(1),
            to_raw(&serde_json::json!({})).unwrap(),
        ));
        advance(&lifecycle, methods::INITIALIZE, &ok);
        assert_eq!(*lifecycle.read(), Lifecycle::Initializing);

        let rejected = Dispatched::Notified(Err(HandlerError::new("rejected")));
        advance(&lifecycle, methods::NOTIFICATION_INITIALIZED, &rejected);
        assert_eq!(*lifecycle.read(), Lifecycle::Initializing);

        advance(&lifecycle, methods::NOTIFICATION_INITIALIZED, &Dispatched::Notified(Ok(())));
        assert_eq!(*lifecycle.read(), Lifecycle::Running);
    }

    #[tokio::test]
    async fn test_lifecycle_follows_handshake() {
        let server = Arc::new(McpServerBuilder::new().build().unwrap());
        let (client, server_io) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(server_io);
        let transport = Arc::new(LineTransport::new(read_half, write_half));

        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.serve(transport, CancellationToken::new()).await })
        };

        let (client_read, mut client_write) = tokio::io::split(client);
        let mut lines = BufReader::new(client_read).lines();

        client_write
            .write_all(
                b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"initialize\",\"params\":{\"protocolVersion\":\"2024-11-05\",\"capabilities\":{},\"clientInfo\":{\"name\":\"t\",\"version\":\"1\"}}}\n",
            )
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(server.lifecycle(), Lifecycle::Initializing);

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["id"], 2);
        assert_eq!(server.lifecycle(), Lifecycle::Running);
        assert!(server.state().is_initialized());

        client_write.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(server.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_server() {
        let server = McpServerBuilder::new().build().unwrap();
        let (_client, server_io) = duplex(64);
        let (read_half, write_half) = tokio::io::split(server_io);
        let transport = Arc::new(LineTransport::new(read_half, write_half));

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        server.serve(transport, shutdown).await.unwrap();
        assert_eq!(server.lifecycle(), Lifecycle::Stopped);
    }

    #[tokio::test]
    async fn test_oversized_line_answered_with_parse_error() {
        let server = McpServerBuilder::new().build().unwrap();
        let (client, server_io) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(server_io);
        let transport = Arc::new(LineTransport::with_max_line_bytes(read_half, write_half, 48));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(
                format!(
                    "{{\"pad\":\"{}\"}}\n{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}}\n",
                    "x".repeat(64)
                )
                .as_bytes(),
            )
            .await
            .unwrap();
        client_write.shutdown().await.unwrap();

        server.serve(transport, CancellationToken::new()).await.unwrap();

        let mut lines = BufReader::new(client_read).lines();
        let first: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(first["id"], Value::Null);
        assert_eq!(first["error"]["code"], -32700);
        let second: Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert_eq!(second["id"], 1);
        assert_eq!(second["result"], serde_json::json!({}));
    }
}
