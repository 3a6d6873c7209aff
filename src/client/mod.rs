//! Typed MCP client.
//!
//! Wraps an [`RpcClient`] and decodes each result into its schema type.
//! Every call takes a cancellation token; cancelling it retracts the request
//! locally without notifying the server.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::protocol::client::RpcClient;
use crate::protocol::transport::{LineTransport, Transport};
use crate::protocol::types::{JsonRpcNotification, RawJson, to_raw};
use crate::schema::*;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct McpClient<T: Transport + 'static> {
    rpc: RpcClient<T>,
    config: ClientConfig,
    server: RwLock<Option<InitializeResult>>,
}

impl<R, W> McpClient<LineTransport<R, W>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Connect over a pair of byte streams, typically a child's stdout/stdin.
    pub fn with_streams(reader: R, writer: W, config: ClientConfig) -> Self {
        let transport = LineTransport::with_max_line_bytes(reader, writer, config.max_line_bytes);
        Self::new(Arc::new(transport), config)
    }
}

impl<T: Transport + 'static> McpClient<T> {
    pub fn new(transport: Arc<T>, config: ClientConfig) -> Self {
        let rpc = RpcClient::new(transport).with_request_timeout(config.request_timeout);
        Self {
            rpc,
            config,
            server: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying correlation engine.
    pub fn rpc(&self) -> &RpcClient<T> {
        &self.rpc
    }

    /// What the server reported during the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server.read().clone()
    }

    pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<JsonRpcNotification>> {
        self.rpc.take_notifications()
    }

    /// Perform the handshake: `initialize`, then `notifications/initialized`.
    pub async fn initialize(
        &self,
        capabilities: ClientCapabilities,
        cancel: &CancellationToken,
    ) -> ClientResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: self.config.protocol_version.to_string(),
            capabilities,
            client_info: Implementation::new(
                self.config.name.to_string(),
                self.config.version.to_string(),
            ),
        };
        let result: InitializeResult = self.call(methods::INITIALIZE, &params, cancel).await?;
        info!(
            server = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "Connected to server"
        );

        self.rpc
            .notify(methods::NOTIFICATION_INITIALIZED, None)
            .await?;
        *self.server.write() = Some(result.clone());
        Ok(result)
    }

    pub async fn ping(&self, cancel: &CancellationToken) -> ClientResult<()> {
        let raw = self.rpc.request(methods::PING, None, cancel).await?;
        let _: EmptyResult = decode(&raw)?;
        Ok(())
    }

    pub async fn list_resources(
        &self,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<ListResourcesResult> {
        self.call(methods::RESOURCES_LIST, &PaginatedParams { cursor }, cancel)
            .await
    }

    pub async fn read_resource(
        &self,
        uri: impl Into<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<ReadResourceResult> {
        let params = ResourceParams { uri: uri.into() };
        self.call(methods::RESOURCES_READ, &params, cancel).await
    }

    pub async fn subscribe_resource(
        &self,
        uri: impl Into<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let params = ResourceParams { uri: uri.into() };
        let _: EmptyResult = self
            .call(methods::RESOURCES_SUBSCRIBE, &params, cancel)
            .await?;
        Ok(())
    }

    pub async fn unsubscribe_resource(
        &self,
        uri: impl Into<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let params = ResourceParams { uri: uri.into() };
        let _: EmptyResult = self
            .call(methods::RESOURCES_UNSUBSCRIBE, &params, cancel)
            .await?;
        Ok(())
    }

    pub async fn list_prompts(
        &self,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<ListPromptsResult> {
        self.call(methods::PROMPTS_LIST, &PaginatedParams { cursor }, cancel)
            .await
    }

    pub async fn get_prompt(
        &self,
        name: impl Into<String>,
        arguments: HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> ClientResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.into(),
            arguments,
        };
        self.call(methods::PROMPTS_GET, &params, cancel).await
    }

    pub async fn list_tools(
        &self,
        cursor: Option<String>,
        cancel: &CancellationToken,
    ) -> ClientResult<ListToolsResult> {
        self.call(methods::TOOLS_LIST, &PaginatedParams { cursor }, cancel)
            .await
    }

    pub async fn call_tool(
        &self,
        name: impl Into<String>,
        arguments: Value,
        cancel: &CancellationToken,
    ) -> ClientResult<CallToolResult> {
        let params = CallToolParams {
            name: name.into(),
            arguments,
        };
        self.call(methods::TOOLS_CALL, &params, cancel).await
    }

    pub async fn set_logging_level(
        &self,
        level: LoggingLevel,
        cancel: &CancellationToken,
    ) -> ClientResult<()> {
        let _: EmptyResult = self
            .call(methods::LOGGING_SET_LEVEL, &SetLevelParams { level }, cancel)
            .await?;
        Ok(())
    }

    pub async fn complete(
        &self,
        reference: Reference,
        argument: CompleteArgument,
        cancel: &CancellationToken,
    ) -> ClientResult<CompleteResult> {
        let params = CompleteParams {
            reference,
            argument,
        };
        self.call(methods::COMPLETION_COMPLETE, &params, cancel)
            .await
    }

    /// Fail every outstanding request and stop reading.
    pub fn close(&self) {
        self.rpc.close();
    }

    async fn call<P, R>(&self, method: &str, params: &P, cancel: &CancellationToken) -> ClientResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = to_raw(params).map_err(ClientError::Encode)?;
        debug!(method, "Calling server");
        let raw = self.rpc.request(method, Some(params), cancel).await?;
        decode(&raw)
    }
}

fn decode<R: DeserializeOwned>(raw: &RawJson) -> ClientResult<R> {
    serde_json::from_str(raw.get()).map_err(ClientError::Decode)
}
