//! Handler contracts and method dispatcher.

use crate::error::{HandlerError, HandlerResult, ProtocolError, ProtocolResult};
use crate::protocol::types::*;
use crate::schema::*;
use async_trait::async_trait;
use futures::future::{self, BoxFuture};
use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Resource capability.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn list(
        &self,
        ctx: &RequestContext,
        cursor: Option<String>,
    ) -> HandlerResult<ListResourcesResult>;

    async fn read(&self, ctx: &RequestContext, uri: String) -> HandlerResult<ReadResourceResult>;

    async fn subscribe(&self, ctx: &RequestContext, uri: String) -> HandlerResult<()>;

    async fn unsubscribe(&self, ctx: &RequestContext, uri: String) -> HandlerResult<()>;
}

/// Prompt capability.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn list(
        &self,
        ctx: &RequestContext,
        cursor: Option<String>,
    ) -> HandlerResult<ListPromptsResult>;

    async fn get(
        &self,
        ctx: &RequestContext,
        name: String,
        arguments: HashMap<String, String>,
    ) -> HandlerResult<GetPromptResult>;
}

/// Tool capability.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn list(
        &self,
        ctx: &RequestContext,
        cursor: Option<String>,
    ) -> HandlerResult<ListToolsResult>;

    async fn call(
        &self,
        ctx: &RequestContext,
        name: String,
        arguments: Value,
    ) -> HandlerResult<CallToolResult>;
}

/// Session-level methods: handshake, liveness, logging and completion.
#[async_trait]
pub trait SystemHandler: Send + Sync {
    async fn initialize(
        &self,
        ctx: &RequestContext,
        params: InitializeParams,
    ) -> HandlerResult<InitializeResult>;

    async fn ping(&self, _ctx: &RequestContext) -> HandlerResult<()> {
        Ok(())
    }

    async fn set_level(&self, ctx: &RequestContext, level: LoggingLevel) -> HandlerResult<()>;

    async fn complete(
        &self,
        ctx: &RequestContext,
        reference: Reference,
        argument: CompleteArgument,
    ) -> HandlerResult<CompleteResult>;
}

/// Handler for one `notifications/*` method.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &RequestContext,
        notification: &JsonRpcNotification,
    ) -> HandlerResult<()>;
}

/// The capability handlers a dispatcher routes to.
#[derive(Clone)]
pub struct Handlers {
    pub resources: Arc<dyn ResourceHandler>,
    pub prompts: Arc<dyn PromptHandler>,
    pub tools: Arc<dyn ToolHandler>,
    pub system: Arc<dyn SystemHandler>,
}

/// Request context for handler methods.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// `None` for notifications.
    pub request_id: Option<RequestId>,
    pub method: String,
    /// Fires when the server is shutting down.
    pub shutdown: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: Option<RequestId>, method: impl Into<String>) -> Self {
        Self {
            request_id,
            method: method.into(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Outcome of dispatching one envelope.
#[derive(Debug)]
pub enum Dispatched {
    /// Exactly one response to write for a request.
    Reply(JsonRpcResponse),
    /// A notification was handled. Never written to the wire.
    Notified(HandlerResult<()>),
    /// A response envelope; servers do not expect these.
    Ignored,
}

type RouteResult = Result<RawJson, JsonRpcError>;
type Route = Box<
    dyn Fn(Arc<Handlers>, RequestContext, Option<RawJson>) -> BoxFuture<'static, RouteResult>
        + Send
        + Sync,
>;

/// Method dispatcher that routes requests to the handlers.
///
/// The route table is built once in [`Dispatcher::new`] and never changes.
pub struct Dispatcher {
    handlers: Arc<Handlers>,
    routes: HashMap<&'static str, Route>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
}

impl Dispatcher {
    pub fn new(
        handlers: Handlers,
        notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    ) -> Self {
        Self {
            handlers: Arc::new(handlers),
            routes: route_table(),
            notifications,
        }
    }

    /// Whether a method is handled as a request.
    pub fn has_route(&self, method: &str) -> bool {
        self.routes.contains_key(method)
    }

    /// Dispatch one decoded envelope.
    ///
    /// The method namespace decides the path, not the presence of an id:
    /// `notifications/*` is never answered, anything else always is. An
    /// id-less request is answered with a `null` id.
    pub async fn dispatch(&self, envelope: Envelope, shutdown: &CancellationToken) -> Dispatched {
        match envelope {
            Envelope::Request(request) if request.method.starts_with(NOTIFICATION_PREFIX) => {
                let notification = JsonRpcNotification {
                    jsonrpc: request.jsonrpc,
                    method: request.method,
                    params: request.params,
                };
                Dispatched::Notified(self.dispatch_notification(notification, shutdown).await)
            }
            Envelope::Request(request) => {
                Dispatched::Reply(self.dispatch_request(request, shutdown).await)
            }
            Envelope::Notification(notification)
                if !notification.method.starts_with(NOTIFICATION_PREFIX) =>
            {
                let request = JsonRpcRequest {
                    jsonrpc: notification.jsonrpc,
                    id: RequestId::Null,
                    method: notification.method,
                    params: notification.params,
                };
                Dispatched::Reply(self.dispatch_request(request, shutdown).await)
            }
            Envelope::Notification(notification) => {
                Dispatched::Notified(self.dispatch_notification(notification, shutdown).await)
            }
            Envelope::Response(response) => {
                warn!(id = %response.id, "Unexpected response received");
                Dispatched::Ignored
            }
        }
    }

    /// Dispatch a request; always yields exactly one response.
    #[instrument(skip_all, fields(method = %request.method, id = %request.id))]
    pub async fn dispatch_request(
        &self,
        request: JsonRpcRequest,
        shutdown: &CancellationToken,
    ) -> JsonRpcResponse {
        debug!("Dispatching request");

        let Some(route) = self.routes.get(request.method.as_str()) else {
            warn!("Unknown method");
            return JsonRpcResponse::error(
                request.id,
                ProtocolError::MethodNotFound(request.method).into(),
            );
        };

        let ctx = RequestContext::new(Some(request.id.clone()), request.method)
            .with_shutdown(shutdown.clone());

        match route(Arc::clone(&self.handlers), ctx, request.params).await {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => {
                debug!(code = error.code, message = %error.message, "Request failed");
                JsonRpcResponse::error(request.id, error)
            }
        }
    }

    /// Dispatch a notification. A missing handler is a silent no-op.
    #[instrument(skip_all, fields(method = %notification.method))]
    pub async fn dispatch_notification(
        &self,
        notification: JsonRpcNotification,
        shutdown: &CancellationToken,
    ) -> HandlerResult<()> {
        let Some(handler) = self.notifications.get(&notification.method) else {
            debug!("No handler for notification");
            return Ok(());
        };

        let ctx = RequestContext::new(None, notification.method.clone())
            .with_shutdown(shutdown.clone());
        let result = handler.handle(&ctx, &notification).await;
        if let Err(e) = &result {
            warn!(error = %e, "Notification handler failed");
        }
        result
    }
}

/// Decode params for a resolved method. Absent or `null` params decode as `{}`.
pub fn decode_params<P: DeserializeOwned>(params: Option<&RawValue>) -> ProtocolResult<P> {
    let raw = match params {
        Some(raw) if raw.get() != "null" => raw.get(),
        _ => "{}",
    };
    serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidParams(e.to_string().into()))
}

fn handler_error(err: HandlerError) -> JsonRpcError {
    let error = JsonRpcError::from(ProtocolError::InternalError(err.message.into()));
    match err.data {
        Some(data) => error.with_data(data),
        None => error,
    }
}

fn route<P, R, F, Fut>(call: F) -> Route
where
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(Arc<Handlers>, RequestContext, P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    Box::new(
        move |handlers: Arc<Handlers>,
              ctx: RequestContext,
              params: Option<RawJson>|
              -> BoxFuture<'static, RouteResult> {
            let params = match decode_params::<P>(params.as_deref()) {
                Ok(params) => params,
                Err(e) => return Box::pin(future::ready(Err(JsonRpcError::from(e)))),
            };
            let fut = call(handlers, ctx, params);
            Box::pin(async move {
                let result = fut.await.map_err(handler_error)?;
                to_raw(&result).map_err(|e| {
                    JsonRpcError::from(ProtocolError::InternalError(e.to_string().into()))
                })
            })
        },
    )
}

fn route_table() -> HashMap<&'static str, Route> {
    let mut routes: HashMap<&'static str, Route> = HashMap::new();

    routes.insert(
        methods::INITIALIZE,
        route(|h: Arc<Handlers>, ctx, params: InitializeParams| async move {
            h.system.initialize(&ctx, params).await
        }),
    );
    routes.insert(
        methods::PING,
        route(|h: Arc<Handlers>, ctx, _: IgnoredAny| async move {
            h.system.ping(&ctx).await.map(|()| EmptyResult {})
        }),
    );
    routes.insert(
        methods::RESOURCES_LIST,
        route(|h: Arc<Handlers>, ctx, params: PaginatedParams| async move {
            h.resources.list(&ctx, params.cursor).await
        }),
    );
    routes.insert(
        methods::RESOURCES_READ,
        route(|h: Arc<Handlers>, ctx, params: ResourceParams| async move {
            h.resources.read(&ctx, params.uri).await
        }),
    );
    routes.insert(
        methods::RESOURCES_SUBSCRIBE,
        route(|h: Arc<Handlers>, ctx, params: ResourceParams| async move {
            h.resources
                .subscribe(&ctx, params.uri)
                .await
                .map(|()| EmptyResult {})
        }),
    );
    routes.insert(
        methods::RESOURCES_UNSUBSCRIBE,
        route(|h: Arc<Handlers>, ctx, params: ResourceParams| async move {
            h.resources
                .unsubscribe(&ctx, params.uri)
                .await
                .map(|()| EmptyResult {})
        }),
    );
    routes.insert(
        methods::PROMPTS_LIST,
        route(|h: Arc<Handlers>, ctx, params: PaginatedParams| async move {
            h.prompts.list(&ctx, params.cursor).await
        }),
    );
    routes.insert(
        methods::PROMPTS_GET,
        route(|h: Arc<Handlers>, ctx, params: GetPromptParams| async move {
            h.prompts.get(&ctx, params.name, params.arguments).await
        }),
    );
    routes.insert(
        methods::TOOLS_LIST,
        route(|h: Arc<Handlers>, ctx, params: PaginatedParams| async move {
            h.tools.list(&ctx, params.cursor).await
        }),
    );
    routes.insert(
        methods::TOOLS_CALL,
        route(|h: Arc<Handlers>, ctx, params: CallToolParams| async move {
            h.tools.call(&ctx, params.name, params.arguments).await
        }),
    );
    routes.insert(
        methods::LOGGING_SET_LEVEL,
        route(|h: Arc<Handlers>, ctx, params: SetLevelParams| async move {
            h.system
                .set_level(&ctx, params.level)
                .await
                .map(|()| EmptyResult {})
        }),
    );
    routes.insert(
        methods::COMPLETION_COMPLETE,
        route(|h: Arc<Handlers>, ctx, params: CompleteParams| async move {
            h.system
                .complete(&ctx, params.reference, params.argument)
                .await
        }),
    );

    routes
}
