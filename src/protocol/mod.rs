//! JSON-RPC 2.0 over newline-delimited streams.

pub mod client;
pub mod codec;
pub mod handler;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{PendingCall, RpcClient};
pub use codec::{DEFAULT_MAX_LINE_BYTES, Frame, LineCodec};
pub use handler::{
    Dispatched, Dispatcher, Handlers, NotificationHandler, PromptHandler, RequestContext,
    ResourceHandler, SystemHandler, ToolHandler,
};
pub use server::{Lifecycle, McpServer, McpServerBuilder};
pub use transport::{LineTransport, StdioTransport, Transport};
pub use types::*;
