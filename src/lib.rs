//! Model Context Protocol over newline-delimited JSON-RPC 2.0.
//!
//! Provides a line transport, an envelope codec that defers `params` and
//! `result` decoding, a client correlation engine, and a server dispatch
//! core that routes requests to pluggable handlers.
//!
//! # Example
//!
//! ```no_run
//! use mcp_stdio::{
//!     config::ServerConfig,
//!     protocol::McpServerBuilder,
//!     server::{EchoTool, ToolRegistry},
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tools = ToolRegistry::new();
//!     tools.register(EchoTool);
//!
//!     let server = McpServerBuilder::new()
//!         .config(ServerConfig::builder().from_env()?.build()?)
//!         .tools(tools)
//!         .build()?;
//!
//!     server.serve_stdio(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod server;

pub use client::McpClient;
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, McpError, ProtocolError, Result};
pub use protocol::{McpServer, McpServerBuilder, RpcClient};
pub use server::{ServerState, ServerStateBuilder, ToolRegistry};
