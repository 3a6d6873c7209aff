//! Default server-side handlers, session state and tool registry.

pub mod handler;
pub mod state;
pub mod tools;

pub use handler::{CancelledHandler, DefaultHandler, InitializedHandler};
pub use state::{ServerState, ServerStateBuilder};
pub use tools::{EchoTool, ToolExecutor, ToolRegistry};
