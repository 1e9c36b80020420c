//! Tool-invocation protocol: stdio transport, tool registry, server loop.

pub mod registry;
pub mod server;
pub mod transport;

pub use registry::{dispatch_tool, tool_specs, ToolSpec};
pub use server::McpServer;
