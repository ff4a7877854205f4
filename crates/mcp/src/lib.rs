// MCP (Model Context Protocol) over child-process stdio
// Newline-delimited JSON-RPC 2.0: server loop, tool registry and a client
// that spawns the server and correlates calls.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod protocol;
pub mod server;
pub mod tools;

pub use client::{McpClient, StdioClient};
pub use config::{ClientConfig, ServerCommand, ServerConfig};
pub use error::{FramingError, McpError, McpResult};
pub use server::McpServer;
