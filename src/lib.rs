//! Minimal MCP server over SSE
//!
//! A Model Context Protocol server that exposes application-defined tools to
//! JSON-RPC clients over a Server-Sent Events transport. The HTTP layer is
//! hand-rolled on raw TCP (optionally TLS-wrapped): clients open a long-lived
//! `GET /sse` stream, receive a correlated `/messages/` endpoint, and submit
//! commands with short-lived POSTs whose responses come back over the stream.
//!
//! # Example
//!
//! ```no_run
//! use easy_mcp::server::{McpServer, ServerConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> easy_mcp::Result<()> {
//! let server = McpServer::new(ServerConfig::default());
//! server
//!     .register_tool(
//!         "echo",
//!         "Echo the supplied text back",
//!         json!({"type": "object", "properties": {"text": {"type": "string"}}}),
//!         Arc::new(|args| {
//!             let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
//!             Ok(json!({"content": [{"type": "text", "text": text}], "isError": false}))
//!         }),
//!     )
//!     .await;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;


pub use error::{Error, Result};
