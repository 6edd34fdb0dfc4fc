// crates/warden-server/src/mcp/mod.rs
// MCP transport: SSE stream + POST message endpoint carrying JSON-RPC 2.0

pub mod jsonrpc;
pub mod message;
pub mod resources;
pub mod router;
pub mod sse;
pub mod tools;

pub use message::message_handler;
pub use sse::sse_handler;
