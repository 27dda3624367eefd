//! Model Context Protocol server exposing the diagnostics as tools

pub mod server;
pub mod tools;

pub use server::{create_mcp_http_service, serve, ProbeMcpHandler, MCP_PATH};
