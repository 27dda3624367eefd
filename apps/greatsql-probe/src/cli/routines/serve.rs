//! # Serve Routine
//!
//! Runs the MCP server in the foreground until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::display::{Message, MessageType};
use crate::cli::routines::{RoutineFailure, RoutineSuccess};
use crate::infrastructure::mysql::diagnostics::{DiagnosticSettings, SessionProvider};
use crate::mcp::{self, ProbeMcpHandler, MCP_PATH};

pub const SERVER_NAME: &str = "greatsql-probe";

fn parse_addr(host: &str, port: u16) -> Result<SocketAddr, RoutineFailure> {
    format!("{}:{}", host, port).parse().map_err(|e| {
        RoutineFailure::new(
            Message {
                action: "Serve".to_string(),
                details: format!("Invalid listen address {}:{}", host, port),
            },
            e,
        )
    })
}

pub async fn serve_mcp(
    provider: Arc<dyn SessionProvider>,
    settings: DiagnosticSettings,
    target: String,
    host: &str,
    port: u16,
) -> Result<RoutineSuccess, RoutineFailure> {
    let addr = parse_addr(host, port)?;

    let handler = ProbeMcpHandler::new(
        SERVER_NAME.to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
        provider,
        settings,
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal.cancel();
        }
    });

    show_message!(
        MessageType::Info,
        Message {
            action: "Serve".to_string(),
            details: format!(
                "MCP server for {} on http://{}{} (Ctrl-C to stop)",
                target, addr, MCP_PATH
            ),
        }
    );
    info!("Starting MCP server on {}", addr);

    mcp::serve(handler, addr, shutdown).await.map_err(|e| {
        RoutineFailure::new(
            Message {
                action: "Serve".to_string(),
                details: format!("MCP server on {} stopped with an error", addr),
            },
            e,
        )
    })?;

    Ok(RoutineSuccess::success(Message {
        action: "Serve".to_string(),
        details: "MCP server stopped".to_string(),
    }))
}
