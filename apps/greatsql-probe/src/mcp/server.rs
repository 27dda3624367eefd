use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
    },
    ErrorData, RoleServer, ServerHandler,
};
use serde_json::{Map, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::tools::{create_error_result, diagnostics, execute_query, explore};
use crate::infrastructure::mysql::diagnostics::{
    DiagnosticOperation, DiagnosticSettings, SessionProvider,
};

/// Path the streamable HTTP transport is mounted on
pub const MCP_PATH: &str = "/mcp";

/// Handler for the MCP server that exposes the diagnostics and read-only query tools
#[derive(Clone)]
pub struct ProbeMcpHandler {
    server_name: String,
    server_version: String,
    provider: Arc<dyn SessionProvider>,
    settings: DiagnosticSettings,
}

impl ProbeMcpHandler {
    /// Create a new MCP handler instance
    pub fn new(
        server_name: String,
        server_version: String,
        provider: Arc<dyn SessionProvider>,
        settings: DiagnosticSettings,
    ) -> Self {
        Self {
            server_name,
            server_version,
            provider,
            settings,
        }
    }

    /// Every tool the server exposes, diagnostics first
    pub fn tools() -> Vec<Tool> {
        let mut tools = diagnostics::tool_definitions();
        tools.extend(explore::tool_definitions());
        tools.push(execute_query::tool_definition());
        tools
    }

    /// Route a tool call by name
    pub async fn dispatch(
        &self,
        name: &str,
        arguments: Option<&Map<String, Value>>,
        cancel: CancellationToken,
    ) -> CallToolResult {
        let provider = self.provider.as_ref();

        match name {
            execute_query::TOOL_NAME => execute_query::handle_call(provider, arguments).await,
            explore::LIST_DATABASES => explore::list_databases(provider).await,
            explore::LIST_TABLES => explore::list_tables(provider, arguments).await,
            explore::TABLE_ROW_COUNT => explore::table_row_count(provider, arguments).await,
            other => match other.parse::<DiagnosticOperation>() {
                Ok(operation) => {
                    diagnostics::handle_call(provider, &self.settings, operation, cancel).await
                }
                Err(_) => create_error_result(format!("Unknown tool: {}", other)),
            },
        }
    }
}

impl ServerHandler for ProbeMcpHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities {
                tools: Some(Default::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
                title: Some("GreatSQL Probe MCP Server".to_string()),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "GreatSQL Probe MCP Server - Run health diagnostics against a GreatSQL / MySQL server and explore its schemas with read-only queries".to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _pagination: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult {
            tools: Self::tools(),
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        param: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self
            .dispatch(param.name.as_ref(), param.arguments.as_ref(), context.ct.clone())
            .await)
    }
}

/// Create an MCP HTTP service around one handler
pub fn create_mcp_http_service(
    handler: ProbeMcpHandler,
) -> StreamableHttpService<ProbeMcpHandler, LocalSessionManager> {
    info!(
        "[MCP] Creating MCP HTTP service: {} v{}",
        handler.server_name, handler.server_version
    );

    let session_manager = Arc::new(LocalSessionManager::default());
    let config = StreamableHttpServerConfig {
        sse_keep_alive: Some(std::time::Duration::from_secs(5)),
        stateful_mode: true,
    };

    StreamableHttpService::new(move || Ok(handler.clone()), session_manager, config)
}

fn not_found() -> Response<BoxBody<Bytes, Infallible>> {
    let mut response = Response::new(Full::new(Bytes::from("Not Found")).boxed());
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

/// Serve the MCP endpoint on `addr` until `shutdown` fires
pub async fn serve(
    handler: ProbeMcpHandler,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let mcp_service = create_mcp_http_service(handler);

    info!("[MCP] Listening on http://{}{}", addr, MCP_PATH);

    loop {
        let (stream, remote_addr) = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("[MCP] Shutting down");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };

        let io = TokioIo::new(stream);
        let mcp_service = mcp_service.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let mcp_service = mcp_service.clone();
                async move {
                    if req.uri().path().starts_with(MCP_PATH) {
                        let tower = TowerToHyperService::new(mcp_service);
                        hyper::service::Service::call(&tower, req).await
                    } else {
                        Ok::<_, Infallible>(not_found())
                    }
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                warn!("[MCP] Connection error from {}: {}", remote_addr, e);
            }
        });
    }
}
