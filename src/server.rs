//! MCP server core
//!
//! Owns the listening socket (plain or TLS-wrapped), spawns one handling task
//! per accepted connection and one keep-alive task per SSE session, and
//! drives the JSON-RPC dispatcher that answers over the correlated stream.

use crate::http::{self, RawRequest, Route};
use crate::protocol::{
    error_codes, methods, InitializeResult, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, MCP_VERSION,
};
use crate::session::{BoxedConnection, Session, SessionRegistry};
use crate::tools::{arguments_from, ToolHandler, ToolRegistry};
use crate::{Error, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Interval between keep-alive pings on each SSE stream
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Server configuration supplied by the embedding application
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// PEM certificate chain; TLS is enabled when both paths are set
    pub cert_path: Option<PathBuf>,
    /// PEM private key
    pub key_path: Option<PathBuf>,
    /// Operator-facing hostname for display only, never embedded in frames
    pub public_hostname: Option<String>,
    pub server_info: ServerInfo,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9443,
            cert_path: None,
            key_path: None,
            public_hostname: None,
            server_info: ServerInfo::default(),
        }
    }
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.cert_path.is_some() && self.key_path.is_some()
    }

    /// Hostname shown to operators in startup logs
    pub fn display_host(&self) -> &str {
        self.public_hostname.as_deref().unwrap_or(&self.host)
    }
}

/// MCP server state: registries, shutdown signal, configuration
#[derive(Clone)]
pub struct McpServer {
    config: Arc<ServerConfig>,
    sessions: SessionRegistry,
    tools: ToolRegistry,
    // false until start(); flipped back to false on shutdown. Keep-alive
    // loops and the accept loop watch this for cooperative cancellation.
    running: Arc<watch::Sender<bool>>,
}

impl McpServer {
    pub fn new(config: ServerConfig) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            sessions: SessionRegistry::new(),
            tools: ToolRegistry::new(),
            running: Arc::new(running),
        }
    }

    /// Register a tool; an existing name is silently replaced
    pub async fn register_tool(
        &self,
        name: &str,
        description: &str,
        input_schema: Value,
        handler: ToolHandler,
    ) {
        self.tools
            .register(name, description, input_schema, handler)
            .await;
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// Bind the listening socket and spawn the accept loop.
    ///
    /// Returns the bound address. Bind failures and TLS configuration errors
    /// are fatal; everything after this point only ever aborts a single
    /// connection.
    pub async fn start(&self) -> Result<SocketAddr> {
        let bind_addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| Error::Config(format!("failed to bind {}: {}", bind_addr, e)))?;
        let local_addr = listener.local_addr()?;

        let tls_acceptor = match (&self.config.cert_path, &self.config.key_path) {
            (Some(cert), Some(key)) => Some(build_tls_acceptor(cert, key)?),
            _ => None,
        };

        self.running.send_replace(true);

        let scheme = if tls_acceptor.is_some() { "https" } else { "http" };
        info!(
            "MCP server listening on {}://{}:{} (sse endpoint: /sse)",
            scheme,
            self.config.display_host(),
            local_addr.port()
        );

        let server = self.clone();
        tokio::spawn(async move {
            server.accept_loop(listener, tls_acceptor).await;
        });

        Ok(local_addr)
    }

    /// Stop accepting connections and tear down every session
    pub async fn shutdown(&self) {
        self.running.send_replace(false);
        self.sessions.remove_all().await;
        info!("Server shutdown complete");
    }

    async fn accept_loop(self, listener: TcpListener, tls_acceptor: Option<TlsAcceptor>) {
        let mut running = self.running.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer_addr)) => {
                            debug!("Connection from {}", peer_addr);
                            let server = self.clone();
                            let tls_acceptor = tls_acceptor.clone();
                            tokio::spawn(async move {
                                server.handle_connection(socket, peer_addr, tls_acceptor).await;
                            });
                        }
                        Err(e) => {
                            if self.is_running() {
                                error!("Accept failed: {}", e);
                            }
                        }
                    }
                }
                changed = running.changed() => {
                    if changed.is_err() || !*running.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Accept loop stopped");
    }

    async fn handle_connection(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
        tls_acceptor: Option<TlsAcceptor>,
    ) {
        let mut connection: BoxedConnection = match tls_acceptor {
            Some(acceptor) => match acceptor.accept(socket).await {
                Ok(stream) => Box::new(stream),
                Err(e) => {
                    warn!("TLS handshake with {} failed: {}", peer_addr, e);
                    return;
                }
            },
            None => Box::new(socket),
        };

        let request = match http::read_request(&mut connection).await {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("{} closed without sending a request", peer_addr);
                return;
            }
            Err(e) => {
                warn!("Failed to read request from {}: {}", peer_addr, e);
                return;
            }
        };

        debug!(
            "{} {} from {}",
            request.method, request.path, peer_addr
        );

        match request.route() {
            Route::SseOpen => self.handle_sse_open(connection, peer_addr).await,
            Route::PostMessage => {
                self.handle_message_submit(connection, peer_addr, request)
                    .await
            }
            Route::Fallback => Self::handle_default(connection, peer_addr).await,
        }
    }

    /// Open an SSE stream: create the session, send headers plus the
    /// `endpoint` event, and start its keep-alive task. The connection stays
    /// open; it now belongs to the session.
    async fn handle_sse_open(&self, connection: BoxedConnection, peer_addr: SocketAddr) {
        let session = self.sessions.create(connection, peer_addr).await;
        info!(
            "New SSE connection from {}, session_id={}",
            peer_addr, session.id
        );

        if !session.send_raw(http::sse_response_headers().as_bytes()).await {
            self.sessions.remove(&session.id).await;
            return;
        }

        let endpoint_url = format!("/messages/?session_id={}", session.id);
        if !session
            .send_message("endpoint", Some(&Value::String(endpoint_url)))
            .await
        {
            self.sessions.remove(&session.id).await;
            return;
        }

        self.spawn_keep_alive(session.id.clone());
    }

    /// Every 15 seconds, while the server runs and the session is still
    /// registered and active, send a ping. A failed ping evicts the session
    /// so the registry does not accumulate dead entries.
    fn spawn_keep_alive(&self, session_id: String) {
        let sessions = self.sessions.clone();
        let mut running = self.running.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(KEEP_ALIVE_INTERVAL) => {}
                    changed = running.changed() => {
                        if changed.is_err() || !*running.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                if !*running.borrow() {
                    break;
                }
                let session = match sessions.get(&session_id).await {
                    Some(session) if session.is_active() => session,
                    _ => break,
                };
                if !session.send_message("ping", None).await {
                    warn!("Keep-alive failed for session {}, evicting", session_id);
                    sessions.remove(&session_id).await;
                    break;
                }
            }
            debug!("Keep-alive task for session {} stopped", session_id);
        });
    }

    /// Handle a short-lived `POST /messages/` submission. Dispatcher output
    /// goes over the session's SSE stream; this connection only ever sees an
    /// HTTP status.
    async fn handle_message_submit(
        &self,
        mut connection: BoxedConnection,
        peer_addr: SocketAddr,
        request: RawRequest,
    ) {
        let Some(session_id) = request.query_param("session_id") else {
            debug!("POST from {} without session_id", peer_addr);
            let _ = http::write_plain(
                &mut connection,
                "400 Bad Request",
                "Missing session_id parameter",
            )
            .await;
            return;
        };

        let Some(session) = self.sessions.get(&session_id).await else {
            debug!("POST from {} for unknown session {}", peer_addr, session_id);
            let _ = http::write_plain(&mut connection, "404 Not Found", "Invalid session").await;
            return;
        };

        // Only JSON bodies are dispatched; anything else is silently ignored
        // but still acknowledged.
        if request.header("content-type") == Some("application/json") {
            self.handle_jsonrpc(&session, &request.body).await;
        }

        let _ = http::write_plain(&mut connection, "202 Accepted", "").await;
    }

    /// Fixed fallback so arbitrary probes do not hang
    async fn handle_default(mut connection: BoxedConnection, peer_addr: SocketAddr) {
        debug!("Fallback response for {}", peer_addr);
        let _ = http::write_plain(&mut connection, "200 OK", "Hello World").await;
    }

    /// Interpret one JSON-RPC envelope and answer over the session's stream.
    ///
    /// Parse failures are logged and dropped: there is no id to attach an
    /// error to reliably. Requests without an id are notifications and never
    /// produce a frame, though tool invocations still run for their effects.
    async fn handle_jsonrpc(&self, session: &Arc<Session>, body: &str) {
        let request: JsonRpcRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid JSON-RPC payload from session {}: {}", session.id, e);
                return;
            }
        };

        debug!(
            "JSON-RPC request: session={}, method={}, id={:?}",
            session.id, request.method, request.id
        );

        let response = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(&request),
            methods::INITIALIZED => None,
            methods::LIST_TOOLS => self.handle_list_tools(&request).await,
            methods::CALL_TOOL | methods::RUN_TOOL => self.handle_call_tool(&request).await,
            other => match &request.id {
                Some(id) => Some(JsonRpcResponse::error(
                    request.jsonrpc.clone(),
                    id.clone(),
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                )),
                None => {
                    debug!("Dropping notification for unknown method: {}", other);
                    None
                }
            },
        };

        if let Some(response) = response {
            self.deliver(session, response).await;
        }
    }

    fn handle_initialize(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone()?;
        let protocol_version = request
            .params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(MCP_VERSION)
            .to_string();

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities::default(),
            server_info: self.config.server_info.clone(),
        };

        Some(JsonRpcResponse::success(
            request.jsonrpc.clone(),
            id,
            serde_json::json!(result),
        ))
    }

    async fn handle_list_tools(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone()?;
        let tools = self.tools.list().await;
        Some(JsonRpcResponse::success(
            request.jsonrpc.clone(),
            id,
            serde_json::json!({ "tools": tools }),
        ))
    }

    async fn handle_call_tool(&self, request: &JsonRpcRequest) -> Option<JsonRpcResponse> {
        let params = request.params.as_ref();
        let tool_name = params
            .and_then(|p| p.get("name"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let Some(tool) = self.tools.get(&tool_name).await else {
            let id = request.id.clone()?;
            return Some(JsonRpcResponse::error(
                request.jsonrpc.clone(),
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Tool not found: {}", tool_name),
            ));
        };

        // Handlers run inline on this connection's task; notifications still
        // execute for their side effects even though no frame goes out.
        let outcome = (tool.handler)(arguments_from(params));
        let id = request.id.clone()?;
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(request.jsonrpc.clone(), id, result),
            Err(e) => JsonRpcResponse::error(
                request.jsonrpc.clone(),
                id,
                error_codes::INTERNAL_ERROR,
                format!("Tool execution failed: {}", e),
            ),
        })
    }

    /// Serialize a response and push it as a generic `message` SSE event
    async fn deliver(&self, session: &Arc<Session>, response: JsonRpcResponse) {
        match serde_json::to_value(&response) {
            Ok(frame) => {
                session.send_message("message", Some(&frame)).await;
            }
            Err(e) => {
                error!("Failed to serialize response for {}: {}", session.id, e);
            }
        }
    }
}

/// Build a TLS acceptor from PEM certificate and key files.
///
/// Missing or unreadable files abort startup; this is the only error class
/// that stops the whole process.
fn build_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        Error::Config(format!(
            "certificate file not found: {} ({})",
            cert_path.display(),
            e
        ))
    })?;
    let certs: std::result::Result<Vec<_>, _> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(cert_file)).collect();
    let certs = certs.map_err(|e| {
        Error::Config(format!(
            "invalid certificate in {}: {}",
            cert_path.display(),
            e
        ))
    })?;

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        Error::Config(format!(
            "private key file not found: {} ({})",
            key_path.display(),
            e
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
        .map_err(|e| Error::Config(format!("invalid private key in {}: {}", key_path.display(), e)))?
        .ok_or_else(|| {
            Error::Config(format!("no private key found in {}", key_path.display()))
        })?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("TLS configuration rejected: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
