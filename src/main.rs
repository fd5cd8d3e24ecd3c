//! MCP server binary

use anyhow::Result;
use clap::Parser;
use easy_mcp::protocol::ServerInfo;
use easy_mcp::server::{McpServer, ServerConfig};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "easy-mcp")]
#[command(about = "Minimal MCP server over SSE")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "EASY_MCP_HOST")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value = "9443", env = "EASY_MCP_PORT")]
    port: u16,

    /// PEM certificate chain; enables TLS together with --key
    #[arg(long, env = "EASY_MCP_CERT")]
    cert: Option<PathBuf>,

    /// PEM private key; enables TLS together with --cert
    #[arg(long, env = "EASY_MCP_KEY")]
    key: Option<PathBuf>,

    /// Hostname shown in startup logs instead of the bind address
    #[arg(long, env = "EASY_MCP_PUBLIC_HOSTNAME")]
    public_hostname: Option<String>,

    /// Log level filter
    #[arg(long, default_value = "info", env = "EASY_MCP_LOG")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long, env = "EASY_MCP_LOG_FILE")]
    log_file: Option<PathBuf>,
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    if let Some(path) = &cli.log_file {
        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("invalid log file path: {}", path.display()))?;
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // Keep the flush guard alive for the process lifetime
        std::mem::forget(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
            .init();
    } else {
        registry.init();
    }

    Ok(())
}

async fn register_demo_tools(server: &McpServer) {
    server
        .register_tool(
            "echo",
            "Echo the supplied text back to the caller",
            json!({
                "type": "object",
                "properties": {
                    "text": {"type": "string", "description": "Text to echo"}
                },
                "required": ["text"]
            }),
            Arc::new(|args| {
                let text = args.get("text").and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!({
                    "content": [{"type": "text", "text": text}],
                    "isError": false
                }))
            }),
        )
        .await;
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = ServerConfig {
        host: cli.host,
        port: cli.port,
        cert_path: cli.cert,
        key_path: cli.key,
        public_hostname: cli.public_hostname,
        server_info: ServerInfo::default(),
    };

    let server = McpServer::new(config);
    register_demo_tools(&server).await;
    server.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    server.shutdown().await;

    Ok(())
}
