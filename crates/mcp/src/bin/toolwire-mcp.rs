// Standalone MCP server binary: weather tools on stdin/stdout

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolwire_core::WeatherStore;
use toolwire_mcp::server::McpServer;
use toolwire_mcp::tools::{register_weather_tools, ToolRegistry};
use toolwire_mcp::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "toolwire-mcp")]
#[command(about = "MCP weather server speaking JSON-RPC on stdio", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "TOOLWIRE_CONFIG", default_value = "toolwire.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ServerConfig::load(&args.config)?;

    tracing::info!(
        name = %config.server_name,
        version = %config.server_version,
        "Toolwire MCP server starting"
    );

    let store = Arc::new(WeatherStore::new(&config.weather));
    let mut registry = ToolRegistry::new();
    register_weather_tools(&mut registry, store);

    tracing::info!("Registered {} tools", registry.len());

    let mut server = McpServer::new(registry, &config);
    server.run_stdio().await.context("MCP server stopped")?;

    Ok(())
}
