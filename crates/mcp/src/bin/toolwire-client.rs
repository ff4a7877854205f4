// Demo client: launch the server, handshake, list tools and query the weather

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use toolwire_mcp::{ClientConfig, ServerCommand, StdioClient};

#[derive(Parser, Debug)]
#[command(name = "toolwire-client")]
#[command(about = "Query a toolwire MCP server over stdio", long_about = None)]
struct Args {
    /// Server executable (defaults to toolwire-mcp next to this binary)
    #[arg(short, long, env = "TOOLWIRE_SERVER")]
    server: Option<PathBuf>,

    /// City to look up
    #[arg(long, default_value = "berlin")]
    city: String,

    /// Store this temperature for the city before reading it back
    #[arg(long)]
    set: Option<f64>,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Extra arguments passed to the server
    #[arg(last = true)]
    server_args: Vec<String>,
}

fn default_server() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    let dir = exe.parent().context("Executable has no parent directory")?;
    Ok(dir.join(format!("toolwire-mcp{}", std::env::consts::EXE_SUFFIX)))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let program = match args.server {
        Some(path) => path,
        None => default_server()?,
    };
    let mut command = ServerCommand::new(program);
    for arg in args.server_args {
        command = command.arg(arg);
    }

    let config = ClientConfig::default().with_request_timeout(Duration::from_secs(args.timeout));
    let session = StdioClient::spawn(command, config)
        .await
        .context("Failed to start MCP session")?;

    let info = session.server_info();
    println!(
        "Connected to {} {} (protocol {})",
        info.server_info.name, info.server_info.version, info.protocol_version
    );

    let client = session.client();
    println!("Available tools:");
    for tool in client.list_tools().await? {
        println!("  {} - {}", tool.name, tool.description);
    }

    if let Some(temp) = args.set {
        let ack = client
            .call_tool("set_weather", json!({"city": args.city, "temp": temp}))
            .await?;
        println!("set_weather: {}", ack);
    }

    let temp = client
        .call_tool("get_weather", json!({"city": args.city}))
        .await?;
    println!("get_weather({}): {}", args.city, temp);

    let status = session.shutdown().await?;
    if !status.success() {
        anyhow::bail!("Server exited with {}", status);
    }

    Ok(())
}
