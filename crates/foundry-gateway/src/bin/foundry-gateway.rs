//! Foundry Gateway Binary
//!
//! Standalone approval review server. Run `foundry serve` instead to also
//! expose the deployment table and the build loop.
//!
//! # Usage
//! ```bash
//! foundry-gateway [--config foundry.toml] [--port 8080] [--host 127.0.0.1] [--verbose]
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use foundry_core::{ApprovalGuard, FoundryConfig};
use foundry_gateway::{Gateway, GatewayState};

/// Foundry Gateway - approval review over HTTP
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "foundry.toml")]
    config: PathBuf,

    /// Port to listen on (overrides the configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides the configuration)
    #[arg(long)]
    host: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    foundry_core::telemetry::init(args.verbose);

    let mut config = FoundryConfig::load(Some(&args.config))?;
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    let addr = config.socket_addr()?;

    let guard = ApprovalGuard::from_settings(&config.approvals, config.approvals_path())
        .context("failed to open approvals")?;
    let gateway = Gateway::new(GatewayState::new(Arc::new(guard)));

    println!("Foundry gateway on http://{addr}");
    println!("   GET  /api/approvals");
    println!("   POST /api/approvals/:id/approve | /deny");
    println!("Press Ctrl+C to stop");

    let state = gateway.state();
    tokio::select! {
        result = gateway.start(addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(pending = state.guard.list_pending().await.len(), "shutting down");
        }
    }
    Ok(())
}
