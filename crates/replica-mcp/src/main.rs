//! Replica Sync MCP Server
//!
//! # Usage
//!
//! ```bash
//! replica-mcp [--config <path>] [--forward-script <path>] [--reverse-script <path>] [--log-dir <path>]
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Control log verbosity (default: `replica_mcp=info`)
//! - `REPLICA_SYNC_CONFIG`, `REPLICA_SYNC_SCRIPT`, `REPLICA_SYNC_SCRIPT_REVERSE`,
//!   `REPLICA_SYNC_LOG_DIR`: same as the matching flags
//!
//! # Protocol
//!
//! JSON-RPC 2.0 over stdio. Responses go to stdout, logs go to stderr.

use std::path::PathBuf;

use clap::Parser;
use replica_core::{Overrides, Settings};
use replica_mcp::{Dispatcher, ReplicaMcpServer};

/// MCP server for Replica Sync
#[derive(Parser)]
#[command(name = "replica-mcp")]
#[command(about = "MCP server for syncing a local and a remote vector store")]
#[command(version)]
struct Args {
    /// Configuration file (KEY=VALUE lines)
    #[arg(long, env = "REPLICA_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Procedure that syncs local to remote
    #[arg(long, env = "REPLICA_SYNC_SCRIPT")]
    forward_script: Option<PathBuf>,

    /// Procedure that syncs remote to local
    #[arg(long, env = "REPLICA_SYNC_SCRIPT_REVERSE")]
    reverse_script: Option<PathBuf>,

    /// Directory holding sync logs
    #[arg(long, env = "REPLICA_SYNC_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn overrides(self) -> Overrides {
        Overrides {
            config_path: self.config,
            forward_script: self.forward_script,
            reverse_script: self.reverse_script,
            log_dir: self.log_dir,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout is reserved for the protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("replica_mcp=info".parse()?)
                .add_directive("replica_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(&Args::parse().overrides())?;

    tracing::info!(
        local = settings.local.base_url(),
        remote = settings.remote.base_url(),
        log_dir = ?settings.log_dir,
        "Starting replica-mcp server"
    );

    let server = ReplicaMcpServer::new(Dispatcher::from_settings(&settings)?);
    server.run().await?;

    Ok(())
}
