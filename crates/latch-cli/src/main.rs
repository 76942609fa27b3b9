//! latchd - run a Latch cluster node from the command line

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use latch_core::{LatchConfig, NodeRole, RecoveryConfig};
use latch_runtime::NodeRuntime;

// ----------------------------------------------------------------------------
// CLI
// ----------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "latchd", about = "Run one node of a Latch cluster")]
struct Cli {
    /// Role this node plays: worker, server, or scheduler
    #[arg(long, value_parser = parse_role)]
    role: NodeRole,

    /// Cluster-unique node id (generated when omitted)
    #[arg(long)]
    node_id: Option<String>,

    /// Address to listen on (scheduler defaults to its configured endpoint,
    /// other roles to an ephemeral loopback port)
    #[arg(long)]
    listen: Option<String>,

    /// Scheduler host to register with
    #[arg(long, default_value = "127.0.0.1")]
    scheduler_host: String,

    /// Scheduler port to register with
    #[arg(long, default_value_t = 9550)]
    scheduler_port: u16,

    /// Number of workers the cluster expects
    #[arg(long, default_value_t = 1)]
    workers: u32,

    /// Number of servers the cluster expects
    #[arg(long, default_value_t = 1)]
    servers: u32,

    /// Recovery file for persisted node metadata
    #[arg(long)]
    recovery_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_role(s: &str) -> Result<NodeRole, String> {
    s.parse().map_err(|e| format!("{e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut config = LatchConfig::default();
    config.cluster.worker_num = cli.workers;
    config.cluster.server_num = cli.servers;
    config.cluster.scheduler_host = cli.scheduler_host.clone();
    config.cluster.scheduler_port = cli.scheduler_port;
    config.recovery = cli.recovery_file.clone().map(RecoveryConfig::file);

    let mut builder = NodeRuntime::builder(cli.role).config(config);
    if let Some(node_id) = cli.node_id {
        builder = builder.node_id(node_id);
    }
    if let Some(listen) = cli.listen {
        builder = builder.listen(listen);
    }
    let mut runtime = builder.build().context("failed to assemble node runtime")?;

    runtime.start().await.context("failed to start node")?;
    info!(node = %runtime.node().info(), "node is ready; press Ctrl-C to finish");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    info!("shutdown requested, finishing gracefully");
    if let Err(e) = runtime.finish().await {
        error!(error = %e, "graceful finish failed, forcing stop");
        runtime.stop().await.context("forced stop failed")?;
    }

    info!("node exited");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();
}
