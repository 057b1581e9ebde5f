//! duplex: blue/green deployment CLI.
//!
//! # Usage
//!
//! ```text
//! duplex status
//! duplex deploy --tag main-3f2a9c1
//! duplex flip green
//! duplex deploy-and-flip --wait 30
//! duplex deploy-when-ready --tag main-3f2a9c1
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use duplex_core::Color;

mod commands;
mod context;
mod render;

#[derive(Parser)]
#[command(
    name = "duplex",
    about = "Duplex: blue/green deployment orchestrator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to duplex.toml.
    #[arg(short, long, global = true, default_value = "duplex.toml")]
    config: PathBuf,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show both environments: capacity, instances, target health and cost.
    Status {
        /// Print the snapshots as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Deploy to the inactive environment and wait for it to converge.
    Deploy {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
        /// Image tag to deploy (recorded in history on success).
        #[arg(short, long, conflicts_with = "previous")]
        tag: Option<String>,
        /// Redeploy the tag before the current one in history.
        #[arg(long)]
        previous: bool,
        /// Service name recorded in history.
        #[arg(short, long)]
        service: Option<String>,
        /// Convergence timeout override (e.g. "10m").
        #[arg(long)]
        timeout: Option<String>,
    },
    /// Switch production traffic.
    ///
    /// Without a color, flips to whichever environment is inactive.
    Flip {
        /// Environment to receive traffic (blue or green).
        target: Option<Color>,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Deploy to the inactive environment, stabilize, then flip to it.
    DeployAndFlip {
        /// Seconds to wait after convergence before flipping.
        #[arg(short, long)]
        wait: Option<u64>,
        #[arg(short, long)]
        tag: Option<String>,
        #[arg(short, long)]
        service: Option<String>,
    },
    /// Scale the inactive environment down to zero.
    ScaleDown {
        #[arg(short, long)]
        yes: bool,
    },
    /// Wait for an image tag to appear in the registry.
    WaitImage {
        #[arg(short, long)]
        tag: String,
        #[arg(short, long)]
        service: Option<String>,
        /// Give up after this long (e.g. "20m").
        #[arg(long)]
        timeout: Option<String>,
    },
    /// Wait for an image, then deploy and flip to it.
    DeployWhenReady {
        #[arg(short, long)]
        tag: String,
        #[arg(short, long)]
        service: Option<String>,
        /// Seconds to wait after convergence before flipping.
        #[arg(short, long)]
        wait: Option<u64>,
        /// Image wait timeout (e.g. "20m").
        #[arg(long)]
        timeout: Option<String>,
    },
    /// Show recent deployments, newest first.
    History {
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    let ctx = context::Context::load(&cli.config)?;

    match cli.command {
        Commands::Status { json } => commands::status::run(&ctx, json).await,
        Commands::Deploy {
            yes,
            tag,
            previous,
            service,
            timeout,
        } => commands::deploy::deploy(&ctx, yes, tag, previous, service, timeout).await,
        Commands::Flip { target, yes } => commands::flip::run(&ctx, target, yes).await,
        Commands::DeployAndFlip { wait, tag, service } => {
            commands::deploy::deploy_and_flip(&ctx, wait, tag, service).await
        }
        Commands::ScaleDown { yes } => commands::deploy::scale_down(&ctx, yes).await,
        Commands::WaitImage {
            tag,
            service,
            timeout,
        } => commands::image::wait(&ctx, &tag, service, timeout).await,
        Commands::DeployWhenReady {
            tag,
            service,
            wait,
            timeout,
        } => commands::image::deploy_when_ready(&ctx, &tag, service, wait, timeout).await,
        Commands::History { limit } => commands::history::run(&ctx, limit),
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,duplex=info"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}
