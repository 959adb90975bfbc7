//! Tendril CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "tendril")]
#[command(about = "Signal graph code intelligence for Python event buses", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Project root path (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    root: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the project, build the signal graph and cache it
    Index {
        /// Reparse every file instead of reusing unchanged ones
        #[arg(long)]
        full: bool,

        /// Ignore a fresh graph cache
        #[arg(long)]
        force: bool,
    },
    /// Ask the signal graph a question
    Query {
        #[command(subcommand)]
        query: commands::Query,
    },
    /// Print the cluster hierarchy as JSON
    Cluster {
        /// Maximum nesting depth (overrides tendril.toml)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Clusters larger than this are split (overrides tendril.toml)
        #[arg(long)]
        min_size: Option<usize>,
    },
    /// Render the cluster map and signal table to HTML
    Render {
        /// Output directory (defaults to .tendril/artifacts)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Open the rendered cluster map
        #[arg(long)]
        open: bool,
    },
    /// Rebuild the graph whenever Python sources change
    Watch,
    /// Clear the cache
    Clear,
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "tendril={log_level},tendril_core={log_level},tendril_indexer={log_level},tendril_render={log_level},tendril_watcher={log_level}"
        )))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Tendril v{}", env!("CARGO_PKG_VERSION"));
    tracing::debug!("Project root: {}", cli.root.display());

    match cli.command {
        Commands::Index { full, force } => commands::index(cli.root, full, force).await,
        Commands::Query { query } => commands::query(cli.root, query).await,
        Commands::Cluster { max_depth, min_size } => {
            commands::cluster(cli.root, max_depth, min_size).await
        }
        Commands::Render { out, open } => commands::render(cli.root, out, open).await,
        Commands::Watch => commands::watch(cli.root).await,
        Commands::Clear => commands::clear(cli.root),
        Commands::Version => {
            println!("Tendril v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
