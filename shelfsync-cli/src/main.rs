//! Shelfsync CLI - Command-line driver for library synchronization

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::Workspace;
use shelfsync_core::Direction;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shelfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Library directory (index and local book content)
    #[arg(long, global = true, env = "SHELFSYNC_LIBRARY", default_value = "./shelfsync_library")]
    library: PathBuf,

    /// Remote store directory
    #[arg(long, global = true, env = "SHELFSYNC_REMOTE", default_value = "./shelfsync_remote")]
    remote: PathBuf,

    /// Session token; transfers require one
    #[arg(long, global = true, env = "SHELFSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Engine configuration file (TOML)
    #[arg(long, global = true, env = "SHELFSYNC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import ebook files into the library
    Import {
        /// Files to import
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List the books in the library
    List {
        /// Group books by series
        #[arg(long)]
        grouped: bool,

        /// Only show books whose title, author or series matches
        #[arg(short, long)]
        search: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload books to the remote store
    Upload {
        /// Book hashes (or unique prefixes)
        hashes: Vec<String>,

        /// Upload every book in the library
        #[arg(long, conflicts_with = "hashes")]
        all: bool,

        /// Upload again even if already uploaded
        #[arg(long)]
        force: bool,
    },

    /// Download books from the remote store
    Download {
        /// Book hashes (or unique prefixes)
        hashes: Vec<String>,

        /// Download every book in the library
        #[arg(long, conflicts_with = "hashes")]
        all: bool,

        /// Download again even if the local copy is current
        #[arg(long)]
        force: bool,
    },

    /// Remove books from the library
    Remove {
        /// Book hashes (or unique prefixes)
        #[arg(required = true)]
        hashes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "shelfsync_cli=debug,shelfsync_core=debug"
    } else {
        "shelfsync_cli=info,shelfsync_core=warn"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let workspace = Workspace::open(
        &cli.library,
        &cli.remote,
        cli.token.as_deref(),
        cli.config.as_deref(),
    )
    .await?;

    let result = match cli.command {
        Commands::Import { files } => commands::import(&workspace, &files).await,

        Commands::List {
            grouped,
            search,
            json,
        } => commands::list(&workspace, grouped, search.as_deref(), json),

        Commands::Upload { hashes, all, force } => {
            commands::transfer(&workspace, Direction::Upload, &hashes, all, force).await
        }

        Commands::Download { hashes, all, force } => {
            commands::transfer(&workspace, Direction::Download, &hashes, all, force).await
        }

        Commands::Remove { hashes } => commands::remove(&workspace, &hashes).await,
    };

    workspace.close().await?;
    result
}
