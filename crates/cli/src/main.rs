use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dualstore_core::{BackendName, PersistenceConfig};
use dualstore_service::Persistence;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "dualstore")]
#[command(about = "Resilient persistence with failover between a document store and an embedded store", long_about = None)]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Primary,
    Fallback,
}

impl From<Backend> for BackendName {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Primary => Self::Primary,
            Backend::Fallback => Self::Fallback,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve until Ctrl-C, logging state changes and failovers.
    Run,
    /// Print the status report as JSON.
    Status,
    /// Apply pending migrations (both backends when none is given).
    Migrate {
        #[arg(short, long, value_enum)]
        backend: Option<Backend>,
    },
    /// Unblock migrations after a failed attempt.
    ClearMigration {
        #[arg(short, long, value_enum)]
        backend: Backend,
    },
    /// Take one backup of the active backend now.
    Backup,
    /// Re-create every record of a collection on the other backend.
    Copy {
        #[arg(long, value_enum)]
        from: Backend,
        #[arg(long, value_enum)]
        to: Backend,
        #[arg(short = 'C', long)]
        collection: String,
    },
}

/// Build and initialize the persistence layer from `--config` and the environment.
pub(crate) async fn open(config: Option<&std::path::Path>) -> Result<Persistence> {
    let config = PersistenceConfig::load(config)?;
    let persistence = Persistence::new(config)?;
    let report = persistence.initialize().await?;
    tracing::debug!(?report, "initialized");
    Ok(persistence)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let persistence = open(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Run => commands::run::run(&persistence).await,
        Commands::Status => commands::status::run(&persistence),
        Commands::Migrate { backend } => {
            commands::migrate::run(&persistence, backend.map(BackendName::from)).await
        },
        Commands::ClearMigration { backend } => {
            commands::migrate::clear(&persistence, backend.into()).await
        },
        Commands::Backup => commands::backup::run(&persistence).await,
        Commands::Copy { from, to, collection } => {
            commands::copy::run(&persistence, from.into(), to.into(), &collection).await
        },
    };

    persistence.shutdown().await;
    result
}
