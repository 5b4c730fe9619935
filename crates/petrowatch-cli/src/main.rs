mod ingest;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "petrowatch")]
#[command(about = "Fuel-price ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion: fetch the catalog, detect price changes, persist, notify
    Ingest {
        /// Detect changes without writing prices or stations
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = petrowatch_core::load_app_config_from_env()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::debug!(?config, "configuration loaded");

    let pool_config = petrowatch_db::PoolConfig::from_app_config(&config);
    let pool = petrowatch_db::connect_pool(&config.database_url, pool_config).await?;
    petrowatch_db::ping(&pool)
        .await
        .context("database did not answer the startup ping")?;
    tracing::debug!("database reachable");

    match cli.command {
        Commands::Migrate => {
            let applied = petrowatch_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Ingest { dry_run } => ingest::run_ingest(&pool, &config, dry_run).await?,
    }

    Ok(())
}
