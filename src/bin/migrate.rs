use anyhow::Result;
use clap::{Parser, Subcommand};
use rx_ledger::{db, init_tracing, load_config};
use tracing::info;

#[derive(Parser)]
#[command(name = "rx-ledger-migrate", about = "Manage the rx-ledger database schema", version)]
struct Cli {
    /// Overrides the configured database URL
    #[arg(long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply every pending migration
    Up,
    /// Roll back every migration
    Down,
    /// Verify the database is reachable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config()?;
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }
    init_tracing(&cfg.log_level, cfg.log_json);

    let mut db_cfg = db::DbConfig::from(&cfg);
    db_cfg.max_connections = db_cfg.max_connections.min(2);
    db_cfg.min_connections = 1;
    let pool = db::establish_connection_with_config(&db_cfg).await?;

    match cli.command {
        Command::Up => {
            db::run_migrations(&pool).await?;
            info!("Schema is up to date");
        }
        Command::Down => {
            db::revert_migrations(&pool).await?;
            info!("Schema rolled back");
        }
        Command::Check => {
            db::check_connection(&pool).await?;
            info!("Database reachable");
        }
    }

    Ok(())
}
