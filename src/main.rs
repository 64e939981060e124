use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing_subscriber::{fmt, EnvFilter};

mod api;
mod assigner;
mod config;
mod db;
mod error;
mod hub;
mod machine;
mod memory;
mod models;
mod rules;
mod service;
mod socket;
mod store;

use crate::assigner::WebhookAssigner;
use crate::config::Config;
use crate::hub::NotificationHub;
use crate::memory::MemoryStore;
use crate::service::InterventionService;
use crate::store::Store;

#[derive(Parser)]
#[command(name = "intervention-gate")]
#[command(about = "Daily check-in gate that locks students into mentor-assigned remediation", long_about = None)]
struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP and WebSocket service
    Serve {
        /// Use the in-process store seeded with demo students instead of Postgres
        #[arg(long)]
        memory: bool,
    },
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students
    Seed,
    /// Import students from a CSV file (student_id,name,email)
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

async fn connect(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(config.database_url()?)
        .await
        .context("failed to connect to Postgres")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { memory: true } => {
            let store = MemoryStore::with_students(db::DEMO_STUDENTS);
            serve(&config, store).await?;
        }
        Commands::Serve { memory: false } => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            serve(&config, db::PgStore::new(pool)).await?;
        }
        Commands::InitDb => {
            let pool = connect(&config).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(&config).await?;
            db::seed(&pool).await?;
            println!("Seed students inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect(&config).await?;
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
    }

    Ok(())
}

async fn serve<S: Store>(config: &Config, store: S) -> anyhow::Result<()> {
    let assigner = WebhookAssigner::new(config.assigner_webhook_url.clone())?;
    if !assigner.is_enabled() {
        tracing::warn!("ASSIGNER_WEBHOOK_URL not set, locked students wait for a manual assignment");
    }

    let service = InterventionService::new(
        store,
        Arc::new(NotificationHub::new()),
        Arc::new(assigner),
        config.callback_url(),
    );
    let app = api::router(Arc::new(service));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, callback_url = %config.callback_url(), "intervention gate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
