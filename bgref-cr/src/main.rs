//! bgref-cr - Catalog Reconciler
//!
//! **Module Identity:**
//! - Name: bgref-cr (Catalog Reconciler)
//! - Port: 5731 (default)
//!
//! Imports an external board-game catalog's relation graph into the local
//! catalog. Runs as an HTTP service (`serve`) or one-shot from the command
//! line (`reconcile`, `analyze`).

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use bgref_common::config::{self as common_config, TomlConfig};
use bgref_common::events::{EventBus, ProgressEvent};
use bgref_common::ExternalId;
use bgref_cr::services::{ReconcileRequest, Reconciler};
use bgref_cr::types::TraversalMode;
use bgref_cr::{build_router, AppState};

const MODULE_NAME: &str = "bgref-cr";

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "bgref-cr", version, about = "Board-game catalog reconciler")]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long, env = "BGREF_CR_PORT")]
        port: Option<u16>,
    },

    /// Reconcile once, writing progress as JSON lines to stdout
    Reconcile {
        #[command(flatten)]
        run: RunArgs,

        /// Refresh entities that already exist locally
        #[arg(long)]
        resync: bool,

        /// Skip ids an earlier run already finished
        #[arg(long)]
        resume_from: Option<uuid::Uuid>,
    },

    /// Report how ids would resolve, without writing
    Analyze {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Seed external id (repeatable)
    #[arg(short, long = "seed", required = true)]
    seeds: Vec<ExternalId>,

    /// Which relations to follow
    #[arg(short, long, value_enum, default_value_t = TraversalMode::All)]
    mode: TraversalMode,

    /// Levels to traverse (0 = unbounded)
    #[arg(short, long, default_value_t = bgref_cr::services::reconciler::DEFAULT_MAX_DEPTH)]
    depth: u32,

    /// External id to leave out (repeatable)
    #[arg(short, long)]
    exclude: Vec<ExternalId>,
}

impl RunArgs {
    fn into_request(self) -> ReconcileRequest {
        ReconcileRequest {
            mode: self.mode,
            max_depth: self.depth,
            exclude: self.exclude,
            ..ReconcileRequest::new(self.seeds)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = common_config::load_config(args.config.as_deref(), MODULE_NAME)?;

    // Logs go to stderr so stdout stays clean for JSON output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting bgref Catalog Reconciler (bgref-cr) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = common_config::resolve_root_folder(args.root_folder.as_deref(), &config);
    common_config::ensure_directory_exists(&root_folder)?;
    let db_path = common_config::database_path(&config, &root_folder);
    info!("Database: {}", db_path.display());

    let db = bgref_common::db::init_database(&db_path).await?;
    let event_bus = EventBus::new(100);

    match args.command {
        Command::Serve { port } => serve(db, event_bus, &config, port.unwrap_or(config.port)).await,
        Command::Reconcile { run, resync, resume_from } => {
            let request = ReconcileRequest {
                resync,
                resume_from,
                ..run.into_request()
            };
            reconcile(db, &config, request).await
        }
        Command::Analyze { run } => analyze(db, &config, run.into_request()).await,
    }
}

async fn serve(db: sqlx::SqlitePool, event_bus: EventBus, config: &TomlConfig, port: u16) -> Result<()> {
    let state = AppState::from_config(db, event_bus, config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    info!("Listening on http://127.0.0.1:{}", port);
    info!("Health check: http://127.0.0.1:{}/health", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

async fn build_reconciler(
    db: sqlx::SqlitePool,
    config: &TomlConfig,
) -> Result<Reconciler<bgref_cr::services::CatalogClient>> {
    let token = bgref_cr::config::resolve_catalog_token(&db, config).await?;
    let client = bgref_cr::services::CatalogClient::from_config(&config.catalog, token)?;
    Ok(Reconciler::new(db, client, &config.reconcile)?)
}

async fn reconcile(db: sqlx::SqlitePool, config: &TomlConfig, request: ReconcileRequest) -> Result<()> {
    let reconciler = build_reconciler(db, config).await?;

    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(config.reconcile.progress_channel_capacity.max(1));
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Failed to serialize progress event: {}", e),
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, finishing current id");
            ctrl_c_cancel.cancel();
        }
    });

    let summary = reconciler.run(request, tx, cancel).await?;
    printer.await?;

    info!(
        "Done: {} imported, {} synced, {} skipped, {} failed",
        summary.imported, summary.synced, summary.skipped, summary.failed
    );
    Ok(())
}

async fn analyze(db: sqlx::SqlitePool, config: &TomlConfig, request: ReconcileRequest) -> Result<()> {
    let reconciler = build_reconciler(db, config).await?;
    let report = reconciler.analyze(request).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
