//! phosphor-snapshot entry point.
//!
//! Serves the admin snapshot endpoints and runs the backup, restore,
//! migration and logical export/import commands.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use axum::http::StatusCode;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use phosphor_snapshot::api;
use phosphor_snapshot::app_state::AppState;
use phosphor_snapshot::bridge::DumpBridge;
use phosphor_snapshot::config::{DEFAULT_SNAPSHOT_FILE, SnapshotConfig};
use phosphor_snapshot::error::SnapshotError;
use phosphor_snapshot::migrate::{
    AssumeYes, Confirm, CutoverSteps, DialoguerConfirm, EnvTarget, LineConfirm,
    MigrationOutcome, MigrationSteps, Orchestrator,
};
use phosphor_snapshot::persistence::Database;
use phosphor_snapshot::persistence::schema::init_schema;
use phosphor_snapshot::snapshot::{ReplayEngine, ReplayMode, SnapshotGenerator};

#[derive(Debug, Parser)]
#[command(name = "phosphor-snapshot")]
#[command(about = "Database snapshots, replay and guided migration for Phosphor Vibe Post")]
#[command(version)]
struct Cli {
    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP server
    Serve,

    /// Dump DATABASE_URL with pg_dump
    Backup {
        /// Dump file [default: SNAPSHOT_BACKUP_FILE or backups/database-backup.sql]
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Restore a pg_dump file into DATABASE_URL with psql and verify it
    Restore {
        /// Dump file [default: SNAPSHOT_BACKUP_FILE or backups/database-backup.sql]
        #[arg(long)]
        input: Option<PathBuf>,
    },

    /// Back up, repoint DATABASE_URL, restore and verify
    Migrate {
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },

    /// Write a logical snapshot of users and posts
    Export {
        /// Snapshot file
        #[arg(long, default_value = DEFAULT_SNAPSHOT_FILE)]
        output: PathBuf,
    },

    /// Replay a logical snapshot into DATABASE_URL
    Import {
        /// Snapshot file
        #[arg(long, default_value = DEFAULT_SNAPSHOT_FILE)]
        input: PathBuf,

        /// Run the whole replay in one transaction
        #[arg(long)]
        transactional: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.log_format);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn setup_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("received Ctrl-C, cancelling");
            token.cancel();
        }
    });
    cancel
}

async fn run(command: Command) -> Result<(), SnapshotError> {
    let config = SnapshotConfig::from_env()?;
    let cancel = cancel_on_ctrl_c();

    match command {
        Command::Serve => serve(config, cancel).await,
        Command::Backup { output } => {
            let output = output.unwrap_or_else(|| config.backup_file.clone());
            let bridge = DumpBridge::new(config.bridge_options());
            let artifact = bridge
                .dump(config.database_url.as_deref(), &output, &cancel)
                .await?;
            println!("Backup completed: {}", artifact.path.display());
            println!("Backup size: {:.2} KB", artifact.kilobytes());
            println!("Next step: update DATABASE_URL and run: phosphor-snapshot restore");
            Ok(())
        }
        Command::Restore { input } => {
            let input = input.unwrap_or_else(|| config.backup_file.clone());
            restore(&config, &input, &cancel).await
        }
        Command::Migrate { yes } => {
            if yes {
                migrate(&config, AssumeYes, &cancel).await
            } else if std::io::stdin().is_terminal() {
                migrate(&config, DialoguerConfirm, &cancel).await
            } else {
                let piped = LineConfirm::new(std::io::stdin().lock(), std::io::stdout());
                migrate(&config, piped, &cancel).await
            }
        }
        Command::Export { output } => export(&config, &output, &cancel).await,
        Command::Import {
            input,
            transactional,
        } => import(&config, &input, transactional, &cancel).await,
    }
}

async fn serve(config: SnapshotConfig, shutdown: CancellationToken) -> Result<(), SnapshotError> {
    let url = config.require_database_url()?;
    let db = Database::open(&config.database_settings(url)).await?;
    if config.init_schema {
        init_schema(&db).await?;
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_BACKUP_TOKEN is not set; admin endpoints will reject every request");
    }

    let listen_addr = config.listen_addr;
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    tracing::info!(addr = %listen_addr, "starting phosphor-snapshot");

    let app_state = AppState::new(db.clone(), config, shutdown.clone());
    let app = api::build_router()
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    db.close().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn restore(
    config: &SnapshotConfig,
    input: &Path,
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let steps = cutover_steps(config);
    let url = config.database_url.as_deref();
    steps.restore(url, input, cancel).await?;

    let counts = steps.verify(config.require_database_url()?, cancel).await?;
    println!("Verification results:");
    println!("   Users: {}", counts.users);
    println!("   Posts: {}", counts.posts);
    if counts.is_empty() {
        println!("No data found - this might be expected for a new database");
    }
    Ok(())
}

async fn migrate<C: Confirm>(
    config: &SnapshotConfig,
    confirm: C,
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let mut orchestrator = Orchestrator::new(
        confirm,
        EnvTarget,
        cutover_steps(config),
        config.backup_file.clone(),
    );

    match orchestrator.run(cancel).await? {
        MigrationOutcome::Completed(report) => {
            println!("Database migration completed successfully!");
            println!("   Users: {}", report.counts.users);
            println!("   Posts: {}", report.counts.posts);
            println!("Next steps:");
            println!("   1. Test your application thoroughly");
            println!("   2. Update production environment variables if deployed");
            println!("   3. Delete the old database instance once confirmed working");
            println!("   4. Clean up backup files when no longer needed");
        }
        MigrationOutcome::Paused { backup } => {
            println!("Migration paused. Backup kept at {}.", backup.path.display());
            println!("Update .env and run this command again.");
        }
    }
    Ok(())
}

async fn export(
    config: &SnapshotConfig,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let url = config.require_database_url()?;
    let db = Database::open(&config.database_settings(url)).await?;
    let generated = SnapshotGenerator::new(config.query_timeout())
        .generate(&db, cancel)
        .await;
    db.close().await;
    let snapshot = generated?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let stats = snapshot.stats();
    tokio::fs::write(output, snapshot.into_sql()).await?;

    println!("Snapshot written: {}", output.display());
    println!("   Users: {}", stats.users);
    println!("   Posts: {}", stats.posts);
    println!("   Bytes: {}", stats.bytes);
    Ok(())
}

async fn import(
    config: &SnapshotConfig,
    input: &Path,
    transactional: bool,
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let text = match tokio::fs::read_to_string(input).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SnapshotError::MissingArtifact(input.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut options = config.replay_options();
    if transactional {
        options.mode = ReplayMode::Transactional;
    }

    let url = config.require_database_url()?;
    let db = Database::open(&config.database_settings(url)).await?;
    let replayed = ReplayEngine::new(options).replay_sql(&db, &text, cancel).await;
    db.close().await;
    let report = replayed?;

    println!("Snapshot replayed: {}", input.display());
    println!("   Users restored: {}", report.users_restored);
    println!("   Posts restored: {}", report.posts_restored);
    println!("   Statements processed: {}", report.statements_processed);
    println!("   Statements failed: {}", report.statements_failed);
    for failure in &report.failures {
        println!("   #{}: {} ({})", failure.index, failure.preview, failure.message);
    }
    Ok(())
}

fn cutover_steps(config: &SnapshotConfig) -> CutoverSteps {
    CutoverSteps::new(
        DumpBridge::new(config.bridge_options()),
        Duration::from_secs(config.database_connect_timeout_secs),
        config.query_timeout(),
    )
}
