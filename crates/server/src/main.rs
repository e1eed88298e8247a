//! Stowage operator binary.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::sync::Arc;
use std::time::Duration;
use stowage_core::config::AppConfig;
use stowage_core::{StorageId, User};
use stowage_metadata::UserRepo;
use stowage_server::{AppState, StartedTask};
use stowage_storage::S3ClientFactory;
use stowage_tasks::ProgressStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stowage - permission-gated bulk operations on S3-compatible storage
#[derive(Parser, Debug)]
#[command(name = "stowaged")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "STOWAGE_CONFIG",
        default_value = "config/stowage.toml"
    )]
    config: String,

    #[command(subcommand)]
    command: Command,
}

/// Who runs the operation and where.
#[derive(ClapArgs, Debug)]
struct Target {
    /// Username the operation runs as
    #[arg(long)]
    user: String,
    /// Storage configuration id
    #[arg(long)]
    storage_id: i64,
    /// Bucket name
    #[arg(long)]
    bucket: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Delete every object in a bucket, then the bucket
    DeleteBucket {
        #[command(flatten)]
        target: Target,
    },
    /// Delete every object under a folder prefix
    DeletePrefix {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        prefix: String,
    },
    /// Delete explicit keys; keys ending in '/' are folders
    BulkDelete {
        #[command(flatten)]
        target: Target,
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Total size of a bucket or folder
    CalculateSize {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// List buckets with a storage configuration's credentials
    TestConnection {
        #[arg(long)]
        user: String,
        #[arg(long)]
        storage_id: i64,
    },
    /// Show the connection cache contents
    CacheStats,
}

fn load_config(path: &str) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if std::path::Path::new(path).exists() {
        tracing::info!(config_path = %path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", path);
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("STOWAGE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.apply_region_defaults();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid configuration")?;
    Ok(config)
}

async fn find_user(state: &AppState, username: &str) -> Result<User> {
    state
        .metadata
        .get_user_by_name(username)
        .await
        .context("failed to look up user")?
        .with_context(|| format!("unknown user '{username}'"))
}

/// Follow a started task until it finishes, cancelling it on Ctrl-C.
async fn follow(state: &AppState, user: &User, started: StartedTask) -> Result<()> {
    let task_id = started.response.task_id.clone();
    println!("{}", serde_json::to_string_pretty(&started.response)?);

    let wait = started.handle.wait();
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut cancel_requested = false;

    let outcome = loop {
        tokio::select! {
            outcome = &mut wait => break outcome,
            _ = ticker.tick() => {
                if let Ok(record) = state.service.progress(user, &task_id).await {
                    tracing::info!(
                        task_id = %task_id,
                        status = %record.status,
                        progress = record.progress,
                        step = record.current_step.as_deref().unwrap_or(""),
                        "Progress"
                    );
                }
            }
            signal = tokio::signal::ctrl_c(), if !cancel_requested => {
                signal.context("failed to listen for Ctrl-C")?;
                cancel_requested = true;
                let response = state.service.cancel(user, &task_id).await?;
                tracing::warn!(task_id = %task_id, status = %response.status, "Cancellation requested");
            }
        }
    };

    match &outcome {
        Ok(outcome) => {
            tracing::info!(task_id = %task_id, outcome = outcome.label(), value = %outcome.value(), "Task ended");
        }
        Err(e) => tracing::error!(task_id = %task_id, kind = e.kind(), error = %e, "Task failed"),
    }

    match state.tracker.get(&task_id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("{{\"task_id\": \"{task_id}\", \"status\": \"expired\"}}"),
    }
    Ok(())
}

async fn run(state: &AppState, command: Command) -> Result<()> {
    let service = &state.service;
    match command {
        Command::DeleteBucket { target } => {
            let user = find_user(state, &target.user).await?;
            let started = service
                .start_delete_bucket(&user, StorageId(target.storage_id), &target.bucket)
                .await?;
            follow(state, &user, started).await
        }
        Command::DeletePrefix { target, prefix } => {
            let user = find_user(state, &target.user).await?;
            let started = service
                .start_delete_prefix(&user, StorageId(target.storage_id), &target.bucket, &prefix)
                .await?;
            follow(state, &user, started).await
        }
        Command::BulkDelete { target, keys } => {
            let user = find_user(state, &target.user).await?;
            let started = service
                .start_bulk_delete(&user, StorageId(target.storage_id), &target.bucket, keys)
                .await?;
            follow(state, &user, started).await
        }
        Command::CalculateSize { target, prefix } => {
            let user = find_user(state, &target.user).await?;
            let started = service
                .start_calculate_size(
                    &user,
                    StorageId(target.storage_id),
                    &target.bucket,
                    prefix.as_deref(),
                )
                .await?;
            follow(state, &user, started).await
        }
        Command::TestConnection { user, storage_id } => {
            let user = find_user(state, &user).await?;
            let report = service
                .test_connection(&user, StorageId(storage_id))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::CacheStats => {
            let stats = service.cache_stats().await;
            println!(
                "{}",
                serde_json::json!({
                    "cached_clients": stats.cached_clients,
                    "cache_keys": stats.cache_keys,
                })
            );
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stowage=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Stowage v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    stowage_server::metrics::register_metrics();
    tracing::debug!("Prometheus metrics registered");

    let metadata =
        stowage_metadata::from_seed(&config.seed).context("failed to load metadata seed")?;
    tracing::info!(
        storages = config.seed.storages.len(),
        users = config.seed.users.len(),
        "Metadata seed loaded"
    );

    let progress = stowage_tasks::store_from_config(&config.progress)
        .context("failed to initialize progress store")?;
    progress
        .health_check()
        .await
        .context("progress store health check failed")?;
    tracing::info!(backend = progress.backend_name(), "Progress store initialized");

    let state = AppState::new(config, metadata, progress, Arc::new(S3ClientFactory))
        .context("failed to build application state")?;

    let result = run(&state, args.command).await;
    state.shutdown().await;

    if let Ok(metrics) = stowage_server::metrics::gather_metrics() {
        tracing::debug!(metrics = %metrics, "Final metrics");
    }
    result
}
