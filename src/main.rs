//! host-sync daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   CRUD layer / `sync` ──▶ Engine::apply / remove / sync_all
//!                              │
//!                              ▼
//!                    ┌──────────────────┐
//!                    │  render (pure)   │  one task per caller
//!                    └────────┬─────────┘
//!                             ▼
//!                    ┌──────────────────┐
//!                    │  store.stage     │  last write wins per key
//!                    └────────┬─────────┘
//!                             ▼
//!                    ┌──────────────────┐
//!                    │ reload scheduler │  single worker, debounced batches
//!                    │  validate tree   │
//!                    │  isolate / commit│
//!                    │  reload once     │
//!                    └────────┬─────────┘
//!                             ▼
//!                     CommitOutcome per key ──▶ status file, admin API
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use host_sync::admin::{self, AdminState};
use host_sync::config::watcher::ConfigWatcher;
use host_sync::config::{load_config, EngineConfig};
use host_sync::host::FileCertificateResolver;
use host_sync::host::CertificateResolver;
use host_sync::lifecycle::signals::{self, SignalEvent};
use host_sync::observability::{logging, metrics};
use host_sync::render::Renderer;
use host_sync::validate::CheckReport;
use host_sync::{Engine, HostRecord, Shutdown};

#[derive(Parser)]
#[command(name = "host-sync")]
#[command(about = "Renders, validates and reloads nginx host configuration", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "host-sync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine with the admin API and config hot reload
    Serve {
        /// JSON array of host records to synchronize at startup
        #[arg(long)]
        hosts: Option<PathBuf>,
    },
    /// Validate the active tree and exit
    Check,
    /// Print the rendered config of one host record (JSON file)
    Render {
        host: PathBuf,
    },
    /// Synchronize the tree with a JSON array of host records and exit
    Sync {
        hosts: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    logging::init_tracing(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?cli.config,
        root = ?config.store.root,
        "host-sync starting"
    );

    match cli.command {
        Commands::Serve { hosts } => serve(&cli.config, config, hosts).await,
        Commands::Check => check(&config).await,
        Commands::Render { host } => render(&config, &host),
        Commands::Sync { hosts } => sync(&config, &hosts).await,
    }
}

async fn serve(
    config_path: &Path,
    config: EngineConfig,
    hosts: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?);
    }

    let shutdown = Shutdown::new();
    let engine = Arc::new(Engine::from_config(&config, Some(shutdown.subscribe()))?);

    if let Some(path) = hosts {
        let records = read_hosts(&path)?;
        let failed = engine
            .sync_all(&records)
            .await
            .into_iter()
            .filter(|(_, result)| !matches!(result, Ok(outcome) if outcome.is_active()))
            .count();
        tracing::info!(hosts = records.len(), failed, "Startup synchronization complete");
    }

    let (watcher, mut config_updates) = ConfigWatcher::new(config_path, config.scheduler.clone());
    let _watcher = watcher.run()?;

    let (signal_tx, mut signal_events) = mpsc::unbounded_channel();
    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = signals::listen(&shutdown, signal_tx).await {
                tracing::error!(error = %e, "Signal handling failed");
                shutdown.trigger();
            }
        }
    });

    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            engine: engine.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        Some(tokio::spawn(admin::serve(listener, state, shutdown.clone())))
    } else {
        None
    };

    loop {
        tokio::select! {
            Some(settings) = config_updates.recv() => {
                engine.update_scheduler(settings);
            }
            Some(SignalEvent::Flush) = signal_events.recv() => {
                if let Err(e) = engine.flush().await {
                    tracing::error!(error = %e, "Flush failed");
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    engine.join().await;
    if let Some(task) = admin_task {
        if let Ok(Err(e)) = task.await {
            tracing::error!(error = %e, "Admin API failed");
        }
    }
    signal_task.abort();

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn check(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::from_config(config, None)?;
    match engine.check_active().await? {
        CheckReport::Passed => {
            println!("configuration ok ({} hosts)", engine.active_tree().len());
            Ok(())
        }
        CheckReport::Failed { diagnostic } => {
            eprintln!("{}", diagnostic);
            std::process::exit(1);
        }
    }
}

fn render(config: &EngineConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let host: HostRecord = serde_json::from_str(&fs::read_to_string(path)?)?;
    let certificates = FileCertificateResolver::new(
        &config.certificates.letsencrypt_dir,
        &config.certificates.custom_dir,
    );
    let certificate = host.certificate_id.and_then(|id| certificates.resolve(id));
    let rendered = Renderer::new()?.render(&host, certificate.as_ref())?;
    print!("{}", rendered.content);
    Ok(())
}

async fn sync(config: &EngineConfig, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Engine::from_config(config, None)?;
    let records = read_hosts(path)?;

    let mut failed = false;
    let mut report = Vec::new();
    for (key, result) in engine.sync_all(&records).await {
        let entry = match result {
            Ok(outcome) => {
                failed |= !outcome.is_active();
                serde_json::to_value(&outcome)?
            }
            Err(e) => {
                failed = true;
                serde_json::json!({ "key": key.to_string(), "error": e.to_string() })
            }
        };
        report.push(entry);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

fn read_hosts(path: &Path) -> Result<Vec<HostRecord>, Box<dyn std::error::Error>> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}
