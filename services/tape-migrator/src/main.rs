// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Tape Migrator
//!
//! Command line entry point. Subcommands:
//!
//! - `run` migrates the files of a set of tape volumes onto the active pools
//!   of the destination pool group
//! - `progress` prints migrated and precious-only volume per storage group
//! - `backfill` fills in destination file ids for ledger rows whose files
//!   have since been written to new media
//!
//! Exits 0 when a run finishes, including runs with abandoned labels, and 1
//! on configuration or setup errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgGroup, Args, Parser, Subcommand};
use comfy_table::{Table, presets::NOTHING};
use tokio::sync::watch;
use tracing::{info, warn};

use migration_types::{LabelOutcome, LabelScope};
use tape_migrator::admin::AdminChannel;
use tape_migrator::admin::ssh::{SshSettings, SshTransport};
use tape_migrator::config::MigratorConfig;
use tape_migrator::credentials::Kinit;
use tape_migrator::dispatcher::{
    Dispatcher, DispatcherContext, LabelSource, SessionFactory, WorkerSession, resolve_labels,
};
use tape_migrator::jobs::MigrateError;
use tape_migrator::ledger::Ledger;
use tape_migrator::ledger::postgres::PgLedger;
use tape_migrator::metrics;
use tape_migrator::namespace::{FsNamespace, NamespacePaths};
use tape_migrator::progress::RunSummary;

#[derive(Parser)]
#[command(name = "tape-migrator", version)]
#[command(about = "Migrate files off legacy tape volumes into precious disk pools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate the outstanding files of one or more tape volumes
    Run(RunArgs),
    /// Show migrated and precious-only volume per storage group
    Progress {
        /// Restrict the report to one storage group
        #[arg(long)]
        storage_group: Option<String>,
    },
    /// Record destination file ids discovered on the new media
    Backfill {
        /// Media type of the destination volumes
        #[arg(long, default_value = "LTO8")]
        media_type: String,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("labels").required(true).args(["label", "file", "library"])))]
struct RunArgs {
    /// Comma separated volume labels
    #[arg(long)]
    label: Option<String>,
    /// File with one volume label per line
    #[arg(long)]
    file: Option<PathBuf>,
    /// Migrate every eligible volume of this library
    #[arg(long)]
    library: Option<String>,
    /// Restrict `--library` to one media type (e.g. LTO4)
    #[arg(long, requires = "library")]
    media_type: Option<String>,
    /// Write Prometheus metrics here when the run ends
    #[arg(long)]
    metrics_file: Option<PathBuf>,
}

impl RunArgs {
    fn label_source(&self) -> LabelSource {
        if let Some(list) = &self.label {
            LabelSource::List(list.clone())
        } else if let Some(path) = &self.file {
            LabelSource::File(path.clone())
        } else {
            LabelSource::Scope(LabelScope {
                library: self.library.clone().unwrap_or_default(),
                media_type: self.media_type.clone(),
            })
        }
    }
}

/// Opens one ssh admin session and one pair of database pools per caller
struct SshSessions {
    settings: SshSettings,
    control_dir: PathBuf,
    catalog_url: String,
    namespace_url: String,
}

#[async_trait]
impl SessionFactory for SshSessions {
    async fn open(&self, pool: &str) -> Result<WorkerSession, MigrateError> {
        let transport = SshTransport::new(self.settings.clone(), &self.control_dir, pool);
        let ledger = PgLedger::connect(&self.catalog_url, &self.namespace_url).await?;
        Ok(WorkerSession {
            admin: Arc::new(AdminChannel::new(transport)),
            ledger: Arc::new(ledger),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tape_migrator=info".to_string()),
        ))
        .init();

    // Load configuration
    let config = MigratorConfig::from_env().context("Failed to load configuration")?;
    info!("Catalog database URL: {}", config.catalog_database_url_display());
    info!("Namespace database URL: {}", config.namespace_database_url_display());

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Progress { storage_group } => progress(&config, storage_group.as_deref()).await,
        Commands::Backfill { media_type } => backfill(&config, &media_type).await,
    }
}

async fn run(config: MigratorConfig, args: RunArgs) -> Result<()> {
    let namespace = Arc::new(FsNamespace::new(config.namespace_root.clone()));
    namespace
        .ensure_mounted()
        .await
        .context("Namespace filesystem check failed")?;

    metrics::register_metrics();

    let (config_tx, config_rx) = watch::channel(config.clone());

    // Start config file watcher if CONFIG_FILE is set (Unix only)
    #[cfg(unix)]
    if let Ok(config_file) = std::env::var("CONFIG_FILE") {
        let config_path = PathBuf::from(&config_file);
        if tokio::fs::try_exists(&config_path).await.unwrap_or(false) {
            tokio::spawn(MigratorConfig::start_config_watcher(
                config_path,
                config.clone(),
                config_tx,
            ));
            info!(
                config_file = %config_file,
                "Config watcher started - send SIGUSR1 to reload"
            );
        } else {
            warn!(
                config_file = %config_file,
                "CONFIG_FILE specified but file does not exist, config reloading disabled"
            );
        }
    }

    let run_id = uuid::Uuid::new_v4();
    let kinit = Kinit::for_host(&run_id).context("Failed to set up credentials")?;
    info!(run_id = %run_id, principal = kinit.principal(), "Starting run");

    let control_dir = std::env::temp_dir().join(format!("tape-migrator-{}", run_id));
    tokio::fs::create_dir_all(&control_dir)
        .await
        .with_context(|| format!("Failed to create {}", control_dir.display()))?;

    let sessions = Arc::new(SshSessions {
        settings: SshSettings {
            host: config.admin_host.clone(),
            port: config.admin_port,
            user: config.admin_user.clone(),
            credential_cache: kinit.cache().to_path_buf(),
            timeout: config.admin_timeout(),
        },
        control_dir: control_dir.clone(),
        catalog_url: config.catalog_database_url.clone(),
        namespace_url: config.namespace_database_url.clone(),
    });
    let cache = kinit.cache().to_path_buf();

    let result = async {
        let own = sessions
            .open("dispatcher")
            .await
            .context("Failed to open dispatcher session")?;
        let labels = resolve_labels(&args.label_source(), own.ledger.as_ref())
            .await
            .context("Failed to resolve labels")?;
        info!(labels = labels.len(), "Labels resolved");

        let dispatcher = Dispatcher::new(DispatcherContext {
            group: config.pool_group.clone(),
            admin: own.admin,
            ledger: own.ledger,
            namespace,
            sessions,
            renewer: Arc::new(kinit),
            config: config_rx,
        });
        dispatcher.run(labels).await.context("Migration run failed")
    }
    .await;

    cleanup(&control_dir, &cache).await;

    if let Some(path) = &args.metrics_file {
        tokio::fs::write(path, metrics::gather_metrics())
            .await
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    print_summary(&result?);
    Ok(())
}

/// Remove the ssh control sockets and the run's credential cache
async fn cleanup(control_dir: &Path, cache: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(control_dir).await {
        warn!(path = %control_dir.display(), error = %e, "Failed to remove control directory");
    }
    match tokio::fs::remove_file(cache).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %cache.display(), error = %e, "Failed to remove credential cache"),
    }
}

fn create_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_header(headers);
    table
}

fn print_summary(summary: &RunSummary) {
    let mut table = create_table(&["LABEL", "OUTCOME", "RECORDED", "VANISHED", "STRANDED"]);
    for (label, outcome) in &summary.outcomes {
        let row = match outcome {
            LabelOutcome::Completed {
                recorded,
                vanished,
                stranded,
            } => vec![
                label.clone(),
                "completed".to_string(),
                recorded.to_string(),
                vanished.to_string(),
                stranded.to_string(),
            ],
            LabelOutcome::AlreadyMigrated => vec![
                label.clone(),
                "already migrated".to_string(),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
            ],
            LabelOutcome::Abandoned(reason) => vec![
                label.clone(),
                format!("abandoned ({})", reason),
                "-".to_string(),
                "-".to_string(),
                "-".to_string(),
            ],
        };
        table.add_row(row);
    }
    println!("{table}");
    println!(
        "{} completed, {} already migrated, {} abandoned; {} files recorded in {} rounds",
        summary.labels_completed,
        summary.labels_already_migrated,
        summary.labels_abandoned,
        summary.files_recorded,
        summary.rounds
    );
}

async fn progress(config: &MigratorConfig, storage_group: Option<&str>) -> Result<()> {
    let ledger = PgLedger::connect(&config.catalog_database_url, &config.namespace_database_url)
        .await
        .context("Failed to connect to the ledger")?;
    let rows = ledger
        .progress(storage_group)
        .await
        .context("Failed to read migration progress")?;

    let mut table = create_table(&["STORAGE GROUP", "MIGRATED (TiB)", "PRECIOUS (TiB)"]);
    let (mut migrated, mut precious) = (0.0, 0.0);
    for row in &rows {
        migrated += row.migrated_tib();
        precious += row.precious_tib();
        table.add_row(vec![
            row.storage_group.clone().unwrap_or_else(|| "-".to_string()),
            format!("{:.2}", row.migrated_tib()),
            format!("{:.2}", row.precious_tib()),
        ]);
    }
    table.add_row(vec![
        "TOTAL".to_string(),
        format!("{:.2}", migrated),
        format!("{:.2}", precious),
    ]);
    println!("{table}");
    Ok(())
}

async fn backfill(config: &MigratorConfig, media_type: &str) -> Result<()> {
    let ledger = PgLedger::connect(&config.catalog_database_url, &config.namespace_database_url)
        .await
        .context("Failed to connect to the ledger")?;
    let updated = ledger
        .backfill_destinations(media_type)
        .await
        .context("Failed to backfill destination ids")?;
    info!(media_type, rows = updated.len(), "Destination ids recorded");

    let mut table = create_table(&["SRC BFID", "PNFSID", "DST BFID"]);
    for record in &updated {
        table.add_row(vec![
            record.src_bfid.clone(),
            record.pnfsid.clone(),
            record.dst_bfid.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    Ok(())
}
