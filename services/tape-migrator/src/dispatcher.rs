// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Run orchestration
//!
//! The dispatcher resolves the labels of a run, marks each volume as being
//! migrated and starts one [`MigrationWorker`] per active pool of the target
//! group. Labels go through a bounded queue followed by one shutdown item per
//! worker, so every worker drains the queue and exits on its own. Workers
//! report through a progress channel to a single collector whose
//! [`RunSummary`] is the result of the run.
//!
//! The dispatcher also owns the credential renewal loop: credentials are
//! renewed once before any admin command goes out, and the loop is stopped
//! once all workers have been joined.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::{Instrument, error, info, info_span, warn};

use migration_types::{LabelScope, PoolName, VolumeLabel};

use crate::admin::PoolAdmin;
use crate::config::MigratorConfig;
use crate::credentials::{CredentialRenewer, spawn_renewal_loop};
use crate::jobs::MigrateError;
use crate::jobs::migrate::{LabelQueue, MigrationWorker, WorkItem, WorkerContext};
use crate::ledger::{Ledger, with_retry};
use crate::namespace::NamespacePaths;
use crate::progress::{PROGRESS_CHANNEL_DEPTH, RunSummary, spawn_collector};

/// Where the labels of a run come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelSource {
    /// Comma separated labels
    List(String),
    /// One label per line; blank lines and `#` comments are ignored
    File(PathBuf),
    /// Every eligible volume of a library
    Scope(LabelScope),
}

/// Split a comma separated label list
pub fn parse_label_list(list: &str) -> Vec<VolumeLabel> {
    dedupe(
        list.split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Parse the contents of a label file
pub fn parse_label_file(contents: &str) -> Vec<VolumeLabel> {
    dedupe(
        contents
            .lines()
            .map(|line| line.split('#').next().unwrap_or_default().trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

/// Drop repeated labels, keeping the first occurrence
fn dedupe(labels: Vec<VolumeLabel>) -> Vec<VolumeLabel> {
    let mut seen = HashSet::new();
    labels
        .into_iter()
        .filter(|l| seen.insert(l.clone()))
        .collect()
}

/// Turn a label source into the ordered list of labels to queue
pub async fn resolve_labels(
    source: &LabelSource,
    ledger: &dyn Ledger,
) -> Result<Vec<VolumeLabel>, MigrateError> {
    match source {
        LabelSource::List(list) => Ok(parse_label_list(list)),
        LabelSource::File(path) => {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|source| MigrateError::LabelFile {
                    path: path.clone(),
                    source,
                })?;
            Ok(parse_label_file(&contents))
        }
        LabelSource::Scope(scope) => {
            let labels = ledger.eligible_labels(scope).await?;
            info!(
                library = %scope.library,
                media_type = ?scope.media_type,
                labels = labels.len(),
                "Eligible labels found"
            );
            Ok(dedupe(labels))
        }
    }
}

/// Connections owned by one worker
pub struct WorkerSession {
    pub admin: Arc<dyn PoolAdmin>,
    pub ledger: Arc<dyn Ledger>,
}

/// Opens the private admin session and ledger connection of a worker
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, pool: &str) -> Result<WorkerSession, MigrateError>;
}

/// Everything the dispatcher needs for a run
pub struct DispatcherContext {
    /// Destination pool group
    pub group: String,
    /// Dispatcher's own admin session, used for the pool listing
    pub admin: Arc<dyn PoolAdmin>,
    /// Dispatcher's own ledger connection
    pub ledger: Arc<dyn Ledger>,
    pub namespace: Arc<dyn NamespacePaths>,
    pub sessions: Arc<dyn SessionFactory>,
    pub renewer: Arc<dyn CredentialRenewer>,
    pub config: watch::Receiver<MigratorConfig>,
}

pub struct Dispatcher {
    ctx: DispatcherContext,
}

impl Dispatcher {
    pub fn new(ctx: DispatcherContext) -> Self {
        Self { ctx }
    }

    /// Migrate `labels` and return the run totals.
    ///
    /// Abandoned labels are part of the summary, not an error. Errors are
    /// reserved for conditions that stop the whole run.
    pub async fn run(&self, labels: Vec<VolumeLabel>) -> Result<RunSummary, MigrateError> {
        let config = self.ctx.config.borrow().clone();

        self.ctx.renewer.renew().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let renewal = spawn_renewal_loop(
            Arc::clone(&self.ctx.renewer),
            config.credential_renew_period(),
            shutdown_rx,
        );

        let result = self.dispatch(labels, &config).await;

        // Intentionally ignore send error - the loop may already be gone
        let _ = shutdown_tx.send(true);
        renewal.abort();
        let _ = renewal.await;

        result
    }

    async fn dispatch(
        &self,
        labels: Vec<VolumeLabel>,
        config: &MigratorConfig,
    ) -> Result<RunSummary, MigrateError> {
        self.ctx.namespace.ensure_mounted().await?;

        let pools = self.active_pools(config).await?;
        info!(group = %self.ctx.group, pools = ?pools, "Active pools");

        let labels = self.mark_migrating(labels, config).await;
        if labels.is_empty() {
            info!("No labels to migrate");
            return Ok(RunSummary::default());
        }

        // Open every session before starting anything
        let mut sessions = Vec::with_capacity(pools.len());
        for pool in &pools {
            sessions.push((pool.clone(), self.ctx.sessions.open(pool).await?));
        }

        let (events_tx, events_rx) = mpsc::channel(PROGRESS_CHANNEL_DEPTH);
        let collector = spawn_collector(events_rx);

        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth.max(1));
        let queue: LabelQueue = Arc::new(Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(sessions.len());
        for (pool, session) in sessions {
            let worker = MigrationWorker::new(WorkerContext {
                pool: pool.clone(),
                group: self.ctx.group.clone(),
                active_pools: pools.clone(),
                admin: session.admin,
                ledger: session.ledger,
                namespace: Arc::clone(&self.ctx.namespace),
                config: self.ctx.config.clone(),
                events: events_tx.clone(),
            });
            let span = info_span!("worker", pool = %pool);
            let handle = tokio::spawn(worker.run(Arc::clone(&queue)).instrument(span));
            workers.push((pool, handle));
        }
        // Workers hold the only references from here on, so a send fails
        // once every worker has exited
        drop(queue);
        drop(events_tx);

        info!(labels = labels.len(), workers = workers.len(), "Dispatching labels");
        for label in labels {
            if queue_tx.send(WorkItem::Label(label)).await.is_err() {
                error!("All workers exited, remaining labels not dispatched");
                break;
            }
        }
        for _ in &workers {
            if queue_tx.send(WorkItem::Shutdown).await.is_err() {
                break;
            }
        }
        drop(queue_tx);

        let mut fatal: Option<MigrateError> = None;
        for (pool, handle) in workers {
            match handle.await {
                Ok(Ok(handled)) => {
                    info!(pool = %pool, labels = handled, "Worker finished");
                }
                Ok(Err(e)) => {
                    error!(pool = %pool, error = %e, "Worker failed");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!(pool = %pool, error = %e, "Worker panicked");
                    fatal.get_or_insert(MigrateError::Internal(format!(
                        "worker for {} panicked: {}",
                        pool, e
                    )));
                }
            }
        }

        let summary = collector
            .await
            .map_err(|e| MigrateError::Internal(format!("progress collector failed: {}", e)))?;
        info!(
            completed = summary.labels_completed,
            already_migrated = summary.labels_already_migrated,
            abandoned = summary.labels_abandoned,
            recorded = summary.files_recorded,
            vanished = summary.files_vanished,
            stranded = summary.files_stranded,
            "Run finished"
        );

        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Active members of the group; an empty group is fatal
    async fn active_pools(&self, config: &MigratorConfig) -> Result<Vec<PoolName>, MigrateError> {
        let mut attempt = 1;
        let pools = loop {
            match self.ctx.admin.active_pools(&self.ctx.group).await {
                Ok(pools) => break pools,
                Err(e) if attempt < config.pool_query_attempts => {
                    warn!(group = %self.ctx.group, attempt, error = %e, "Pool group query failed");
                    attempt += 1;
                    tokio::time::sleep(config.pool_query_backoff()).await;
                }
                Err(e) => return Err(e.into()),
            }
        };

        if pools.is_empty() {
            return Err(MigrateError::NoActivePools(self.ctx.group.clone()));
        }
        Ok(pools)
    }

    /// Flag each volume as being migrated, dropping the ones that fail
    async fn mark_migrating(
        &self,
        labels: Vec<VolumeLabel>,
        config: &MigratorConfig,
    ) -> Vec<VolumeLabel> {
        let mut marked = Vec::with_capacity(labels.len());
        for label in labels {
            match with_retry(
                "mark_volume_migrating",
                config.ledger_retry_attempts,
                config.ledger_retry_backoff(),
                || self.ctx.ledger.mark_volume_migrating(&label),
            )
            .await
            {
                Ok(()) => marked.push(label),
                Err(e) => {
                    error!(label = %label, error = %e, "Failed to mark volume migrating, skipping");
                }
            }
        }
        marked
    }
}
