// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Per-pool migration worker
//!
//! A worker takes labels off the shared queue one at a time. For a label it
//! loads the outstanding files in on-tape order and makes rounds over them,
//! driving each file through
//!
//! ```text
//! PENDING -> STAGING -> RESIDENT -> PINNED -> RETIRED -> RECORDED
//! ```
//!
//! A file that is not yet cache resident gets a restore request on the
//! worker's pool and goes to the tail of the list for the next round. A
//! resident file is pinned on the pool holding it, its legacy namespace
//! layers are retired and the ledger row is written. The ledger row is the
//! durability point: once written, no later run sees the file again.
//!
//! Retirement is check-before-delete, so a file retired by a run that died
//! before recording skips straight to recording. If such a file also lost
//! its cached copy it cannot be staged again and is reported as stranded.
//!
//! A worker only takes a label off the queue once its pool is under the
//! precious threshold. Between rounds it re-reads the volume inhibit flag,
//! refreshes the active pool set, waits out backpressure again and sleeps.
//! Files within a worker are handled strictly one after another.

pub mod types;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tracing::{debug, error, info, warn};

use migration_types::{
    AbandonReason, FileStage, LabelOutcome, PoolName, RecordOutcome, RetireOutcome, SourceFile,
};

use super::MigrateError;
use crate::admin::{AdminError, PoolAdmin};
use crate::backpressure::{Throttle, wait_until_below_threshold};
use crate::config::MigratorConfig;
use crate::ledger::{Ledger, with_retry};
use crate::namespace::{NamespaceError, NamespacePaths};
use crate::progress::ProgressEvent;

pub use types::{FileDone, FileTask, Visit, WorkItem};

/// Shared receiving end of the label queue
pub type LabelQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Everything a worker owns
pub struct WorkerContext {
    /// Pool restores are issued to and whose occupancy gates new labels
    pub pool: PoolName,
    /// Pool group whose active members count as valid destinations
    pub group: String,
    /// Active members of `group` when the worker was started
    pub active_pools: Vec<PoolName>,
    pub admin: Arc<dyn PoolAdmin>,
    pub ledger: Arc<dyn Ledger>,
    pub namespace: Arc<dyn NamespacePaths>,
    pub config: watch::Receiver<MigratorConfig>,
    pub events: mpsc::Sender<ProgressEvent>,
}

/// Per-label counters
#[derive(Debug, Default)]
struct LabelTally {
    recorded: usize,
    vanished: usize,
    stranded: usize,
    /// Visits that found the file cache resident
    staged: usize,
}

impl LabelTally {
    fn count(&mut self, done: FileDone) {
        match done {
            FileDone::Recorded => self.recorded += 1,
            FileDone::Vanished => self.vanished += 1,
            FileDone::Stranded => self.stranded += 1,
        }
    }

    fn completed(&self) -> LabelOutcome {
        LabelOutcome::Completed {
            recorded: self.recorded,
            vanished: self.vanished,
            stranded: self.stranded,
        }
    }
}

/// The migration state machine for one destination pool
pub struct MigrationWorker {
    ctx: WorkerContext,
}

impl MigrationWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    fn config(&self) -> MigratorConfig {
        self.ctx.config.borrow().clone()
    }

    /// Consume labels until a shutdown item arrives or the queue closes.
    ///
    /// The worker's pool must be under the precious threshold before each
    /// label is taken. If its occupancy cannot be read the worker stops and
    /// leaves the remaining labels to the other workers.
    ///
    /// Returns the number of labels handled. Only run-fatal conditions
    /// (namespace not mounted) end the worker with an error.
    pub async fn run(mut self, queue: LabelQueue) -> Result<usize, MigrateError> {
        let mut handled = 0;
        loop {
            // Labels stay on the queue for other workers while this pool is full
            if let Err(e) = self.throttle(&self.config()).await {
                error!(
                    pool = %self.ctx.pool,
                    error = %e,
                    "Pool occupancy unreadable, worker stopping"
                );
                break;
            }

            let item = queue.lock().await.recv().await;
            let label = match item {
                Some(WorkItem::Label(label)) => label,
                Some(WorkItem::Shutdown) | None => break,
            };

            let outcome = self.migrate_label(&label).await?;
            match &outcome {
                LabelOutcome::Abandoned(reason) => {
                    error!(pool = %self.ctx.pool, label = %label, reason = %reason, "Label abandoned");
                }
                LabelOutcome::AlreadyMigrated => {
                    info!(pool = %self.ctx.pool, label = %label, "All files migrated for label");
                }
                LabelOutcome::Completed { recorded, vanished, stranded } => {
                    info!(
                        pool = %self.ctx.pool,
                        label = %label,
                        recorded,
                        vanished,
                        stranded,
                        "Label done"
                    );
                }
            }
            self.emit(ProgressEvent::LabelFinished {
                pool: self.ctx.pool.clone(),
                label,
                outcome,
            })
            .await;
            handled += 1;
        }

        info!(pool = %self.ctx.pool, labels = handled, "Worker exiting");
        Ok(handled)
    }

    /// Drive every outstanding file of `label` to a final state
    pub async fn migrate_label(&mut self, label: &str) -> Result<LabelOutcome, MigrateError> {
        let config = self.config();

        let files = match with_retry(
            "unmigrated_files",
            config.ledger_retry_attempts,
            config.ledger_retry_backoff(),
            || self.ctx.ledger.unmigrated_files(label),
        )
        .await
        {
            Ok(files) => files,
            Err(e) => {
                error!(label, error = %e, "Failed to retrieve files for label");
                return Ok(LabelOutcome::Abandoned(AbandonReason::CatalogUnavailable(
                    e.to_string(),
                )));
            }
        };
        if files.is_empty() {
            return Ok(LabelOutcome::AlreadyMigrated);
        }

        let mut tally = LabelTally::default();
        let mut pending = self.prepare(label, files, &mut tally).await?;
        let total = pending.len() + tally.vanished;
        info!(pool = %self.ctx.pool, label, files = total, "Doing label");

        let mut pass = 0u32;
        while !pending.is_empty() {
            let mut next = VecDeque::with_capacity(pending.len());
            while let Some(mut task) = pending.pop_front() {
                match self.visit(label, &mut task, &mut tally).await {
                    Visit::Done(done) => tally.count(done),
                    Visit::Requeue => next.push_back(task),
                    Visit::Abort(reason) => return Ok(LabelOutcome::Abandoned(reason)),
                }
            }
            pending = next;
            if pending.is_empty() {
                break;
            }

            pass += 1;
            info!(
                pool = %self.ctx.pool,
                label,
                staged = tally.staged,
                total,
                remaining = pending.len(),
                pass,
                "Round finished"
            );
            self.emit(ProgressEvent::RoundFinished {
                pool: self.ctx.pool.clone(),
                label: label.to_string(),
                pass,
                remaining: pending.len(),
            })
            .await;

            if let Some(reason) = self.between_rounds(label).await {
                return Ok(LabelOutcome::Abandoned(reason));
            }
        }

        Ok(tally.completed())
    }

    /// Order the files, drop vanished ones and note already retired ones
    async fn prepare(
        &self,
        label: &str,
        mut files: Vec<SourceFile>,
        tally: &mut LabelTally,
    ) -> Result<VecDeque<FileTask>, MigrateError> {
        let config = self.config();
        files.sort_by(|a, b| a.location_cookie.cmp(&b.location_cookie));

        let mut tasks = VecDeque::with_capacity(files.len());
        for file in files {
            match self.ctx.namespace.path_of(&file.pnfsid).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    error!(
                        label,
                        bfid = %file.bfid,
                        pnfsid = %file.pnfsid,
                        "Does not exist, mark deleted"
                    );
                    if let Err(e) = with_retry(
                        "mark_source_deleted",
                        config.ledger_retry_attempts,
                        config.ledger_retry_backoff(),
                        || self.ctx.ledger.mark_source_deleted(&file.bfid),
                    )
                    .await
                    {
                        error!(label, bfid = %file.bfid, error = %e, "Failed to set file deleted");
                    }
                    tally.count(FileDone::Vanished);
                    self.emit(ProgressEvent::Vanished {
                        pool: self.ctx.pool.clone(),
                        label: label.to_string(),
                        bfid: file.bfid.clone(),
                    })
                    .await;
                    continue;
                }
                Err(e @ NamespaceError::NotMounted(_)) => return Err(e.into()),
                Err(e) => {
                    warn!(label, bfid = %file.bfid, pnfsid = %file.pnfsid, error = %e,
                        "Failed to resolve namespace path, keeping file");
                }
            }

            let mut task = FileTask::new(file);
            match with_retry(
                "namespace_layers_present",
                config.ledger_retry_attempts,
                config.ledger_retry_backoff(),
                || self.ctx.ledger.namespace_layers_present(&task.file.pnfsid),
            )
            .await
            {
                Ok(present) => task.layers_retired = !present,
                Err(e) => {
                    warn!(label, bfid = %task.file.bfid, error = %e,
                        "Failed to check namespace layers, assuming present");
                }
            }
            if task.layers_retired {
                warn!(
                    label,
                    bfid = %task.file.bfid,
                    pnfsid = %task.file.pnfsid,
                    "Namespace layers already retired by an earlier run"
                );
            }
            tasks.push_back(task);
        }
        Ok(tasks)
    }

    /// One visit to one file
    async fn visit(
        &self,
        label: &str,
        task: &mut FileTask,
        tally: &mut LabelTally,
    ) -> Visit {
        match task.stage {
            FileStage::Retired => return self.record(label, task, true).await,
            FileStage::Pinned => return self.retire_and_record(label, task).await,
            _ => {}
        }

        let locations = match self.ctx.admin.cache_locations(&task.file.pnfsid).await {
            Ok(locations) => locations,
            Err(e) => {
                self.log_step_failure(label, task, "residency", &e);
                return Visit::Requeue;
            }
        };
        let resident_on = locations
            .into_iter()
            .find(|p| self.ctx.active_pools.contains(p));

        let Some(pool) = resident_on else {
            if task.layers_retired {
                error!(
                    pool = %self.ctx.pool,
                    label,
                    bfid = %task.file.bfid,
                    pnfsid = %task.file.pnfsid,
                    "Layers retired but no cached copy, needs manual recovery"
                );
                self.emit(ProgressEvent::Stranded {
                    pool: self.ctx.pool.clone(),
                    label: label.to_string(),
                    bfid: task.file.bfid.clone(),
                })
                .await;
                return Visit::Done(FileDone::Stranded);
            }
            return self.stage(label, task).await;
        };

        tally.staged += 1;
        self.transition(label, task, FileStage::Resident).await;

        if let Err(e) = self.ctx.admin.pin(&pool, &task.file.pnfsid).await {
            self.log_step_failure(label, task, "pin", &e);
            // A stale replica is dropped so the next restore starts clean
            if let Err(e) = self.ctx.admin.evict(&pool, &task.file.pnfsid).await {
                self.log_step_failure(label, task, "evict", &e);
            }
            self.transition(label, task, FileStage::Staging).await;
            return Visit::Requeue;
        }
        debug!(label, bfid = %task.file.bfid, pool = %pool, "Marked precious");
        self.transition(label, task, FileStage::Pinned).await;

        self.retire_and_record(label, task).await
    }

    /// Request a restore on the worker's own pool
    async fn stage(&self, label: &str, task: &mut FileTask) -> Visit {
        match self
            .ctx
            .admin
            .request_restore(&self.ctx.pool, &task.file.pnfsid)
            .await
        {
            Ok(()) => {
                self.transition(label, task, FileStage::Staging).await;
                Visit::Requeue
            }
            Err(e) if e.is_volume_inaccessible() => {
                self.log_step_failure(label, task, "restore", &e);
                Visit::Abort(AbandonReason::VolumeInaccessible(e.to_string()))
            }
            Err(e) => {
                self.log_step_failure(label, task, "restore", &e);
                Visit::Requeue
            }
        }
    }

    async fn retire_and_record(&self, label: &str, task: &mut FileTask) -> Visit {
        let config = self.config();
        let retired = with_retry(
            "retire_namespace_layers",
            config.ledger_retry_attempts,
            config.ledger_retry_backoff(),
            || self.ctx.ledger.retire_namespace_layers(&task.file.pnfsid),
        )
        .await;

        match retired {
            Ok(RetireOutcome::Retired) => {}
            Ok(RetireOutcome::AlreadyRetired) => {
                debug!(label, bfid = %task.file.bfid, "Layers already retired");
            }
            Err(e) => {
                self.log_step_failure(label, task, "retire", &e);
                return Visit::Requeue;
            }
        }
        self.transition(label, task, FileStage::Retired).await;

        self.record(label, task, false).await
    }

    /// Write the ledger row. Never goes back to retirement.
    ///
    /// `retry` is set when an earlier attempt for this file failed; that
    /// attempt may have committed before its reply was lost.
    async fn record(&self, label: &str, task: &mut FileTask, retry: bool) -> Visit {
        let config = self.config();

        if retry {
            match self.ctx.ledger.is_recorded(&task.file.bfid).await {
                Ok(true) => {
                    self.transition(label, task, FileStage::Recorded).await;
                    return Visit::Done(FileDone::Recorded);
                }
                Ok(false) => {}
                Err(e) => {
                    self.log_step_failure(label, task, "record", &e);
                    return Visit::Requeue;
                }
            }
        }

        let recorded = with_retry(
            "record_migration",
            config.ledger_retry_attempts,
            config.ledger_retry_backoff(),
            || self.ctx.ledger.record_migration(&task.file, None),
        )
        .await;

        match recorded {
            Ok(outcome) => {
                if outcome == RecordOutcome::AlreadyRecorded {
                    debug!(label, bfid = %task.file.bfid, "Ledger row already present");
                }
                self.transition(label, task, FileStage::Recorded).await;
                Visit::Done(FileDone::Recorded)
            }
            Err(e) => {
                self.log_step_failure(label, task, "record", &e);
                Visit::Requeue
            }
        }
    }

    /// Inhibit check, pool refresh, backpressure and round sleep.
    ///
    /// Returns the reason when the label has to be abandoned.
    async fn between_rounds(&mut self, label: &str) -> Option<AbandonReason> {
        let config = self.config();

        match with_retry(
            "volume_access",
            config.ledger_retry_attempts,
            config.ledger_retry_backoff(),
            || self.ctx.ledger.volume_access(label),
        )
        .await
        {
            Ok(access) if !access.is_accessible() => {
                return Some(AbandonReason::VolumeInaccessible(access.to_string()));
            }
            Ok(_) => {}
            Err(e) => {
                warn!(label, error = %e, "Failed to read volume inhibit, continuing");
            }
        }

        if let Err(e) = self.refresh_active_pools(&config).await {
            return Some(AbandonReason::PoolQueryFailed(e.to_string()));
        }

        if let Err(e) = self.throttle(&config).await {
            return Some(AbandonReason::BackpressureUnavailable(e.to_string()));
        }

        debug!(pool = %self.ctx.pool, label, "Sleeping");
        tokio::time::sleep(config.round_sleep()).await;
        None
    }

    /// Wait for the worker's own pool to drop under the precious threshold
    async fn throttle(&self, config: &MigratorConfig) -> Result<u32, AdminError> {
        let throttle = Throttle {
            threshold: config.precious_threshold,
            poll_interval: config.backpressure_poll(),
            max_failures: config.pool_query_attempts,
        };
        wait_until_below_threshold(&*self.ctx.admin, &self.ctx.pool, throttle).await
    }

    /// Re-read the active members of the group, trying up to
    /// `pool_query_attempts` times
    async fn refresh_active_pools(&mut self, config: &MigratorConfig) -> Result<(), AdminError> {
        let mut attempt = 1;
        loop {
            match self.ctx.admin.active_pools(&self.ctx.group).await {
                Ok(pools) => {
                    if pools != self.ctx.active_pools {
                        info!(
                            pool = %self.ctx.pool,
                            group = %self.ctx.group,
                            active = ?pools,
                            "Active pool set changed"
                        );
                    }
                    self.ctx.active_pools = pools;
                    return Ok(());
                }
                Err(e) if attempt < config.pool_query_attempts => {
                    warn!(group = %self.ctx.group, attempt, error = %e, "Pool group query failed");
                    attempt += 1;
                    tokio::time::sleep(config.pool_query_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn transition(&self, label: &str, task: &mut FileTask, to: FileStage) {
        let from = task.advance(to);
        debug!(
            pool = %self.ctx.pool,
            label,
            bfid = %task.file.bfid,
            from = %from,
            to = %to,
            "Stage transition"
        );
        self.emit(ProgressEvent::Transition {
            pool: self.ctx.pool.clone(),
            label: label.to_string(),
            bfid: task.file.bfid.clone(),
            from,
            to,
        })
        .await;
    }

    fn log_step_failure(
        &self,
        label: &str,
        task: &FileTask,
        step: &str,
        error: &dyn std::error::Error,
    ) {
        error!(
            pool = %self.ctx.pool,
            label,
            bfid = %task.file.bfid,
            pnfsid = %task.file.pnfsid,
            stage = %task.stage,
            step,
            error = %error,
            "File step failed"
        );
    }

    async fn emit(&self, event: ProgressEvent) {
        // Collector gone means the run is shutting down
        let _ = self.ctx.events.send(event).await;
    }
}
