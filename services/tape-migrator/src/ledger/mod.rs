// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Ledger store
//!
//! Transactional access to the source catalog (which also holds the
//! `file_migrate` ledger table) and to the namespace metadata store. The
//! ledger primary key on the source file id is what makes a run idempotent:
//! a file with a ledger row is never returned as outstanding again, and a
//! second insert for the same id is reported as
//! [`RecordOutcome::AlreadyRecorded`].

pub mod postgres;

#[cfg(test)]
pub mod mock;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_postgres::error::SqlState;

use migration_types::{
    LabelScope, MigrationRecord, ProgressRow, RecordOutcome, RetireOutcome, SourceFile,
    VolumeAccess, VolumeLabel,
};

/// Ledger errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl LedgerError {
    /// Only connectivity failures are worth retrying. Integrity and query
    /// errors will fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Connection(_))
    }
}

impl From<tokio_postgres::Error> for LedgerError {
    fn from(e: tokio_postgres::Error) -> Self {
        if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
            LedgerError::DuplicateKey(e.to_string())
        } else if e.is_closed() || e.code().is_none() {
            // No SQLSTATE means the server never answered
            LedgerError::Connection(e.to_string())
        } else {
            LedgerError::Query(e.to_string())
        }
    }
}

impl From<deadpool_postgres::PoolError> for LedgerError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        LedgerError::Connection(e.to_string())
    }
}

/// Migration ledger and metadata catalogs
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Undeleted files of `label` with no ledger row, in on-tape order
    async fn unmigrated_files(&self, label: &str) -> Result<Vec<SourceFile>, LedgerError>;

    async fn is_recorded(&self, bfid: &str) -> Result<bool, LedgerError>;

    /// Insert the ledger row and flip the source `deleted` flag atomically
    async fn record_migration(
        &self,
        file: &SourceFile,
        dst_bfid: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError>;

    /// Flip the source `deleted` flag without a ledger row
    async fn mark_source_deleted(&self, bfid: &str) -> Result<(), LedgerError>;

    /// Whether the legacy tape location layers of a file still exist
    async fn namespace_layers_present(&self, pnfsid: &str) -> Result<bool, LedgerError>;

    /// Delete the legacy layers of a file if any are left
    async fn retire_namespace_layers(&self, pnfsid: &str) -> Result<RetireOutcome, LedgerError>;

    async fn volume_access(&self, label: &str) -> Result<VolumeAccess, LedgerError>;

    async fn mark_volume_migrating(&self, label: &str) -> Result<(), LedgerError>;

    /// Labels in `scope` that still have outstanding files
    async fn eligible_labels(&self, scope: &LabelScope) -> Result<Vec<VolumeLabel>, LedgerError>;

    /// Fill in destination ids of ledger rows whose file now lives on
    /// `media_type`; returns the rows updated
    async fn backfill_destinations(
        &self,
        media_type: &str,
    ) -> Result<Vec<MigrationRecord>, LedgerError>;

    async fn progress(&self, storage_group: Option<&str>) -> Result<Vec<ProgressRow>, LedgerError>;
}

/// Retry `op` while it fails with a transient error.
///
/// Makes at most `attempts` calls, sleeping `backoff` between them.
/// Non-transient errors are returned immediately.
pub async fn with_retry<T, F, Fut>(
    what: &str,
    attempts: u32,
    backoff: Duration,
    mut op: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    operation = what,
                    attempt,
                    error = %e,
                    "Transient ledger failure, retrying"
                );
                crate::metrics::record_ledger_retry();
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
