// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! PostgreSQL ledger using tokio-postgres
//!
//! Two pools: the source catalog (volumes, files and the `file_migrate`
//! ledger table) and the namespace metadata store. Every mutation runs in
//! an explicit transaction; a transaction dropped on an error path is
//! rolled back by the driver.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime};
use tokio_postgres::error::SqlState;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use migration_types::{
    LabelScope, MigrationRecord, ProgressRow, RecordOutcome, RetireOutcome, SourceFile,
    VOLUME_MIGRATING, VolumeAccess, VolumeLabel,
};

use super::{Ledger, LedgerError};

const UNMIGRATED_FILES_SQL: &str = r#"
    SELECT f.bfid, f.pnfs_id, f.crc, f.size, f.location_cookie, v.label
    FROM file f
    INNER JOIN volume v ON v.id = f.volume
    LEFT OUTER JOIN file_migrate fm ON f.bfid = fm.src_bfid
    WHERE v.label = $1
      AND f.deleted = 'n'
      AND f.package_id IS NULL
      AND fm.src_bfid IS NULL
    ORDER BY f.location_cookie ASC
"#;

const ELIGIBLE_LABELS_SQL: &str = r#"
    SELECT v.label
    FROM volume v
    WHERE v.library = $1
      AND ($2::text IS NULL OR v.media_type = $2::text)
      AND v.system_inhibit_0 NOT IN ('NOACCESS', 'NOTALLOWED')
      AND EXISTS (
          SELECT 1
          FROM file f
          LEFT OUTER JOIN file_migrate fm ON f.bfid = fm.src_bfid
          WHERE f.volume = v.id
            AND f.deleted = 'n'
            AND f.package_id IS NULL
            AND fm.src_bfid IS NULL
      )
    ORDER BY v.label
"#;

const BACKFILL_SQL: &str = r#"
    UPDATE file_migrate
    SET dst_bfid = t.bfid
    FROM (
        SELECT fm.src_bfid AS src_bfid, f.bfid AS bfid
        FROM file_migrate fm
        INNER JOIN file f ON fm.pnfsid = f.pnfs_id
        INNER JOIN volume v ON f.volume = v.id
        WHERE f.deleted = 'n'
          AND v.media_type = $1
          AND fm.dst_bfid IS NULL
    ) AS t
    WHERE t.src_bfid = file_migrate.src_bfid
      AND file_migrate.dst_bfid IS NULL
    RETURNING file_migrate.src_bfid, file_migrate.pnfsid, file_migrate.dst_bfid
"#;

const PROGRESS_SQL: &str = r#"
    SELECT v.storage_group,
           COALESCE(SUM(CASE WHEN fm.dst_bfid IS NOT NULL THEN f.size ELSE 0 END), 0)::bigint
               AS migrated,
           COALESCE(SUM(CASE WHEN fm.dst_bfid IS NOT NULL THEN 0 ELSE f.size END), 0)::bigint
               AS precious
    FROM file f
    INNER JOIN volume v ON v.id = f.volume
    INNER JOIN file_migrate fm ON f.bfid = fm.src_bfid
    WHERE ($1::text IS NULL OR v.storage_group = $1::text)
    GROUP BY v.storage_group
    ORDER BY v.storage_group
"#;

const LAYERS_PRESENT_SQL: &str = r#"
    SELECT EXISTS (SELECT 1 FROM t_level_4 WHERE inumber = $1)
        OR EXISTS (SELECT 1 FROM t_locationinfo WHERE inumber = $1 AND itype = 0)
"#;

/// Layer tables removed when a file is retired, with their row filter
const RETIRE_STATEMENTS: &[&str] = &[
    "DELETE FROM t_level_1 WHERE inumber = $1",
    "DELETE FROM t_level_4 WHERE inumber = $1",
    "DELETE FROM t_storageinfo WHERE inumber = $1",
    "DELETE FROM t_locationinfo WHERE inumber = $1 AND itype = 0",
];

/// Build a connection pool from a connection URL.
///
/// `max_size` caps the connections; each worker owns its own ledger so the
/// pools stay small.
fn build_pool(database_url: &str, max_size: usize) -> Result<Pool, LedgerError> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e| LedgerError::Connection(format!("Invalid database URL: {}", e)))?;

    // Build deadpool config from tokio-postgres config
    let mut cfg = Config::new();
    if let Some(host) = pg_config.get_hosts().first() {
        match host {
            tokio_postgres::config::Host::Tcp(host) => {
                cfg.host = Some(host.clone());
            }
            tokio_postgres::config::Host::Unix(path) => {
                cfg.host = Some(path.to_string_lossy().to_string());
            }
        }
    }
    if let Some(port) = pg_config.get_ports().first() {
        cfg.port = Some(*port);
    }
    if let Some(user) = pg_config.get_user() {
        cfg.user = Some(user.to_string());
    }
    if let Some(password) = pg_config.get_password() {
        cfg.password = Some(String::from_utf8_lossy(password).to_string());
    }
    if let Some(dbname) = pg_config.get_dbname() {
        cfg.dbname = Some(dbname.to_string());
    }
    cfg.pool = Some(PoolConfig::new(max_size));

    cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| LedgerError::Connection(format!("Failed to create pool: {}", e)))
}

fn source_file_from_row(row: &Row) -> SourceFile {
    SourceFile {
        bfid: row.get("bfid"),
        pnfsid: row.get("pnfs_id"),
        crc: row.get("crc"),
        size: row.get("size"),
        location_cookie: row.get("location_cookie"),
        label: row.get("label"),
    }
}

/// Resolves a namespace id to the inode number keying the layer tables
const INUMBER_SQL: &str = "SELECT pnfsid2inumber($1)";

fn inumber_from_row(row: &Row, pnfsid: &str) -> Result<i64, LedgerError> {
    row.get::<_, Option<i64>>(0)
        .ok_or_else(|| LedgerError::NotFound(format!("namespace entry {}", pnfsid)))
}

/// Ledger backed by the source catalog and namespace databases
pub struct PgLedger {
    catalog: Pool,
    namespace: Pool,
}

impl PgLedger {
    /// Connect to both databases, checking each with a trivial query
    pub async fn connect(catalog_url: &str, namespace_url: &str) -> Result<Self, LedgerError> {
        let catalog = build_pool(catalog_url, 1)?;
        let namespace = build_pool(namespace_url, 1)?;

        for pool in [&catalog, &namespace] {
            let client = pool.get().await?;
            client.query_one("SELECT 1", &[]).await?;
        }

        debug!("Ledger connections established");
        Ok(Self { catalog, namespace })
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn unmigrated_files(&self, label: &str) -> Result<Vec<SourceFile>, LedgerError> {
        let client = self.catalog.get().await?;
        let rows = client.query(UNMIGRATED_FILES_SQL, &[&label]).await?;
        Ok(rows.iter().map(source_file_from_row).collect())
    }

    async fn is_recorded(&self, bfid: &str) -> Result<bool, LedgerError> {
        let client = self.catalog.get().await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM file_migrate WHERE src_bfid = $1)",
                &[&bfid],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn record_migration(
        &self,
        file: &SourceFile,
        dst_bfid: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError> {
        let mut client = self.catalog.get().await?;
        let tx = client.transaction().await?;

        let inserted = tx
            .execute(
                "INSERT INTO file_migrate (src_bfid, dst_bfid, pnfsid) VALUES ($1, $2, $3)",
                &[&file.bfid, &dst_bfid, &file.pnfsid],
            )
            .await;
        if let Err(e) = inserted {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                tx.rollback().await?;
                debug!(bfid = %file.bfid, "Ledger row already present");
                return Ok(RecordOutcome::AlreadyRecorded);
            }
            return Err(e.into());
        }

        tx.execute(
            "UPDATE file SET deleted = 'y' WHERE bfid = $1",
            &[&file.bfid],
        )
        .await?;
        tx.commit().await?;

        Ok(RecordOutcome::Recorded)
    }

    async fn mark_source_deleted(&self, bfid: &str) -> Result<(), LedgerError> {
        let mut client = self.catalog.get().await?;
        let tx = client.transaction().await?;
        let updated = tx
            .execute("UPDATE file SET deleted = 'y' WHERE bfid = $1", &[&bfid])
            .await?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!("file {}", bfid)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn namespace_layers_present(&self, pnfsid: &str) -> Result<bool, LedgerError> {
        let client = self.namespace.get().await?;
        let row = client.query_one(INUMBER_SQL, &[&pnfsid]).await?;
        let inumber = inumber_from_row(&row, pnfsid)?;
        let row = client.query_one(LAYERS_PRESENT_SQL, &[&inumber]).await?;
        Ok(row.get(0))
    }

    async fn retire_namespace_layers(&self, pnfsid: &str) -> Result<RetireOutcome, LedgerError> {
        let mut client = self.namespace.get().await?;
        let tx = client.transaction().await?;

        let row = tx.query_one(INUMBER_SQL, &[&pnfsid]).await?;
        let inumber = inumber_from_row(&row, pnfsid)?;
        let present: bool = tx.query_one(LAYERS_PRESENT_SQL, &[&inumber]).await?.get(0);
        if !present {
            tx.rollback().await?;
            return Ok(RetireOutcome::AlreadyRetired);
        }

        for statement in RETIRE_STATEMENTS {
            tx.execute(*statement, &[&inumber]).await?;
        }
        tx.commit().await?;

        Ok(RetireOutcome::Retired)
    }

    async fn volume_access(&self, label: &str) -> Result<VolumeAccess, LedgerError> {
        let client = self.catalog.get().await?;
        let row = client
            .query_opt(
                "SELECT system_inhibit_0 FROM volume WHERE label = $1",
                &[&label],
            )
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("volume {}", label)))?;
        let inhibit: Option<String> = row.get(0);
        Ok(VolumeAccess::from_inhibit(inhibit.as_deref().unwrap_or("")))
    }

    async fn mark_volume_migrating(&self, label: &str) -> Result<(), LedgerError> {
        let mut client = self.catalog.get().await?;
        let tx = client.transaction().await?;
        let updated = tx
            .execute(
                "UPDATE volume SET system_inhibit_1 = $2 WHERE label = $1",
                &[&label, &VOLUME_MIGRATING],
            )
            .await?;
        if updated == 0 {
            return Err(LedgerError::NotFound(format!("volume {}", label)));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn eligible_labels(&self, scope: &LabelScope) -> Result<Vec<VolumeLabel>, LedgerError> {
        let client = self.catalog.get().await?;
        let media_type = scope.media_type.as_deref();
        let rows = client
            .query(ELIGIBLE_LABELS_SQL, &[&scope.library, &media_type])
            .await?;
        Ok(rows.iter().map(|r| r.get(0)).collect())
    }

    async fn backfill_destinations(
        &self,
        media_type: &str,
    ) -> Result<Vec<MigrationRecord>, LedgerError> {
        let mut client = self.catalog.get().await?;
        let tx = client.transaction().await?;
        let rows = tx.query(BACKFILL_SQL, &[&media_type]).await?;
        tx.commit().await?;

        info!(media_type, updated = rows.len(), "Backfilled destination ids");
        Ok(rows
            .iter()
            .map(|r| MigrationRecord {
                src_bfid: r.get(0),
                pnfsid: r.get(1),
                dst_bfid: r.get(2),
            })
            .collect())
    }

    async fn progress(&self, storage_group: Option<&str>) -> Result<Vec<ProgressRow>, LedgerError> {
        let client = self.catalog.get().await?;
        let rows = client.query(PROGRESS_SQL, &[&storage_group]).await?;
        Ok(rows
            .iter()
            .map(|r| ProgressRow {
                storage_group: r.get("storage_group"),
                migrated_bytes: r.get("migrated"),
                precious_bytes: r.get("precious"),
            })
            .collect())
    }
}
