// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Shared types for the tape volume migrator.
//!
//! These describe the records the migrator reads from the source catalog,
//! the durable ledger rows it writes, and the per-file stages a worker
//! drives each file through.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

// ============================================================================
// Type Aliases
// ============================================================================

/// Source-system file identifier (bit file id)
pub type Bfid = String;

/// Namespace identifier of a file
pub type PnfsId = String;

/// Tape volume label
pub type VolumeLabel = String;

/// Disk pool name
pub type PoolName = String;

/// Secondary inhibit value written to a volume while it is being migrated.
pub const VOLUME_MIGRATING: &str = "migrating";

// ============================================================================
// Source catalog
// ============================================================================

/// A file on a legacy tape volume that still has to be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Source-system file id; primary key of the ledger
    pub bfid: Bfid,
    /// Namespace id of the file
    pub pnfsid: PnfsId,
    /// Adler32 checksum recorded by the source system, if any
    pub crc: Option<i64>,
    /// File size in bytes
    pub size: i64,
    /// Position of the file on tape; files are staged in ascending order
    pub location_cookie: String,
    /// Label of the volume holding the file
    pub label: VolumeLabel,
}

/// Primary inhibit flag of a volume.
///
/// `NOACCESS` and `NOTALLOWED` mean the tape cannot be read and any work on
/// the label has to stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeAccess {
    /// No inhibit set
    Normal,
    /// Volume marked inaccessible
    NoAccess,
    /// Volume administratively blocked
    NotAllowed,
    /// Any other inhibit value (e.g. `DELETED`), kept verbatim
    Other(String),
}

impl VolumeAccess {
    /// Interpret the raw `system_inhibit_0` column value.
    pub fn from_inhibit(value: &str) -> Self {
        match value.trim() {
            "" | "none" => VolumeAccess::Normal,
            "NOACCESS" => VolumeAccess::NoAccess,
            "NOTALLOWED" => VolumeAccess::NotAllowed,
            other => VolumeAccess::Other(other.to_string()),
        }
    }

    /// Whether files on the volume may still be restored.
    pub fn is_accessible(&self) -> bool {
        !matches!(self, VolumeAccess::NoAccess | VolumeAccess::NotAllowed)
    }
}

impl fmt::Display for VolumeAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeAccess::Normal => write!(f, "none"),
            VolumeAccess::NoAccess => write!(f, "NOACCESS"),
            VolumeAccess::NotAllowed => write!(f, "NOTALLOWED"),
            VolumeAccess::Other(s) => write!(f, "{}", s),
        }
    }
}

/// Selects the volumes eligible for migration when no explicit label list
/// is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelScope {
    /// Tape library name
    pub library: String,
    /// Optional media type filter (e.g. "LTO4")
    pub media_type: Option<String>,
}

// ============================================================================
// Ledger
// ============================================================================

/// Durable completion record, one per source file id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Source file id (primary key)
    pub src_bfid: Bfid,
    /// Namespace id of the migrated file
    pub pnfsid: PnfsId,
    /// Destination file id, filled in once the file lands on new media
    pub dst_bfid: Option<Bfid>,
}

/// Result of inserting a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOutcome {
    /// Row inserted and source file marked deleted
    Recorded,
    /// A row for this file id already existed; nothing changed
    AlreadyRecorded,
}

/// Result of retiring the legacy namespace layers of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetireOutcome {
    /// Layers were present and have been deleted
    Retired,
    /// No layers were left; an earlier attempt already removed them
    AlreadyRetired,
}

/// Per storage group migration totals, in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRow {
    /// Storage group of the source volumes, `None` when unset
    pub storage_group: Option<String>,
    /// Bytes whose destination copy is known
    pub migrated_bytes: i64,
    /// Bytes pinned on disk but not yet written to new media
    pub precious_bytes: i64,
}

impl ProgressRow {
    /// Migrated volume in TiB
    pub fn migrated_tib(&self) -> f64 {
        bytes_to_tib(self.migrated_bytes)
    }

    /// Precious-only volume in TiB
    pub fn precious_tib(&self) -> f64 {
        bytes_to_tib(self.precious_bytes)
    }
}

fn bytes_to_tib(bytes: i64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0 / 1024.0
}

// ============================================================================
// Worker state machine
// ============================================================================

/// Stage of a single file inside a worker.
///
/// `Pending -> Staging -> Resident -> Pinned -> Retired -> Recorded`.
/// `Recorded` is the durability point: a file that reached it is excluded
/// from every later run.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStage {
    /// Returned by the ledger, nothing done yet
    #[default]
    Pending,
    /// Restore requested, waiting for the file to land on a pool
    Staging,
    /// A copy is on an active pool of the target group
    Resident,
    /// The resident copy is marked precious
    Pinned,
    /// Legacy namespace layers removed
    Retired,
    /// Ledger row written; terminal
    Recorded,
}

/// Why a worker gave up on a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbandonReason {
    /// Volume inhibit or remote reply says the tape cannot be read
    VolumeInaccessible(String),
    /// Active pool set could not be refreshed
    PoolQueryFailed(String),
    /// Occupancy of the worker's pool could not be read
    BackpressureUnavailable(String),
    /// Source catalog could not be read
    CatalogUnavailable(String),
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::VolumeInaccessible(s) => write!(f, "volume inaccessible: {}", s),
            AbandonReason::PoolQueryFailed(s) => write!(f, "pool query failed: {}", s),
            AbandonReason::BackpressureUnavailable(s) => {
                write!(f, "occupancy unavailable: {}", s)
            }
            AbandonReason::CatalogUnavailable(s) => write!(f, "catalog unavailable: {}", s),
        }
    }
}

/// Final result of one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LabelOutcome {
    /// Every outstanding file was recorded or dropped
    Completed {
        /// Files recorded in the ledger
        recorded: usize,
        /// Files whose namespace entry had vanished
        vanished: usize,
        /// Files left for manual recovery
        stranded: usize,
    },
    /// Nothing left to migrate
    AlreadyMigrated,
    /// Work on the label stopped early
    Abandoned(AbandonReason),
}
