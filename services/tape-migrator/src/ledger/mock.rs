// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Mock ledger for testing without PostgreSQL.
//!
//! Keeps the source catalog, the ledger table and the namespace layers in
//! memory with the same observable semantics as [`super::postgres::PgLedger`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use migration_types::{
    Bfid, LabelScope, MigrationRecord, PnfsId, ProgressRow, RecordOutcome, RetireOutcome,
    SourceFile, VolumeAccess, VolumeLabel,
};

use super::{Ledger, LedgerError};

struct CatalogFile {
    file: SourceFile,
    deleted: bool,
}

struct MockVolume {
    library: String,
    media_type: String,
    storage_group: String,
    access: VolumeAccess,
    migrating: bool,
}

#[derive(Default)]
struct State {
    files: Vec<CatalogFile>,
    volumes: HashMap<VolumeLabel, MockVolume>,
    /// Kept as a list so a double insert would be visible
    ledger: Vec<MigrationRecord>,
    layers: HashSet<PnfsId>,
    retire_calls: HashMap<PnfsId, usize>,
    record_failures: usize,
    retire_failures: usize,
    volume_access_failures: usize,
    /// Rows another writer inserts just before this one's first attempt
    preempted: HashSet<Bfid>,
}

/// In-memory ledger
#[derive(Default)]
pub struct MockLedger {
    state: Mutex<State>,
}

impl MockLedger {
    /// Create a new empty mock ledger
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_volume(&self, label: &str, library: &str, media_type: &str, storage_group: &str) {
        self.state.lock().unwrap().volumes.insert(
            label.to_string(),
            MockVolume {
                library: library.to_string(),
                media_type: media_type.to_string(),
                storage_group: storage_group.to_string(),
                access: VolumeAccess::Normal,
                migrating: false,
            },
        );
    }

    /// Add an undeleted file with its namespace layers in place
    pub fn add_file(&self, file: SourceFile) {
        let mut state = self.state.lock().unwrap();
        if !state.volumes.contains_key(&file.label) {
            state.volumes.insert(
                file.label.clone(),
                MockVolume {
                    library: "TestLib".to_string(),
                    media_type: "LTO4".to_string(),
                    storage_group: "test".to_string(),
                    access: VolumeAccess::Normal,
                    migrating: false,
                },
            );
        }
        state.layers.insert(file.pnfsid.clone());
        state.files.push(CatalogFile {
            file,
            deleted: false,
        });
    }

    pub fn set_volume_access(&self, label: &str, access: VolumeAccess) {
        if let Some(volume) = self.state.lock().unwrap().volumes.get_mut(label) {
            volume.access = access;
        }
    }

    /// Make the next `n` record attempts fail with a connection error
    pub fn fail_records(&self, n: usize) {
        self.state.lock().unwrap().record_failures = n;
    }

    /// Make the next `n` retirement attempts fail with a connection error
    pub fn fail_retirements(&self, n: usize) {
        self.state.lock().unwrap().retire_failures = n;
    }

    /// Make the next `n` inhibit reads fail with a connection error
    pub fn fail_volume_access(&self, n: usize) {
        self.state.lock().unwrap().volume_access_failures = n;
    }

    /// Simulate layers removed by an earlier, interrupted run
    pub fn remove_layers(&self, pnfsid: &str) {
        self.state.lock().unwrap().layers.remove(pnfsid);
    }

    /// Have a concurrent writer insert the row for `bfid` just ahead of
    /// the next `record_migration` for it
    pub fn record_elsewhere(&self, bfid: &str) {
        self.state.lock().unwrap().preempted.insert(bfid.to_string());
    }

    /// Insert a ledger row directly (for test setup)
    pub fn insert_record(&self, src_bfid: &str, pnfsid: &str) {
        let mut state = self.state.lock().unwrap();
        state.ledger.push(MigrationRecord {
            src_bfid: src_bfid.to_string(),
            pnfsid: pnfsid.to_string(),
            dst_bfid: None,
        });
        for f in state.files.iter_mut().filter(|f| f.file.bfid == src_bfid) {
            f.deleted = true;
        }
    }

    pub fn records(&self) -> Vec<MigrationRecord> {
        self.state.lock().unwrap().ledger.clone()
    }

    pub fn record_count(&self, bfid: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .ledger
            .iter()
            .filter(|r| r.src_bfid == bfid)
            .count()
    }

    pub fn is_deleted(&self, bfid: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .files
            .iter()
            .any(|f| f.file.bfid == bfid && f.deleted)
    }

    pub fn has_layers(&self, pnfsid: &str) -> bool {
        self.state.lock().unwrap().layers.contains(pnfsid)
    }

    /// Number of retirement calls that actually deleted layers
    pub fn retire_calls(&self, pnfsid: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .retire_calls
            .get(pnfsid)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_migrating(&self, label: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .volumes
            .get(label)
            .is_some_and(|v| v.migrating)
    }
}

fn outstanding(state: &State, label: &str) -> Vec<SourceFile> {
    let recorded: HashSet<&Bfid> = state.ledger.iter().map(|r| &r.src_bfid).collect();
    let mut files: Vec<SourceFile> = state
        .files
        .iter()
        .filter(|f| f.file.label == label && !f.deleted && !recorded.contains(&f.file.bfid))
        .map(|f| f.file.clone())
        .collect();
    files.sort_by(|a, b| a.location_cookie.cmp(&b.location_cookie));
    files
}

#[async_trait]
impl Ledger for MockLedger {
    async fn unmigrated_files(&self, label: &str) -> Result<Vec<SourceFile>, LedgerError> {
        Ok(outstanding(&self.state.lock().unwrap(), label))
    }

    async fn is_recorded(&self, bfid: &str) -> Result<bool, LedgerError> {
        Ok(self.record_count(bfid) > 0)
    }

    async fn record_migration(
        &self,
        file: &SourceFile,
        dst_bfid: Option<&str>,
    ) -> Result<RecordOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap();
        if state.record_failures > 0 {
            state.record_failures -= 1;
            return Err(LedgerError::Connection("connection reset".to_string()));
        }
        if state.preempted.remove(&file.bfid) {
            state.ledger.push(MigrationRecord {
                src_bfid: file.bfid.clone(),
                pnfsid: file.pnfsid.clone(),
                dst_bfid: None,
            });
            for f in state.files.iter_mut().filter(|f| f.file.bfid == file.bfid) {
                f.deleted = true;
            }
        }
        if state.ledger.iter().any(|r| r.src_bfid == file.bfid) {
            return Ok(RecordOutcome::AlreadyRecorded);
        }
        state.ledger.push(MigrationRecord {
            src_bfid: file.bfid.clone(),
            pnfsid: file.pnfsid.clone(),
            dst_bfid: dst_bfid.map(str::to_string),
        });
        for f in state.files.iter_mut().filter(|f| f.file.bfid == file.bfid) {
            f.deleted = true;
        }
        Ok(RecordOutcome::Recorded)
    }

    async fn mark_source_deleted(&self, bfid: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let mut found = false;
        for f in state.files.iter_mut().filter(|f| f.file.bfid == bfid) {
            f.deleted = true;
            found = true;
        }
        if found {
            Ok(())
        } else {
            Err(LedgerError::NotFound(format!("file {}", bfid)))
        }
    }

    async fn namespace_layers_present(&self, pnfsid: &str) -> Result<bool, LedgerError> {
        Ok(self.has_layers(pnfsid))
    }

    async fn retire_namespace_layers(&self, pnfsid: &str) -> Result<RetireOutcome, LedgerError> {
        let mut state = self.state.lock().unwrap();
        if state.retire_failures > 0 {
            state.retire_failures -= 1;
            return Err(LedgerError::Connection("connection reset".to_string()));
        }
        if !state.layers.remove(pnfsid) {
            return Ok(RetireOutcome::AlreadyRetired);
        }
        *state.retire_calls.entry(pnfsid.to_string()).or_insert(0) += 1;
        Ok(RetireOutcome::Retired)
    }

    async fn volume_access(&self, label: &str) -> Result<VolumeAccess, LedgerError> {
        let mut state = self.state.lock().unwrap();
        if state.volume_access_failures > 0 {
            state.volume_access_failures -= 1;
            return Err(LedgerError::Connection("connection reset".to_string()));
        }
        state
            .volumes
            .get(label)
            .map(|v| v.access.clone())
            .ok_or_else(|| LedgerError::NotFound(format!("volume {}", label)))
    }

    async fn mark_volume_migrating(&self, label: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().unwrap();
        let volume = state
            .volumes
            .get_mut(label)
            .ok_or_else(|| LedgerError::NotFound(format!("volume {}", label)))?;
        volume.migrating = true;
        Ok(())
    }

    async fn eligible_labels(&self, scope: &LabelScope) -> Result<Vec<VolumeLabel>, LedgerError> {
        let state = self.state.lock().unwrap();
        let mut labels: Vec<VolumeLabel> = state
            .volumes
            .iter()
            .filter(|(_, v)| v.library == scope.library)
            .filter(|(_, v)| {
                scope
                    .media_type
                    .as_deref()
                    .is_none_or(|m| v.media_type == m)
            })
            .filter(|(_, v)| v.access.is_accessible())
            .filter(|(label, _)| !outstanding(&state, label).is_empty())
            .map(|(label, _)| label.clone())
            .collect();
        labels.sort();
        Ok(labels)
    }

    async fn backfill_destinations(
        &self,
        media_type: &str,
    ) -> Result<Vec<MigrationRecord>, LedgerError> {
        let mut state = self.state.lock().unwrap();
        let mut new_copies: HashMap<PnfsId, Bfid> = HashMap::new();
        for f in state.files.iter().filter(|f| !f.deleted) {
            if state
                .volumes
                .get(&f.file.label)
                .is_some_and(|v| v.media_type == media_type)
            {
                new_copies.insert(f.file.pnfsid.clone(), f.file.bfid.clone());
            }
        }

        let mut updated = Vec::new();
        for record in state.ledger.iter_mut().filter(|r| r.dst_bfid.is_none()) {
            if let Some(dst) = new_copies.get(&record.pnfsid) {
                record.dst_bfid = Some(dst.clone());
                updated.push(record.clone());
            }
        }
        Ok(updated)
    }

    async fn progress(&self, storage_group: Option<&str>) -> Result<Vec<ProgressRow>, LedgerError> {
        let state = self.state.lock().unwrap();
        let mut totals: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for record in &state.ledger {
            let Some(f) = state.files.iter().find(|f| f.file.bfid == record.src_bfid) else {
                continue;
            };
            let Some(volume) = state.volumes.get(&f.file.label) else {
                continue;
            };
            if storage_group.is_some_and(|sg| sg != volume.storage_group) {
                continue;
            }
            let entry = totals.entry(volume.storage_group.clone()).or_default();
            if record.dst_bfid.is_some() {
                entry.0 += f.file.size;
            } else {
                entry.1 += f.file.size;
            }
        }
        Ok(totals
            .into_iter()
            .map(|(sg, (migrated, precious))| ProgressRow {
                storage_group: Some(sg),
                migrated_bytes: migrated,
                precious_bytes: precious,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn make_file(bfid: &str, pnfsid: &str, cookie: &str, label: &str) -> SourceFile {
        SourceFile {
            bfid: bfid.to_string(),
            pnfsid: pnfsid.to_string(),
            crc: Some(1),
            size: 1024,
            location_cookie: cookie.to_string(),
            label: label.to_string(),
        }
    }

    #[tokio::test]
    async fn unmigrated_files_are_in_tape_order_and_exclude_ledger() {
        let ledger = MockLedger::new();
        ledger.add_file(make_file("B3", "P3", "0000_000000000_0000003", "VR0001"));
        ledger.add_file(make_file("B1", "P1", "0000_000000000_0000001", "VR0001"));
        ledger.add_file(make_file("B2", "P2", "0000_000000000_0000002", "VR0001"));
        ledger.insert_record("B2", "P2");

        let bfids: Vec<Bfid> = ledger
            .unmigrated_files("VR0001")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.bfid)
            .collect();
        assert_eq!(bfids, vec!["B1".to_string(), "B3".to_string()]);
    }

    #[tokio::test]
    async fn second_record_is_a_no_op() {
        let ledger = MockLedger::new();
        let file = make_file("B1", "P1", "1", "VR0001");
        ledger.add_file(file.clone());

        assert_eq!(
            ledger.record_migration(&file, None).await.unwrap(),
            RecordOutcome::Recorded
        );
        assert_eq!(
            ledger.record_migration(&file, None).await.unwrap(),
            RecordOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.record_count("B1"), 1);
        assert!(ledger.is_deleted("B1"));
    }

    #[tokio::test]
    async fn retirement_is_check_before_delete() {
        let ledger = MockLedger::new();
        ledger.add_file(make_file("B1", "P1", "1", "VR0001"));

        assert_eq!(
            ledger.retire_namespace_layers("P1").await.unwrap(),
            RetireOutcome::Retired
        );
        assert_eq!(
            ledger.retire_namespace_layers("P1").await.unwrap(),
            RetireOutcome::AlreadyRetired
        );
        assert_eq!(ledger.retire_calls("P1"), 1);
    }

    #[tokio::test]
    async fn eligible_labels_respect_scope_and_access() {
        let ledger = MockLedger::new();
        ledger.add_volume("VR0001", "CD-LTO4F1", "LTO4", "cms");
        ledger.add_volume("VR0002", "CD-LTO4F1", "LTO4", "cms");
        ledger.add_volume("VR0003", "CD-LTO4F1", "LTO3", "cms");
        ledger.add_volume("VR0004", "CD-LTO4F1", "LTO4", "cms");
        ledger.add_volume("VR0005", "OtherLib", "LTO4", "cms");
        for label in ["VR0001", "VR0002", "VR0003", "VR0005"] {
            ledger.add_file(make_file(&format!("B-{label}"), &format!("P-{label}"), "1", label));
        }
        ledger.set_volume_access("VR0002", VolumeAccess::NoAccess);

        let scope = LabelScope {
            library: "CD-LTO4F1".to_string(),
            media_type: Some("LTO4".to_string()),
        };
        // VR0004 has no files left
        assert_eq!(
            ledger.eligible_labels(&scope).await.unwrap(),
            vec!["VR0001".to_string()]
        );
    }

    #[tokio::test]
    async fn backfill_and_progress() {
        let ledger = MockLedger::new();
        ledger.add_volume("VR0001", "CD-LTO4F1", "LTO4", "cms");
        ledger.add_volume("FL0001", "CD-LTO8F1", "LTO8", "cms");
        let old = make_file("B1", "P1", "1", "VR0001");
        let pending = make_file("B2", "P2", "2", "VR0001");
        ledger.add_file(old.clone());
        ledger.add_file(pending.clone());
        ledger.add_file(make_file("N1", "P1", "1", "FL0001"));
        ledger.record_migration(&old, None).await.unwrap();
        ledger.record_migration(&pending, None).await.unwrap();

        let updated = ledger.backfill_destinations("LTO8").await.unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].dst_bfid.as_deref(), Some("N1"));

        let rows = ledger.progress(Some("cms")).await.unwrap();
        assert_eq!(
            rows,
            vec![ProgressRow {
                storage_group: Some("cms".to_string()),
                migrated_bytes: 1024,
                precious_bytes: 1024,
            }]
        );
        assert!(ledger.progress(Some("atlas")).await.unwrap().is_empty());
    }
}
