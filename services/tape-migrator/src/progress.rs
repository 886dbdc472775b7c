// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Central progress collection
//!
//! Workers never share counters. They send [`ProgressEvent`]s over a
//! channel to one collector task, which mirrors them into the Prometheus
//! counters and hands back a [`RunSummary`] once every sender is gone.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use migration_types::{Bfid, FileStage, LabelOutcome, PoolName, VolumeLabel};

use crate::metrics;

/// Capacity of the progress channel
pub const PROGRESS_CHANNEL_DEPTH: usize = 1024;

/// Something a worker did
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A file moved between stages; `from == to` for a repeated stage
    Transition {
        pool: PoolName,
        label: VolumeLabel,
        bfid: Bfid,
        from: FileStage,
        to: FileStage,
    },
    /// Namespace entry gone; file marked deleted and dropped
    Vanished {
        pool: PoolName,
        label: VolumeLabel,
        bfid: Bfid,
    },
    /// Layers retired by an earlier run and no cached copy left
    Stranded {
        pool: PoolName,
        label: VolumeLabel,
        bfid: Bfid,
    },
    /// A full pass over the outstanding files ended with work left
    RoundFinished {
        pool: PoolName,
        label: VolumeLabel,
        pass: u32,
        remaining: usize,
    },
    /// Worker is done with a label
    LabelFinished {
        pool: PoolName,
        label: VolumeLabel,
        outcome: LabelOutcome,
    },
}

/// Totals for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub labels_completed: usize,
    pub labels_already_migrated: usize,
    pub labels_abandoned: usize,
    pub files_recorded: usize,
    pub files_vanished: usize,
    pub files_stranded: usize,
    pub restores_requested: usize,
    pub pin_failures: usize,
    pub rounds: usize,
    /// Final outcome per label, in completion order
    pub outcomes: Vec<(VolumeLabel, LabelOutcome)>,
}

impl RunSummary {
    /// Fold one event into the totals
    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Transition { from, to, .. } => match (from, to) {
                (FileStage::Resident, FileStage::Staging) => self.pin_failures += 1,
                (_, FileStage::Staging) => self.restores_requested += 1,
                (_, FileStage::Recorded) => self.files_recorded += 1,
                _ => {}
            },
            ProgressEvent::Vanished { .. } => self.files_vanished += 1,
            ProgressEvent::Stranded { .. } => self.files_stranded += 1,
            ProgressEvent::RoundFinished { .. } => self.rounds += 1,
            ProgressEvent::LabelFinished { label, outcome, .. } => {
                match outcome {
                    LabelOutcome::Completed { .. } => self.labels_completed += 1,
                    LabelOutcome::AlreadyMigrated => self.labels_already_migrated += 1,
                    LabelOutcome::Abandoned(_) => self.labels_abandoned += 1,
                }
                self.outcomes.push((label.clone(), outcome.clone()));
            }
        }
    }
}

fn mirror_to_metrics(event: &ProgressEvent) {
    match event {
        ProgressEvent::Transition { to, .. } => metrics::record_transition(*to),
        ProgressEvent::Vanished { .. } => metrics::record_file_dropped("vanished"),
        ProgressEvent::Stranded { .. } => metrics::record_file_dropped("stranded"),
        ProgressEvent::RoundFinished { .. } => {}
        ProgressEvent::LabelFinished { outcome, .. } => metrics::record_label_outcome(outcome),
    }
}

/// Start the collector; the handle resolves when all senders are dropped.
pub fn spawn_collector(mut rx: mpsc::Receiver<ProgressEvent>) -> JoinHandle<RunSummary> {
    tokio::spawn(async move {
        let mut summary = RunSummary::default();
        while let Some(event) = rx.recv().await {
            mirror_to_metrics(&event);
            summary.apply(&event);
        }
        debug!(
            labels = summary.outcomes.len(),
            recorded = summary.files_recorded,
            "Progress collector finished"
        );
        summary
    })
}
