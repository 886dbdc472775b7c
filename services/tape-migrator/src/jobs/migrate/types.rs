// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Types for the migrate job

use migration_types::{AbandonReason, FileStage, SourceFile, VolumeLabel};

/// Item on the label queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Label(VolumeLabel),
    /// One per worker, sent after the last label
    Shutdown,
}

/// A file being driven through the stages inside one worker
#[derive(Debug, Clone)]
pub struct FileTask {
    pub file: SourceFile,
    pub stage: FileStage,
    /// Every stage entered, starting with `Pending`
    pub trail: Vec<FileStage>,
    /// Layers were already gone when the label was picked up
    pub layers_retired: bool,
}

impl FileTask {
    pub fn new(file: SourceFile) -> Self {
        Self {
            file,
            stage: FileStage::Pending,
            trail: vec![FileStage::Pending],
            layers_retired: false,
        }
    }

    /// Enter `to`, returning the stage left
    pub fn advance(&mut self, to: FileStage) -> FileStage {
        let from = self.stage;
        self.stage = to;
        self.trail.push(to);
        from
    }
}

/// How a file left the work list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDone {
    Recorded,
    Vanished,
    Stranded,
}

/// Result of one visit to a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit {
    Done(FileDone),
    /// Back to the tail of the list for the next round
    Requeue,
    /// Stop the whole label now
    Abort(AbandonReason),
}
