// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Job execution for the tape migrator
//!
//! Currently supports the migrate job, which drives every outstanding file of
//! a tape volume onto a precious disk pool and records it in the ledger.

pub mod migrate;

use std::path::PathBuf;

use thiserror::Error;

use crate::admin::AdminError;
use crate::credentials::CredentialError;
use crate::ledger::LedgerError;
use crate::namespace::NamespaceError;

/// Job execution errors
///
/// Only errors that stop a worker entirely surface here. Per-file and
/// per-label failures are logged and turned into label outcomes instead.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Admin channel error: {0}")]
    Admin(#[from] AdminError),

    #[error("Namespace error: {0}")]
    Namespace(#[from] NamespaceError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Failed to read label file {}: {source}", path.display())]
    LabelFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("No active pools in pool group {0}")]
    NoActivePools(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
