// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Namespace path resolution
//!
//! The mounted namespace filesystem answers `<root>/.(pathof)(<pnfsid>)`
//! with the path of the file. A missing magic file means the entry is gone;
//! a missing root means the filesystem is not mounted and nothing can run.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Namespace errors
#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("Namespace filesystem not mounted at {0}")]
    NotMounted(PathBuf),

    #[error("Namespace I/O error for {pnfsid}: {source}")]
    Io {
        pnfsid: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve namespace ids to paths
#[async_trait]
pub trait NamespacePaths: Send + Sync {
    /// Path of the entry, `None` when it no longer exists
    async fn path_of(&self, pnfsid: &str) -> Result<Option<PathBuf>, NamespaceError>;

    /// Fail with [`NamespaceError::NotMounted`] unless the root is reachable
    async fn ensure_mounted(&self) -> Result<(), NamespaceError>;
}

/// Namespace resolution over the mounted filesystem
#[derive(Debug, Clone)]
pub struct FsNamespace {
    root: PathBuf,
}

impl FsNamespace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn pathof_file(&self, pnfsid: &str) -> PathBuf {
        self.root.join(format!(".(pathof)({})", pnfsid))
    }
}

#[async_trait]
impl NamespacePaths for FsNamespace {
    async fn path_of(&self, pnfsid: &str) -> Result<Option<PathBuf>, NamespaceError> {
        match tokio::fs::read_to_string(self.pathof_file(pnfsid)).await {
            Ok(content) => Ok(Some(PathBuf::from(content.trim()))),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // The entry and the mount look the same from here
                self.ensure_mounted().await?;
                Ok(None)
            }
            Err(e) => Err(NamespaceError::Io {
                pnfsid: pnfsid.to_string(),
                source: e,
            }),
        }
    }

    async fn ensure_mounted(&self) -> Result<(), NamespaceError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            _ => Err(NamespaceError::NotMounted(self.root.clone())),
        }
    }
}
