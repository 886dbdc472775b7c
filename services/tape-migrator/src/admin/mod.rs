// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Pool administration channel
//!
//! Every remote interaction goes through a closed set of [`AdminCommand`]
//! variants. The reply of each command is handed to a dedicated parser in
//! [`parse`], so the worker only ever sees typed results.

pub mod parse;
pub mod ssh;

#[cfg(test)]
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use migration_types::{PnfsId, PoolName};

/// Substrings of a remote error that mean the tape itself cannot be read.
const INACCESSIBLE_MARKERS: &[&str] = &[
    "NOACCESS",
    "NOTALLOWED",
    "volume unavailable",
    "tape unavailable",
    "volume is not accessible",
];

/// Admin channel errors
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Remote command `{command}` failed: {stderr}")]
    Remote { command: String, stderr: String },

    #[error("Admin transport error: {0}")]
    Transport(String),

    #[error("Admin command `{0}` timed out")]
    Timeout(String),

    #[error("Unparseable reply to `{command}`: {reason}")]
    Parse { command: String, reason: String },
}

impl AdminError {
    /// Whether the failure means the volume behind a restore cannot be read.
    ///
    /// Such errors are fatal for the label, every other admin failure is
    /// retried.
    pub fn is_volume_inaccessible(&self) -> bool {
        match self {
            AdminError::Remote { stderr, .. } => {
                let lowered = stderr.to_ascii_lowercase();
                INACCESSIBLE_MARKERS
                    .iter()
                    .any(|m| stderr.contains(m) || lowered.contains(&m.to_ascii_lowercase()))
            }
            _ => false,
        }
    }
}

/// Typed admin commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    /// List the members of a pool group with their mode flags
    PoolGroupMembers { group: String },
    /// Ask the namespace which pools hold a cached copy
    CacheLocations { pnfsid: PnfsId },
    /// Stage the file from tape onto `pool`
    Restore { pool: PoolName, pnfsid: PnfsId },
    /// Mark the replica on `pool` precious
    Pin { pool: PoolName, pnfsid: PnfsId },
    /// Drop the replica on `pool`
    Evict { pool: PoolName, pnfsid: PnfsId },
    /// Pool status, including the precious space fraction
    PoolInfo { pool: PoolName },
}

impl AdminCommand {
    /// Short name used in logs and metrics labels
    pub fn verb(&self) -> &'static str {
        match self {
            AdminCommand::PoolGroupMembers { .. } => "pool_group_members",
            AdminCommand::CacheLocations { .. } => "cache_locations",
            AdminCommand::Restore { .. } => "restore",
            AdminCommand::Pin { .. } => "pin",
            AdminCommand::Evict { .. } => "evict",
            AdminCommand::PoolInfo { .. } => "pool_info",
        }
    }
}

impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminCommand::PoolGroupMembers { group } => {
                write!(f, "\\s PoolManager psu ls pgroup -a {}", group)
            }
            AdminCommand::CacheLocations { pnfsid } => write!(f, "\\sn cacheinfoof {}", pnfsid),
            AdminCommand::Restore { pool, pnfsid } => {
                write!(f, "\\s {} rh restore {}", pool, pnfsid)
            }
            AdminCommand::Pin { pool, pnfsid } => {
                write!(f, "\\s {} rep set precious {}", pool, pnfsid)
            }
            AdminCommand::Evict { pool, pnfsid } => {
                write!(f, "\\s {} rep rm -force {}", pool, pnfsid)
            }
            AdminCommand::PoolInfo { pool } => write!(f, "\\s {} info -a", pool),
        }
    }
}

/// Raw request/response transport for admin command lines.
///
/// Implementations return the reply split into lines with carriage returns
/// and blank lines removed, and fail with [`AdminError::Remote`] whenever the
/// remote side wrote anything to its error stream.
#[async_trait]
pub trait AdminTransport: Send + Sync {
    async fn execute(&self, command_line: &str) -> Result<Vec<String>, AdminError>;
}

/// Pool operations the migration worker depends on
#[async_trait]
pub trait PoolAdmin: Send + Sync {
    /// Pools holding a cached copy; empty when the file is only on tape
    async fn cache_locations(&self, pnfsid: &str) -> Result<Vec<PoolName>, AdminError>;

    /// Fraction of the pool's space taken by precious data, in `[0, 1]`
    async fn occupancy_fraction(&self, pool: &str) -> Result<f64, AdminError>;

    /// Members of `group` that are not disabled
    async fn active_pools(&self, group: &str) -> Result<Vec<PoolName>, AdminError>;

    async fn request_restore(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError>;

    /// Pinning an already precious replica succeeds without change
    async fn pin(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError>;

    async fn evict(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError>;
}

/// [`PoolAdmin`] implementation over any [`AdminTransport`]
pub struct AdminChannel<T> {
    transport: T,
}

impl<T: AdminTransport> AdminChannel<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send one command and return the cleaned reply lines
    pub async fn run(&self, command: &AdminCommand) -> Result<Vec<String>, AdminError> {
        let line = command.to_string();
        tracing::trace!(verb = command.verb(), command = %line, "Sending admin command");
        self.transport.execute(&line).await
    }
}

#[async_trait]
impl<T: AdminTransport> PoolAdmin for AdminChannel<T> {
    async fn cache_locations(&self, pnfsid: &str) -> Result<Vec<PoolName>, AdminError> {
        let reply = self
            .run(&AdminCommand::CacheLocations {
                pnfsid: pnfsid.to_string(),
            })
            .await?;
        Ok(parse::cache_locations(&reply))
    }

    async fn occupancy_fraction(&self, pool: &str) -> Result<f64, AdminError> {
        let command = AdminCommand::PoolInfo {
            pool: pool.to_string(),
        };
        let reply = self.run(&command).await?;
        parse::precious_fraction(&reply).map_err(|reason| AdminError::Parse {
            command: command.to_string(),
            reason,
        })
    }

    async fn active_pools(&self, group: &str) -> Result<Vec<PoolName>, AdminError> {
        let reply = self
            .run(&AdminCommand::PoolGroupMembers {
                group: group.to_string(),
            })
            .await?;
        Ok(parse::active_pool_members(&reply))
    }

    async fn request_restore(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        self.run(&AdminCommand::Restore {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn pin(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        self.run(&AdminCommand::Pin {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn evict(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        self.run(&AdminCommand::Evict {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        })
        .await
        .map(|_| ())
    }
}
