// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Credential renewal loop
//!
//! The admin channel authenticates with Kerberos. A run gets a private
//! credential cache, filled from the host keytab before the first admin
//! command and refreshed on a fixed period until the workers are joined.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const KINIT: &str = "/usr/bin/kinit";

/// Credential errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to determine host name: {0}")]
    Hostname(String),

    #[error("Failed to run kinit: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("kinit exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Something that refreshes the run's credentials
#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    async fn renew(&self) -> Result<(), CredentialError>;
}

/// Renews host credentials from the keytab with `kinit -k`
#[derive(Debug, Clone)]
pub struct Kinit {
    principal: String,
    cache: PathBuf,
}

impl Kinit {
    /// Host principal of this machine and a cache unique to this run
    pub fn for_host(run_id: &uuid::Uuid) -> Result<Self, CredentialError> {
        let host = hostname::get()
            .map_err(|e| CredentialError::Hostname(e.to_string()))?
            .to_string_lossy()
            .to_string();
        Ok(Self {
            principal: format!("host/{}", host),
            cache: credential_cache_path(run_id),
        })
    }

    /// Credential cache to export as `KRB5CCNAME`
    pub fn cache(&self) -> &Path {
        &self.cache
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }
}

/// Private cache file for one run
pub fn credential_cache_path(run_id: &uuid::Uuid) -> PathBuf {
    PathBuf::from(format!("/tmp/krb5cc_root.migration-{}", run_id))
}

#[async_trait]
impl CredentialRenewer for Kinit {
    async fn renew(&self) -> Result<(), CredentialError> {
        let output = Command::new(KINIT)
            .arg("-k")
            .arg(&self.principal)
            .env("KRB5CCNAME", &self.cache)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CredentialError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(principal = %self.principal, cache = %self.cache.display(), "Credentials renewed");
        Ok(())
    }
}

/// Renew every `period` until `shutdown` flips to true.
///
/// The first renewal happens one period after start; the caller renews once
/// itself before any admin command is sent. A failed renewal is logged and
/// retried at the next tick.
pub fn spawn_renewal_loop(
    renewer: Arc<dyn CredentialRenewer>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "Credential renewal loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    if let Err(e) = renewer.renew().await {
                        error!(error = %e, "Credential renewal failed");
                        crate::metrics::record_credential_failure();
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Credential renewal loop stopped");
    })
}
