// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Admin transport over the system `ssh` client
//!
//! Authentication is GSSAPI against the run's private credential cache. Each
//! transport has its own ControlMaster socket, so a worker keeps one
//! persistent session and never shares it with another worker.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{AdminError, AdminTransport};

/// How long an idle master connection is kept open
const CONTROL_PERSIST_SECS: u64 = 600;

/// Connection settings for an [`SshTransport`]
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Kerberos credential cache exported as `KRB5CCNAME`
    pub credential_cache: PathBuf,
    pub timeout: Duration,
}

/// Runs admin commands as `ssh <host> <command>`
pub struct SshTransport {
    settings: SshSettings,
    control_path: PathBuf,
}

impl SshTransport {
    /// Create a transport whose master socket lives under `control_dir`.
    ///
    /// `session` distinguishes the sockets of concurrent workers.
    pub fn new(settings: SshSettings, control_dir: &Path, session: &str) -> Self {
        let control_path = control_dir.join(format!("admin-{}.sock", session));
        Self {
            settings,
            control_path,
        }
    }

    fn command(&self, command_line: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.settings.port.to_string())
            .arg("-l")
            .arg(&self.settings.user)
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "GSSAPIAuthentication=yes"])
            .args(["-o", "PreferredAuthentications=gssapi-with-mic"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "LogLevel=ERROR"])
            .args(["-o", "ControlMaster=auto"])
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg(format!("ControlPersist={}", CONTROL_PERSIST_SECS))
            .arg(&self.settings.host)
            .arg(command_line)
            .env("KRB5CCNAME", &self.settings.credential_cache)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AdminTransport for SshTransport {
    async fn execute(&self, command_line: &str) -> Result<Vec<String>, AdminError> {
        let output = tokio::time::timeout(self.settings.timeout, self.command(command_line).output())
            .await
            .map_err(|_| AdminError::Timeout(command_line.to_string()))?
            .map_err(|e| AdminError::Transport(format!("failed to run ssh: {}", e)))?;

        let stderr = split_reply(&String::from_utf8_lossy(&output.stderr));
        if !stderr.is_empty() {
            return Err(AdminError::Remote {
                command: command_line.to_string(),
                stderr: stderr.join(" "),
            });
        }

        // ssh reports its own failures (255) on stderr, anything else is odd
        if !output.status.success() {
            return Err(AdminError::Transport(format!(
                "ssh exited with {} for `{}`",
                output.status, command_line
            )));
        }

        Ok(split_reply(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Split a reply into lines, dropping carriage returns and blank lines.
pub fn split_reply(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.trim_end_matches('\r').trim_end())
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}
