// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Test doubles for the admin channel.
//!
//! [`ScriptedTransport`] replays canned replies per command line and is used
//! to test the parsers through [`super::AdminChannel`]. [`MockAdmin`] models
//! a small pool system in memory for the worker state machine tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use migration_types::{PnfsId, PoolName};

use super::{AdminCommand, AdminError, AdminTransport, PoolAdmin};

// ============================================================================
// Scripted transport
// ============================================================================

#[derive(Default)]
struct Script {
    replies: HashMap<String, Result<Vec<String>, String>>,
    sent: Vec<String>,
}

/// Transport returning canned replies; unknown commands get an empty reply.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, command_line: &str, lines: &[&str]) {
        self.script.lock().unwrap().replies.insert(
            command_line.to_string(),
            Ok(lines.iter().map(|l| l.to_string()).collect()),
        );
    }

    pub fn fail(&self, command_line: &str, stderr: &str) {
        self.script
            .lock()
            .unwrap()
            .replies
            .insert(command_line.to_string(), Err(stderr.to_string()));
    }

    /// Command lines sent so far, in order
    pub fn sent(&self) -> Vec<String> {
        self.script.lock().unwrap().sent.clone()
    }
}

#[async_trait]
impl AdminTransport for ScriptedTransport {
    async fn execute(&self, command_line: &str) -> Result<Vec<String>, AdminError> {
        let mut script = self.script.lock().unwrap();
        script.sent.push(command_line.to_string());
        match script.replies.get(command_line) {
            Some(Ok(lines)) => Ok(lines.clone()),
            Some(Err(stderr)) => Err(AdminError::Remote {
                command: command_line.to_string(),
                stderr: stderr.clone(),
            }),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// In-memory pool system
// ============================================================================

/// Residency model of one file
struct MockFile {
    pool: PoolName,
    /// Residency checks that still answer "not cached"
    misses: usize,
    resident: bool,
}

#[derive(Default)]
struct MockAdminState {
    active_pools: Vec<PoolName>,
    pool_query_failures: usize,
    files: HashMap<PnfsId, MockFile>,
    pin_failures: HashMap<PnfsId, usize>,
    restore_errors: HashMap<PnfsId, String>,
    occupancy: HashMap<PoolName, VecDeque<Result<f64, String>>>,
    occupancy_polls: HashMap<PoolName, usize>,
    pinned: HashSet<(PoolName, PnfsId)>,
    calls: Vec<AdminCommand>,
}

/// In-memory [`PoolAdmin`]
///
/// A configured file answers "not cached" for its first `misses` residency
/// checks and is resident on its pool afterwards. Files that were never
/// configured stay on tape forever.
#[derive(Default)]
pub struct MockAdmin {
    state: Mutex<MockAdminState>,
}

impl MockAdmin {
    pub fn new(active_pools: &[&str]) -> Self {
        let admin = Self::default();
        admin.set_active_pools(active_pools);
        admin
    }

    pub fn set_active_pools(&self, pools: &[&str]) {
        self.state.lock().unwrap().active_pools = pools.iter().map(|p| p.to_string()).collect();
    }

    /// Make the next `n` pool group queries fail
    pub fn fail_pool_queries(&self, n: usize) {
        self.state.lock().unwrap().pool_query_failures = n;
    }

    /// File becomes resident on `pool` after `misses` negative checks
    pub fn resident_after(&self, pnfsid: &str, pool: &str, misses: usize) {
        self.state.lock().unwrap().files.insert(
            pnfsid.to_string(),
            MockFile {
                pool: pool.to_string(),
                misses,
                resident: false,
            },
        );
    }

    pub fn fail_pins(&self, pnfsid: &str, n: usize) {
        self.state
            .lock()
            .unwrap()
            .pin_failures
            .insert(pnfsid.to_string(), n);
    }

    pub fn fail_restore(&self, pnfsid: &str, stderr: &str) {
        self.state
            .lock()
            .unwrap()
            .restore_errors
            .insert(pnfsid.to_string(), stderr.to_string());
    }

    /// Queue occupancy answers for `pool`; `Err` entries simulate a failed
    /// query. Once the queue is empty the pool reports 0.0.
    pub fn script_occupancy(&self, pool: &str, answers: Vec<Result<f64, String>>) {
        self.state
            .lock()
            .unwrap()
            .occupancy
            .insert(pool.to_string(), answers.into());
    }

    pub fn occupancy_polls(&self, pool: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .occupancy_polls
            .get(pool)
            .copied()
            .unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<AdminCommand> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Files for which a restore was requested, in request order
    pub fn restores(&self) -> Vec<PnfsId> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AdminCommand::Restore { pnfsid, .. } => Some(pnfsid),
                _ => None,
            })
            .collect()
    }

    pub fn is_pinned(&self, pool: &str, pnfsid: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pinned
            .contains(&(pool.to_string(), pnfsid.to_string()))
    }
}

fn remote(command: &AdminCommand, stderr: &str) -> AdminError {
    AdminError::Remote {
        command: command.to_string(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl PoolAdmin for MockAdmin {
    async fn cache_locations(&self, pnfsid: &str) -> Result<Vec<PoolName>, AdminError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(AdminCommand::CacheLocations {
            pnfsid: pnfsid.to_string(),
        });
        let Some(file) = state.files.get_mut(pnfsid) else {
            return Ok(Vec::new());
        };
        if !file.resident {
            if file.misses > 0 {
                file.misses -= 1;
                return Ok(Vec::new());
            }
            file.resident = true;
        }
        Ok(vec![file.pool.clone()])
    }

    async fn occupancy_fraction(&self, pool: &str) -> Result<f64, AdminError> {
        let command = AdminCommand::PoolInfo {
            pool: pool.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.clone());
        *state.occupancy_polls.entry(pool.to_string()).or_insert(0) += 1;
        match state.occupancy.get_mut(pool).and_then(|q| q.pop_front()) {
            Some(Ok(fraction)) => Ok(fraction),
            Some(Err(stderr)) => Err(remote(&command, &stderr)),
            None => Ok(0.0),
        }
    }

    async fn active_pools(&self, group: &str) -> Result<Vec<PoolName>, AdminError> {
        let command = AdminCommand::PoolGroupMembers {
            group: group.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.calls.push(command);
        if state.pool_query_failures > 0 {
            state.pool_query_failures -= 1;
            return Err(AdminError::Transport("connection reset".to_string()));
        }
        Ok(state.active_pools.clone())
    }

    async fn request_restore(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        let command = AdminCommand::Restore {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.clone());
        match state.restore_errors.get(pnfsid) {
            Some(stderr) => Err(remote(&command, stderr)),
            None => Ok(()),
        }
    }

    async fn pin(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        let command = AdminCommand::Pin {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        };
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.clone());
        if let Some(remaining) = state.pin_failures.get_mut(pnfsid)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(remote(&command, "replica not found"));
        }
        state
            .pinned
            .insert((pool.to_string(), pnfsid.to_string()));
        Ok(())
    }

    async fn evict(&self, pool: &str, pnfsid: &str) -> Result<(), AdminError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(AdminCommand::Evict {
            pool: pool.to_string(),
            pnfsid: pnfsid.to_string(),
        });
        if let Some(file) = state.files.get_mut(pnfsid)
            && file.pool == pool
        {
            file.resident = false;
        }
        Ok(())
    }
}
