// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Parsers for admin command replies
//!
//! Replies are free text. Each parser takes the reply lines as returned by
//! the transport and is lenient about spacing; an empty reply is always the
//! negative answer.

use migration_types::PoolName;

/// Marker line after which pool group members are listed
const POOL_LIST_MARKER: &str = "poolList :";

/// Mode flag of a member that must not receive new work
const DISABLED_MODE: &str = "mode=disabled";

/// Label of the pool info line carrying the precious fraction
const PRECIOUS_LABEL: &str = "Precious";

/// Members of a pool group that are not disabled.
///
/// Only lines after `poolList :` are members. The first column is the pool
/// name, the second its flag block.
pub fn active_pool_members<S: AsRef<str>>(reply: &[S]) -> Vec<PoolName> {
    let mut pools = Vec::new();
    let mut in_pool_list = false;

    for line in reply {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with(POOL_LIST_MARKER) {
            in_pool_list = true;
            continue;
        }
        if !in_pool_list {
            continue;
        }

        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        if parts.next().is_some_and(|flags| flags.contains(DISABLED_MODE)) {
            continue;
        }
        pools.push(name.to_string());
    }

    pools
}

/// Pools holding a cached copy of a file.
///
/// The names are the whitespace separated words of the first non-empty
/// line. No such line means the file is not resident anywhere.
pub fn cache_locations<S: AsRef<str>>(reply: &[S]) -> Vec<PoolName> {
    reply
        .iter()
        .map(|l| l.as_ref().trim())
        .find(|l| !l.is_empty())
        .map(|l| l.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Fraction of a pool's space holding precious data.
///
/// Read from the last column of the first line mentioning `Precious`, e.g.
/// `Precious  : 1099511627776  [0.25]`. A reply without such a line counts
/// as an empty pool.
pub fn precious_fraction<S: AsRef<str>>(reply: &[S]) -> Result<f64, String> {
    let Some(line) = reply
        .iter()
        .map(|l| l.as_ref().trim())
        .find(|l| l.contains(PRECIOUS_LABEL))
    else {
        return Ok(0.0);
    };

    let raw = line
        .split_whitespace()
        .last()
        .ok_or_else(|| format!("empty precious line: {:?}", line))?;
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | '-'))
        .collect();

    let fraction: f64 = cleaned
        .parse()
        .map_err(|e| format!("bad precious fraction {:?}: {}", raw, e))?;
    if !fraction.is_finite() {
        return Err(format!("bad precious fraction {:?}", raw));
    }

    Ok(fraction.clamp(0.0, 1.0))
}
