// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Backpressure controller
//!
//! Pinned data cannot be evicted, so a pool fills up as fast as workers pin
//! onto it. Before taking a new label a worker waits here until the precious
//! fraction of its pool is back under the threshold.

use std::time::Duration;

use tracing::{info, warn};

use crate::admin::{AdminError, PoolAdmin};

/// Pacing for [`wait_until_below_threshold`]
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    /// Highest precious fraction at which new work is accepted
    pub threshold: f64,
    /// Sleep between polls
    pub poll_interval: Duration,
    /// Consecutive failed polls tolerated before giving up
    pub max_failures: u32,
}

/// Block until `pool` reports a precious fraction at or below the threshold.
///
/// Returns the number of polls made. A failed poll is logged and retried
/// like a poll over threshold; `max_failures` failures in a row return the
/// last error.
pub async fn wait_until_below_threshold(
    admin: &dyn PoolAdmin,
    pool: &str,
    throttle: Throttle,
) -> Result<u32, AdminError> {
    let mut polls = 0;
    let mut failures = 0;

    loop {
        polls += 1;
        match admin.occupancy_fraction(pool).await {
            Ok(fraction) => {
                failures = 0;
                crate::metrics::set_pool_occupancy(pool, fraction);
                if fraction <= throttle.threshold {
                    return Ok(polls);
                }
                info!(
                    pool,
                    fraction,
                    threshold = throttle.threshold,
                    "Pool over precious threshold, waiting"
                );
            }
            Err(e) => {
                failures += 1;
                warn!(pool, error = %e, failures, "Failed to read pool occupancy");
                if failures >= throttle.max_failures {
                    return Err(e);
                }
            }
        }
        tokio::time::sleep(throttle.poll_interval).await;
    }
}
