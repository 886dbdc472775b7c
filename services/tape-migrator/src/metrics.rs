// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Prometheus metrics for the tape migrator
//!
//! Exports metrics for monitoring a migration run including:
//! - File stage transitions and dropped files
//! - Label outcomes
//! - Ledger retries and credential renewal failures
//! - Last observed precious fraction per pool
//!
//! There is no scrape endpoint; `gather_metrics()` output is written to a
//! file at the end of a run when requested.

use migration_types::{FileStage, LabelOutcome};
use prometheus::{Counter, CounterVec, GaugeVec, Opts, Registry, TextEncoder};

// Static metric initialization uses expect because these are compile-time
// constant definitions that cannot fail in practice. If they do fail, it indicates
// a programming error (e.g., invalid metric name) that should cause a panic at startup.
//
// This module exists to scope the clippy allow attributes to just the metric definitions.
#[allow(clippy::expect_used)]
mod metrics_impl {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        /// Registry for all migrator metrics
        pub static ref REGISTRY: Registry = Registry::new();

        /// File stage transitions, labelled by the stage entered
        pub static ref FILE_TRANSITIONS: CounterVec = CounterVec::new(
            Opts::new(
                "tape_migrator_file_transitions_total",
                "File stage transitions by target stage"
            ),
            &["stage"]
        ).expect("valid metric name");

        /// Files dropped from a run without a ledger row
        pub static ref FILES_DROPPED: CounterVec = CounterVec::new(
            Opts::new(
                "tape_migrator_files_dropped_total",
                "Files dropped without a ledger row (vanished or stranded)"
            ),
            &["reason"]
        ).expect("valid metric name");

        /// Labels finished, by outcome
        pub static ref LABEL_OUTCOMES: CounterVec = CounterVec::new(
            Opts::new(
                "tape_migrator_labels_total",
                "Labels finished by outcome"
            ),
            &["outcome"]
        ).expect("valid metric name");

        /// Ledger calls retried after a connection failure
        pub static ref LEDGER_RETRIES: Counter = Counter::with_opts(
            Opts::new(
                "tape_migrator_ledger_retries_total",
                "Ledger calls retried after a transient failure"
            )
        ).expect("valid metric name");

        /// Failed credential renewals
        pub static ref CREDENTIAL_FAILURES: Counter = Counter::with_opts(
            Opts::new(
                "tape_migrator_credential_failures_total",
                "Failed credential renewals"
            )
        ).expect("valid metric name");

        /// Last precious fraction read per pool
        pub static ref POOL_OCCUPANCY: GaugeVec = GaugeVec::new(
            Opts::new(
                "tape_migrator_pool_precious_fraction",
                "Last observed precious fraction of a destination pool"
            ),
            &["pool"]
        ).expect("valid metric name");
    }
}

pub use metrics_impl::{
    CREDENTIAL_FAILURES, FILE_TRANSITIONS, FILES_DROPPED, LABEL_OUTCOMES, LEDGER_RETRIES,
    POOL_OCCUPANCY, REGISTRY,
};

/// Register all metrics with the registry
///
/// Should be called once during application startup.
/// Panics if registration fails (indicates a programming error).
#[allow(clippy::expect_used)]
pub fn register_metrics() {
    REGISTRY
        .register(Box::new(FILE_TRANSITIONS.clone()))
        .expect("Failed to register FILE_TRANSITIONS");
    REGISTRY
        .register(Box::new(FILES_DROPPED.clone()))
        .expect("Failed to register FILES_DROPPED");
    REGISTRY
        .register(Box::new(LABEL_OUTCOMES.clone()))
        .expect("Failed to register LABEL_OUTCOMES");
    REGISTRY
        .register(Box::new(LEDGER_RETRIES.clone()))
        .expect("Failed to register LEDGER_RETRIES");
    REGISTRY
        .register(Box::new(CREDENTIAL_FAILURES.clone()))
        .expect("Failed to register CREDENTIAL_FAILURES");
    REGISTRY
        .register(Box::new(POOL_OCCUPANCY.clone()))
        .expect("Failed to register POOL_OCCUPANCY");
}

/// Get metrics in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_transition(stage: FileStage) {
    let stage = stage.to_string();
    FILE_TRANSITIONS.with_label_values(&[stage.as_str()]).inc();
}

pub fn record_file_dropped(reason: &str) {
    FILES_DROPPED.with_label_values(&[reason]).inc();
}

pub fn record_label_outcome(outcome: &LabelOutcome) {
    let name = match outcome {
        LabelOutcome::Completed { .. } => "completed",
        LabelOutcome::AlreadyMigrated => "already_migrated",
        LabelOutcome::Abandoned(_) => "abandoned",
    };
    LABEL_OUTCOMES.with_label_values(&[name]).inc();
}

/// Record a ledger call retried after a connection failure
pub fn record_ledger_retry() {
    LEDGER_RETRIES.inc();
}

pub fn record_credential_failure() {
    CREDENTIAL_FAILURES.inc();
}

pub fn set_pool_occupancy(pool: &str, fraction: f64) {
    POOL_OCCUPANCY.with_label_values(&[pool]).set(fraction);
}
