// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Tape Migrator Library
//!
//! Moves the files of legacy tape volumes onto disk pools of a pool group,
//! pins them there as precious, retires their legacy namespace layers and
//! records completion in the migration ledger. The ledger makes every run
//! safe to interrupt and restart.

pub mod admin;
pub mod backpressure;
pub mod config;
pub mod credentials;
pub mod dispatcher;
pub mod jobs;
pub mod ledger;
pub mod metrics;
pub mod namespace;
pub mod progress;
