// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod beat;
mod database;
mod jobs;
mod logging;
mod worker;

pub use beat::{BeatConfig, BeatConfigLayer};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use jobs::{JobsConfig, JobsConfigLayer};
pub use logging::{LogFormat, LoggingConfig, LoggingConfigLayer};
pub use worker::{WorkerConfig, WorkerConfigLayer};
