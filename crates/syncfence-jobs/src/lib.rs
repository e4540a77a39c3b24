// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fenced fan-out sync jobs.
//!
//! A job of some [`JobKind`](syncfence_core::JobKind) for one resource moves
//! through four roles that share state only through the KV store:
//!
//! 1. the [`BeatScheduler`] finds due resources and asks the [`JobStarter`]
//! 2. the starter admits at most one job per (kind, resource), submits the
//!    generator and writes the fence
//! 3. the [`GeneratorHandler`] plans the work set, records every subtask in the
//!    taskset and submits it
//! 4. [`SubtaskHandler`]s apply effects, and the [`CompletionRouter`] drains the
//!    taskset and finalizes the job through the [`FenceReaper`]

pub mod admin;
pub mod beat;
pub mod collaborators;
pub mod completion;
pub mod context;
pub mod error;
pub mod generator;
pub mod guard;
pub mod reaper;
pub mod registry;
pub mod settings;
pub mod sqlite;
pub mod starter;
pub mod subtask;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod worker;

pub use admin::{JobAdmin, JobStatus};
pub use beat::{BeatReport, BeatScheduler};
pub use collaborators::{
	Collaborators, ConnectorSource, DocumentStore, EffectError, ResourceStore, SubtaskEffect,
};
pub use completion::CompletionRouter;
pub use context::SyncRuntime;
pub use error::{Result, SyncError};
pub use generator::GeneratorHandler;
pub use reaper::{FenceReaper, MonitorReport};
pub use registry::KindSpec;
pub use settings::SyncSettings;
pub use sqlite::{DirtyItem, SqliteCatalog};
pub use starter::{JobStarter, SkipReason, StartOutcome};
pub use subtask::SubtaskHandler;
pub use worker::install_handlers;
