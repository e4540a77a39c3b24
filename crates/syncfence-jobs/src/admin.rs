// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator actions on sync jobs.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use syncfence_core::{FencePayload, JobKind, ResourceId};
use syncfence_queue::Priority;
use tracing::{info, instrument};

use crate::context::SyncRuntime;
use crate::error::Result;
use crate::reaper::FenceReaper;
use crate::starter::{JobStarter, StartOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
	pub kind: JobKind,
	pub resource_id: ResourceId,
	pub fence: Option<FencePayload>,
	pub outstanding: u64,
	pub progress: Option<i64>,
	pub complete: Option<i64>,
	pub stopped: bool,
	pub generator_running: bool,
}

impl JobStatus {
	pub fn is_active(&self) -> bool {
		self.fence.is_some()
	}
}

pub struct JobAdmin {
	rt: Arc<SyncRuntime>,
	starter: JobStarter,
	reaper: FenceReaper,
}

impl JobAdmin {
	pub fn new(rt: Arc<SyncRuntime>) -> Self {
		Self {
			starter: JobStarter::new(rt.clone()),
			reaper: FenceReaper::new(rt.clone()),
			rt,
		}
	}

	pub async fn job_status(&self, kind: JobKind, resource_id: ResourceId) -> Result<JobStatus> {
		let ns = self.rt.namespace(kind, resource_id);
		Ok(JobStatus {
			kind,
			resource_id,
			fence: ns.fence.get().await?,
			outstanding: ns.taskset.size().await?,
			progress: ns.progress.get().await?,
			complete: ns.complete.get().await?,
			stopped: ns.stop.is_set().await?,
			generator_running: ns.generator_running().await?,
		})
	}

	pub async fn active_jobs(&self, kind: JobKind) -> Result<Vec<JobStatus>> {
		let keys = self
			.rt
			.store
			.keys_with_prefix(&self.rt.keys.fence_prefix(kind))
			.await?;
		let mut jobs = Vec::with_capacity(keys.len());
		for key in keys {
			if let Some(resource_id) = self.rt.keys.resource_from_fence_key(kind, &key) {
				jobs.push(self.job_status(kind, resource_id).await?);
			}
		}
		Ok(jobs)
	}

	/// Set the stop fence. Running generators abort at their next heartbeat;
	/// queued subtasks become no-ops. `ttl` of `None` stops until resumed.
	#[instrument(skip(self))]
	pub async fn stop_job(&self, kind: JobKind, resource_id: ResourceId, ttl: Option<Duration>) -> Result<()> {
		self.rt.namespace(kind, resource_id).stop.set(ttl).await?;
		info!(kind = %kind, resource_id = %resource_id, "Stop fence set");
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn resume_job(&self, kind: JobKind, resource_id: ResourceId) -> Result<()> {
		self.rt.namespace(kind, resource_id).stop.clear().await?;
		info!(kind = %kind, resource_id = %resource_id, "Stop fence cleared");
		Ok(())
	}

	/// Force-clear a stuck job without recording a sync.
	pub async fn reap(&self, kind: JobKind, resource_id: ResourceId) -> Result<()> {
		self.reaper.reap(kind, resource_id).await
	}

	/// Start a job now at high priority, skipping the due check.
	pub async fn trigger(&self, kind: JobKind, resource_id: ResourceId) -> Result<StartOutcome> {
		self.starter
			.try_creating_task(kind, resource_id, Some(Priority::High))
			.await
	}
}
