// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fence cleanup and the fence monitor.

use chrono::Utc;
use std::sync::Arc;
use syncfence_core::{JobKind, ResourceId};
use tracing::{debug, info, instrument, warn};

use crate::context::SyncRuntime;
use crate::error::Result;

/// What one monitor pass over a kind's fences did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
	pub finalized: usize,
	pub swept: usize,
	pub active: usize,
}

#[derive(Clone)]
pub struct FenceReaper {
	rt: Arc<SyncRuntime>,
}

impl FenceReaper {
	pub fn new(rt: Arc<SyncRuntime>) -> Self {
		Self { rt }
	}

	/// Delete every job key for the resource without recording a sync.
	#[instrument(skip(self), fields(kind = %kind, resource_id = %resource_id))]
	pub async fn reap(&self, kind: JobKind, resource_id: ResourceId) -> Result<()> {
		self.rt.namespace(kind, resource_id).reset().await?;
		info!("Reaped job keys");
		Ok(())
	}

	/// Record a finished job and clear its keys. Returns false when nothing
	/// was recorded: the fence was already gone (someone else finalized
	/// first) or the job was stopped, in which case the keys are cleared only.
	#[instrument(skip(self), fields(kind = %kind, resource_id = %resource_id))]
	pub async fn finalize(&self, kind: JobKind, resource_id: ResourceId) -> Result<bool> {
		let ns = self.rt.namespace(kind, resource_id);
		let Some(fence) = ns.fence.get().await? else {
			debug!("Fence already cleared");
			return Ok(false);
		};
		if ns.stop.is_set().await? {
			ns.reset().await?;
			info!(task_id = %fence.external_task_id, "Stopped job drained, not recording a sync");
			return Ok(false);
		}

		self.rt
			.resources
			.mark_resource_synced(kind, resource_id, Utc::now())
			.await?;
		ns.reset().await?;

		info!(
			task_id = %fence.external_task_id,
			expected_count = fence.expected_count.unwrap_or(0),
			elapsed_secs = fence.age(Utc::now()).num_seconds(),
			"Sync job finished"
		);
		Ok(true)
	}

	/// Finalize drained jobs and sweep fences that outlived
	/// `max_job_lifetime` without a live generator.
	#[instrument(skip(self), fields(kind = %kind))]
	pub async fn monitor_pass(&self, kind: JobKind) -> Result<MonitorReport> {
		let mut report = MonitorReport::default();
		let max_age = chrono::Duration::from_std(self.rt.settings.max_job_lifetime)
			.unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

		let keys = self
			.rt
			.store
			.keys_with_prefix(&self.rt.keys.fence_prefix(kind))
			.await?;

		for key in keys {
			let Some(resource_id) = self.rt.keys.resource_from_fence_key(kind, &key) else {
				warn!(key = %key, "Unparseable fence key");
				continue;
			};
			let ns = self.rt.namespace(kind, resource_id);
			let Some(fence) = ns.fence.get().await? else {
				continue;
			};

			let complete = ns.complete.get().await?.is_some();
			let remaining = ns.taskset.size().await?;

			if complete && remaining == 0 {
				if self.finalize(kind, resource_id).await? {
					report.finalized += 1;
				}
				continue;
			}

			if fence.age(Utc::now()) > max_age && !ns.generator_running().await? {
				warn!(
					resource_id = %resource_id,
					task_id = %fence.external_task_id,
					remaining,
					complete,
					"Sweeping job that exceeded its lifetime"
				);
				ns.reset().await?;
				report.swept += 1;
				continue;
			}

			report.active += 1;
		}

		if report != MonitorReport::default() {
			debug!(?report, "Fence monitor pass");
		}
		Ok(report)
	}
}
