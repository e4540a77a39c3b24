// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Generator task: plan the work set and fan it out as subtasks.
//!
//! For every unit the subtask id goes into the taskset strictly before the
//! subtask is submitted, so a subtask can never finish (and be removed) before
//! it was counted. On any failure every job key is deleted and the error is
//! surfaced; on success the fence stays until the taskset drains.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use syncfence_core::{FencePayload, JobKind, Resource, ResourceId, TaskId};
use syncfence_kv::{KvLock, SyncNamespace};
use syncfence_queue::{TaskContext, TaskError, TaskHandler, TaskMessage, TaskOutput};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::SubtaskEffect;
use crate::context::SyncRuntime;
use crate::error::{Result, SyncError};
use crate::guard::{run_with_cleanup, with_held_lock};
use crate::reaper::FenceReaper;
use crate::registry::{self, KindSpec};

pub struct GeneratorHandler {
	rt: Arc<SyncRuntime>,
	reaper: FenceReaper,
	kind: JobKind,
}

impl GeneratorHandler {
	pub fn new(rt: Arc<SyncRuntime>, kind: JobKind) -> Self {
		Self {
			reaper: FenceReaper::new(rt.clone()),
			rt,
			kind,
		}
	}

	/// Run one generation for `task_id`. Returns the number of subtasks
	/// submitted.
	#[instrument(skip(self), fields(kind = %self.kind, task_id = %task_id))]
	pub async fn generate(&self, task_id: TaskId) -> Result<u64> {
		let ns = self.rt.namespace(self.kind, task_id.resource_id);

		// Not ours until the starter's fence names this task: abort without
		// touching any key.
		self.wait_for_fence(&ns, task_id).await?;

		let lock = ns.generator_lock(self.rt.settings.generator_lock_ttl);
		// Another delivery of this task already owns the job: leave its keys.
		if !lock
			.acquire(true, self.rt.settings.starter_lock_timeout)
			.await?
		{
			warn!("Generator lock held by another run");
			return Err(SyncError::LockUnavailable {
				key: lock.key().to_string(),
			});
		}

		run_with_cleanup(
			with_held_lock(&lock, || self.generate_locked(&ns, &lock, task_id)),
			|| async {
				warn!("Rolling back failed generation");
				ns.reset().await.map_err(SyncError::from)
			},
		)
		.await
	}

	async fn wait_for_fence(&self, ns: &SyncNamespace, task_id: TaskId) -> Result<FencePayload> {
		let settings = &self.rt.settings;
		let deadline = Instant::now() + settings.fence_wait_timeout;
		loop {
			match ns.fence.get().await? {
				Some(fence) if fence.external_task_id == task_id => return Ok(fence),
				Some(fence) => {
					warn!(owner = %fence.external_task_id, "Fence belongs to another task");
					return Err(SyncError::FenceNotReady { task_id });
				}
				None => {}
			}
			if Instant::now() >= deadline {
				warn!("Fence never appeared");
				return Err(SyncError::FenceNotReady { task_id });
			}
			tokio::time::sleep(settings.fence_poll_interval).await;
		}
	}

	async fn generate_locked(&self, ns: &SyncNamespace, lock: &KvLock, task_id: TaskId) -> Result<u64> {
		let spec = registry::spec(self.kind);
		let resource_id = task_id.resource_id;

		let resource = self
			.rt
			.resources
			.get_resource(self.kind, resource_id)
			.await?
			.ok_or(SyncError::ResourceNotFound {
				kind: self.kind,
				resource_id,
			})?;
		if !spec.admits(&resource) {
			return Err(SyncError::ResourceNotAdmissible {
				kind: self.kind,
				resource_id,
				status: resource.status,
			});
		}

		let mut fence = ns
			.fence
			.get()
			.await?
			.ok_or(SyncError::FenceNotReady { task_id })?;
		fence.generator_started_at = Some(Utc::now());
		ns.fence.set(&fence).await?;

		let effects = self.plan(&resource).await?;
		info!(planned = effects.len(), "Generating subtasks");

		let mut last_heartbeat = Instant::now();
		self.heartbeat(ns, lock).await?;

		let mut submitted: u64 = 0;
		for effect in effects {
			if last_heartbeat.elapsed() >= self.rt.settings.heartbeat_interval {
				self.heartbeat(ns, lock).await?;
				last_heartbeat = Instant::now();
			}

			let subtask_id = TaskId::new(self.kind, resource_id).to_string();
			ns.taskset.add(&subtask_id).await?;
			self.rt
				.queue
				.submit(self.subtask_message(spec, resource_id, &subtask_id, &effect)?)
				.await?;
			ns.progress.incr_by(1).await?;
			submitted += 1;
		}

		// Expected count goes on the fence before the complete marker: once the
		// marker exists the completion hook may finalize and delete the fence.
		fence.expected_count = Some(submitted);
		ns.fence.set(&fence).await?;
		ns.complete.set(i64::try_from(submitted).unwrap_or(i64::MAX)).await?;

		info!(submitted, "Generation complete");

		if ns.taskset.size().await? == 0 {
			self.reaper.finalize(self.kind, resource_id).await?;
		}
		Ok(submitted)
	}

	/// Stop-fence check and generator lock renewal.
	async fn heartbeat(&self, ns: &SyncNamespace, lock: &KvLock) -> Result<()> {
		if ns.stop.is_set().await? {
			info!("Stop fence set, aborting generation");
			return Err(SyncError::Stopped {
				kind: self.kind,
				resource_id: ns.resource_id,
			});
		}
		if !lock.reacquire().await? {
			return Err(SyncError::LockLost {
				key: lock.key().to_string(),
			});
		}
		Ok(())
	}

	fn subtask_message(
		&self,
		spec: &KindSpec,
		resource_id: ResourceId,
		subtask_id: &str,
		effect: &SubtaskEffect,
	) -> Result<TaskMessage> {
		let mut kwargs = self.rt.base_kwargs(resource_id);
		if let Some(map) = kwargs.as_object_mut() {
			map.insert("effect".to_string(), serde_json::to_value(effect)?);
		}
		Ok(TaskMessage::new(subtask_id, spec.subtask_task, spec.queue)
			.with_priority(spec.subtask_priority)
			.with_soft_time_limit(Some(self.rt.settings.subtask_soft_time_limit))
			.with_kwargs(kwargs))
	}

	/// The full unit-of-work set for one run, in a stable order.
	async fn plan(&self, resource: &Resource) -> Result<Vec<SubtaskEffect>> {
		let effects = match self.kind {
			JobKind::Pruning => {
				let local = self.rt.documents.document_ids(self.kind, resource).await?;
				let current = self.rt.connectors.enumerate_current_ids(resource).await?;
				debug!(local = local.len(), current = current.len(), "Computing stale documents");
				sorted(local.difference(&current).cloned().collect())
					.into_iter()
					.map(|document_id| SubtaskEffect::RemoveDocument { document_id })
					.collect()
			}
			JobKind::ConnectorDeletion => {
				let local = self.rt.documents.document_ids(self.kind, resource).await?;
				sorted(local)
					.into_iter()
					.map(|document_id| SubtaskEffect::RemoveDocument { document_id })
					.collect()
			}
			JobKind::ExternalGroupSync => {
				let mut groups = self.rt.connectors.enumerate_external_groups(resource).await?;
				groups.sort_by(|a, b| a.id.cmp(&b.id));
				groups
					.into_iter()
					.map(|group| SubtaskEffect::UpsertExternalGroup { group })
					.collect()
			}
			JobKind::DocumentSetSync => {
				let members = self.rt.documents.document_ids(self.kind, resource).await?;
				sorted(members)
					.into_iter()
					.map(|document_id| SubtaskEffect::SyncDocumentSetMembership { document_id })
					.collect()
			}
		};
		Ok(effects)
	}
}

fn sorted(ids: HashSet<String>) -> Vec<String> {
	let mut ids: Vec<String> = ids.into_iter().collect();
	ids.sort();
	ids
}

#[async_trait]
impl TaskHandler for GeneratorHandler {
	async fn run(&self, ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
		let task_id = TaskId::parse(ctx.task_id()).map_err(|e| TaskError::Failed {
			message: e.to_string(),
			retryable: false,
		})?;

		// Generators are never retried by the queue: the next beat tick starts
		// a fresh run once the keys are clean.
		let submitted = self.generate(task_id).await.map_err(|e| TaskError::Failed {
			message: e.to_string(),
			retryable: false,
		})?;

		Ok(TaskOutput {
			message: format!("submitted {submitted} subtasks"),
			metadata: Some(serde_json::json!({ "submitted": submitted })),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::starter::StartOutcome;
	use crate::testing::TestHarness;
	use std::time::Duration;
	use syncfence_core::{ResourceStatus, ResourceType};
	use syncfence_queue::TaskState;

	async fn start(h: &TestHarness, kind: JobKind, id: i64) -> TaskId {
		match h
			.starter()
			.try_creating_task(kind, ResourceId(id), None)
			.await
			.unwrap()
		{
			StartOutcome::Started { task_id } => task_id,
			other => panic!("job not started: {other:?}"),
		}
	}

	#[tokio::test]
	async fn pruning_removes_only_stale_documents() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a", "b", "c"]);
		h.catalog.set_external_ids(ResourceId(1), &["a"]);

		start(&h, JobKind::Pruning, 1).await;
		assert_eq!(h.drain().await, 3);

		assert_eq!(h.catalog.documents(ResourceId(1)), vec!["a".to_string()]);
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_some());
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
	}

	#[tokio::test]
	async fn empty_work_set_finalizes_immediately() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a"]);
		h.catalog.set_external_ids(ResourceId(1), &["a"]);

		let task_id = start(&h, JobKind::Pruning, 1).await;
		let generator = GeneratorHandler::new(h.rt.clone(), JobKind::Pruning);
		assert_eq!(generator.generate(task_id).await.unwrap(), 0);
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_some());
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
	}

	#[tokio::test]
	async fn foreign_fence_is_left_alone() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		let owner = start(&h, JobKind::Pruning, 1).await;

		let stray = TaskId::new(JobKind::Pruning, ResourceId(1));
		let generator = GeneratorHandler::new(h.rt.clone(), JobKind::Pruning);
		assert!(matches!(
			generator.generate(stray).await,
			Err(SyncError::FenceNotReady { .. })
		));

		let fence = h
			.namespace(JobKind::Pruning, ResourceId(1))
			.fence
			.get()
			.await
			.unwrap()
			.unwrap();
		assert_eq!(fence.external_task_id, owner);
	}

	#[tokio::test]
	async fn duplicate_delivery_keeps_the_live_job() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a"]);
		let task_id = start(&h, JobKind::Pruning, 1).await;

		let ns = h.namespace(JobKind::Pruning, ResourceId(1));
		let live = ns.generator_lock(h.rt.settings.generator_lock_ttl);
		assert!(live.acquire(false, Duration::ZERO).await.unwrap());
		ns.taskset.add("in-flight").await.unwrap();

		let generator = GeneratorHandler::new(h.rt.clone(), JobKind::Pruning);
		assert!(matches!(
			generator.generate(task_id).await,
			Err(SyncError::LockUnavailable { .. })
		));

		let fence = ns.fence.get().await.unwrap().unwrap();
		assert_eq!(fence.external_task_id, task_id);
		assert_eq!(ns.taskset.size().await.unwrap(), 1);
		assert!(ns.generator_running().await.unwrap());
		assert!(!h
			.starter()
			.try_creating_task(JobKind::Pruning, ResourceId(1), None)
			.await
			.unwrap()
			.is_started());
	}

	#[tokio::test]
	async fn missing_fence_times_out_without_side_effects() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		let generator = GeneratorHandler::new(h.rt.clone(), JobKind::Pruning);

		let result = generator
			.generate(TaskId::new(JobKind::Pruning, ResourceId(1)))
			.await;
		assert!(matches!(result, Err(SyncError::FenceNotReady { .. })));
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
	}

	#[tokio::test]
	async fn stop_fence_aborts_and_rolls_back() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a", "b"]);

		start(&h, JobKind::Pruning, 1).await;
		h.admin()
			.stop_job(JobKind::Pruning, ResourceId(1), None)
			.await
			.unwrap();
		h.drain().await;

		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
		assert_eq!(h.catalog.documents(ResourceId(1)).len(), 2);
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn generator_lock_expiring_mid_generation_rolls_back() {
		let h = TestHarness::with_settings(crate::settings::SyncSettings {
			generator_lock_ttl: Duration::from_secs(2),
			heartbeat_interval: Duration::from_secs(1),
			..crate::testing::test_settings()
		});
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a", "b", "c"]);
		h.catalog.slow_down(Duration::from_secs(5));

		start(&h, JobKind::Pruning, 1).await;
		let finished = h.pool.process_next().await.unwrap().unwrap();
		assert!(
			matches!(&finished.state, TaskState::Failed { message } if message.contains("lock")),
			"unexpected state {:?}",
			finished.state
		);

		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
		assert_eq!(h.drain().await, 0);
		assert_eq!(h.catalog.documents(ResourceId(1)).len(), 3);
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_none());
	}

	#[tokio::test]
	async fn resource_changed_after_admission_rolls_back() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a"]);

		start(&h, JobKind::Pruning, 1).await;
		h.catalog.set_status(
			ResourceType::ConnectorCredentialPair,
			ResourceId(1),
			ResourceStatus::Deleting,
		);
		h.drain().await;

		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
		assert_eq!(h.catalog.documents(ResourceId(1)), vec!["a".to_string()]);
	}

	#[tokio::test]
	async fn fence_records_generation_progress() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_documents(ResourceId(1), &["a", "b", "c"]);

		start(&h, JobKind::Pruning, 1).await;
		// Run only the generator.
		h.pool.process_next().await.unwrap().unwrap();

		let ns = h.namespace(JobKind::Pruning, ResourceId(1));
		let fence = ns.fence.get().await.unwrap().unwrap();
		assert!(fence.generator_started_at.is_some());
		assert_eq!(fence.expected_count, Some(3));
		assert_eq!(ns.progress.get().await.unwrap(), Some(3));
		assert_eq!(ns.complete.get().await.unwrap(), Some(3));
		assert_eq!(ns.taskset.size().await.unwrap(), 3);
		assert!(!ns.generator_running().await.unwrap());
	}
}
