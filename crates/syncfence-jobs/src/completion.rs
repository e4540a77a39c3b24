// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::sync::Arc;
use syncfence_queue::{CompletionHook, FinishedTask};
use tracing::{debug, instrument, warn};

use crate::context::SyncRuntime;
use crate::error::Result;
use crate::reaper::FenceReaper;
use crate::registry;

/// Process-wide completion hook: removes finished subtasks from their
/// taskset and finalizes the job once the last one is gone.
pub struct CompletionRouter {
	rt: Arc<SyncRuntime>,
	reaper: FenceReaper,
}

impl CompletionRouter {
	pub fn new(rt: Arc<SyncRuntime>) -> Self {
		Self {
			reaper: FenceReaper::new(rt.clone()),
			rt,
		}
	}

	#[instrument(skip(self, task), fields(task_id = %task.id, name = %task.name))]
	async fn route(&self, task: &FinishedTask) -> Result<()> {
		let Some((spec, task_id)) = registry::resolve(&task.id) else {
			debug!("Not a sync task");
			return Ok(());
		};
		if !spec.is_subtask(&task.name) {
			return Ok(());
		}

		let ns = self.rt.namespace(spec.kind, task_id.resource_id);
		if !ns.taskset.remove(&task.id).await? {
			debug!("Subtask was not in the taskset");
		}

		if ns.complete.get().await?.is_some() && ns.taskset.size().await? == 0 {
			self.reaper.finalize(spec.kind, task_id.resource_id).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl CompletionHook for CompletionRouter {
	async fn on_task_finished(&self, task: &FinishedTask) {
		if let Err(e) = self.route(task).await {
			warn!(task_id = %task.id, error = %e, "Completion hook failed");
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestHarness;
	use chrono::Utc;
	use syncfence_core::{FencePayload, JobKind, ResourceId, TaskId};
	use syncfence_queue::TaskState;

	fn finished(id: &TaskId, name: &str) -> FinishedTask {
		FinishedTask {
			id: id.to_string(),
			name: name.to_string(),
			state: TaskState::Succeeded,
		}
	}

	#[tokio::test]
	async fn last_subtask_finalizes_only_after_generation_completes() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		let spec = registry::spec(JobKind::Pruning);
		let ns = h.namespace(JobKind::Pruning, ResourceId(1));
		ns.fence
			.set(&FencePayload::new(TaskId::new(JobKind::Pruning, ResourceId(1)), Utc::now()))
			.await
			.unwrap();

		let a = TaskId::new(JobKind::Pruning, ResourceId(1));
		let b = TaskId::new(JobKind::Pruning, ResourceId(1));
		ns.taskset.add(&a.to_string()).await.unwrap();
		ns.taskset.add(&b.to_string()).await.unwrap();

		let router = CompletionRouter::new(h.rt.clone());
		router.on_task_finished(&finished(&a, spec.subtask_task)).await;
		assert_eq!(ns.taskset.size().await.unwrap(), 1);

		// Taskset empty, but the generator has not written the complete marker.
		router.on_task_finished(&finished(&b, spec.subtask_task)).await;
		assert!(ns.fence.exists().await.unwrap());
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_none());

		ns.complete.set(2).await.unwrap();
		// A duplicate completion after generation finished drives finalization.
		router.on_task_finished(&finished(&b, spec.subtask_task)).await;
		assert!(!ns.fence.exists().await.unwrap());
		assert!(h.catalog.last_synced(JobKind::Pruning, ResourceId(1)).is_some());
	}

	#[tokio::test]
	async fn unrelated_tasks_are_ignored() {
		let h = TestHarness::new();
		let ns = h.namespace(JobKind::Pruning, ResourceId(1));
		let generator = TaskId::new(JobKind::Pruning, ResourceId(1));
		ns.taskset.add(&generator.to_string()).await.unwrap();

		let router = CompletionRouter::new(h.rt.clone());
		router
			.on_task_finished(&finished(&generator, registry::spec(JobKind::Pruning).generator_task))
			.await;
		router
			.on_task_finished(&FinishedTask {
				id: "not-a-sync-task".to_string(),
				name: "whatever".to_string(),
				state: TaskState::Succeeded,
			})
			.await;

		assert_eq!(ns.taskset.size().await.unwrap(), 1);
	}
}
