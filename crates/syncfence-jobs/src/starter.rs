// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Job admission: check, submit the generator, then fence.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use syncfence_core::{FencePayload, JobKind, ResourceId, ResourceStatus, TaskId};
use syncfence_kv::SyncNamespace;
use syncfence_queue::{Priority, TaskMessage};
use tracing::{debug, info, instrument};

use crate::context::SyncRuntime;
use crate::error::Result;
use crate::guard::with_held_lock;
use crate::registry::{self, KindSpec};

/// Why a start request was a no-op. None of these are errors: the next beat
/// tick tries again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
	/// Another resource already runs a job of this exclusive kind.
	KindBusy,
	AlreadyRunning,
	ResourceMissing,
	NotAdmissible(ResourceStatus),
	Stopped,
	/// Another starter held the per-resource lock past the timeout.
	LockTimeout,
}

impl fmt::Display for SkipReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SkipReason::KindBusy => f.write_str("another job of this kind is running"),
			SkipReason::AlreadyRunning => f.write_str("already running"),
			SkipReason::ResourceMissing => f.write_str("resource not found"),
			SkipReason::NotAdmissible(status) => write!(f, "resource status {status} not admissible"),
			SkipReason::Stopped => f.write_str("stop fence set"),
			SkipReason::LockTimeout => f.write_str("starter lock busy"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
	Started { task_id: TaskId },
	Skipped(SkipReason),
}

impl StartOutcome {
	pub fn is_started(&self) -> bool {
		matches!(self, StartOutcome::Started { .. })
	}
}

#[derive(Clone)]
pub struct JobStarter {
	rt: Arc<SyncRuntime>,
}

impl JobStarter {
	pub fn new(rt: Arc<SyncRuntime>) -> Self {
		Self { rt }
	}

	/// Start a `kind` job for `resource_id` unless one is running or the
	/// resource is not admissible. Only infrastructure failures are errors.
	#[instrument(skip(self), fields(kind = %kind, resource_id = %resource_id))]
	pub async fn try_creating_task(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		priority: Option<Priority>,
	) -> Result<StartOutcome> {
		let settings = &self.rt.settings;
		let spec = registry::spec(kind);
		let ns = self.rt.namespace(kind, resource_id);

		if !settings.exclusive_kinds.contains(&kind) {
			return self.start_with_resource_lock(spec, &ns, priority).await;
		}

		// The kind-wide fence scan and the fence write must not interleave
		// with another resource's admission.
		let kind_lock = self.rt.kind_starter_lock(kind);
		if !kind_lock.acquire(true, settings.starter_lock_timeout).await? {
			debug!("Kind starter lock busy");
			return Ok(StartOutcome::Skipped(SkipReason::LockTimeout));
		}
		with_held_lock(&kind_lock, || self.start_with_resource_lock(spec, &ns, priority)).await
	}

	async fn start_with_resource_lock(
		&self,
		spec: &'static KindSpec,
		ns: &SyncNamespace,
		priority: Option<Priority>,
	) -> Result<StartOutcome> {
		let settings = &self.rt.settings;
		let lock = ns.starter_lock(settings.starter_lock_ttl);
		if !lock.acquire(true, settings.starter_lock_timeout).await? {
			debug!("Starter lock busy");
			return Ok(StartOutcome::Skipped(SkipReason::LockTimeout));
		}
		with_held_lock(&lock, || self.start_locked(spec, ns, priority)).await
	}

	async fn start_locked(
		&self,
		spec: &'static KindSpec,
		ns: &SyncNamespace,
		priority: Option<Priority>,
	) -> Result<StartOutcome> {
		let kind = spec.kind;
		let resource_id = ns.resource_id;

		if let Some(reason) = self.check_admission(spec, ns).await? {
			debug!(reason = %reason, "Not starting job");
			return Ok(StartOutcome::Skipped(reason));
		}

		ns.clear_leftovers().await?;

		let task_id = TaskId::new(kind, resource_id);
		let message = TaskMessage::new(task_id.to_string(), spec.generator_task, spec.queue)
			.with_priority(priority.unwrap_or(spec.generator_priority))
			.with_kwargs(self.rt.base_kwargs(resource_id));
		self.rt.queue.submit(message).await?;

		// Only after the generator is on the queue: a failed submission must
		// not leave a fence behind.
		ns.fence.set(&FencePayload::new(task_id, Utc::now())).await?;

		info!(task_id = %task_id, "Started sync job");
		Ok(StartOutcome::Started { task_id })
	}

	async fn check_admission(&self, spec: &KindSpec, ns: &SyncNamespace) -> Result<Option<SkipReason>> {
		let kind = spec.kind;

		if self.rt.settings.exclusive_kinds.contains(&kind) {
			let fences = self
				.rt
				.store
				.keys_with_prefix(&self.rt.keys.fence_prefix(kind))
				.await?;
			if !fences.is_empty() {
				return Ok(Some(SkipReason::KindBusy));
			}
		}

		if ns.fence.exists().await? {
			return Ok(Some(SkipReason::AlreadyRunning));
		}

		let resource = match self.rt.resources.get_resource(kind, ns.resource_id).await? {
			Some(resource) => resource,
			None => return Ok(Some(SkipReason::ResourceMissing)),
		};
		if !spec.admits(&resource) {
			return Ok(Some(SkipReason::NotAdmissible(resource.status)));
		}

		if ns.stop.is_set().await? {
			return Ok(Some(SkipReason::Stopped));
		}

		Ok(None)
	}
}
