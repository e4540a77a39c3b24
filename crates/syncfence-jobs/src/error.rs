// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use syncfence_core::{CoreError, JobKind, ResourceId, ResourceStatus, TaskId};
use syncfence_kv::KvError;
use syncfence_queue::QueueError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
	#[error("kv error: {0}")]
	Kv(#[from] KvError),

	#[error("queue error: {0}")]
	Queue(#[from] QueueError),

	#[error(transparent)]
	Core(#[from] CoreError),

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("{kind} resource {resource_id} not found")]
	ResourceNotFound { kind: JobKind, resource_id: ResourceId },

	#[error("{kind} resource {resource_id} is not admissible in status {status}")]
	ResourceNotAdmissible {
		kind: JobKind,
		resource_id: ResourceId,
		status: ResourceStatus,
	},

	#[error("fence for task {task_id} did not appear")]
	FenceNotReady { task_id: TaskId },

	#[error("lock {key} unavailable")]
	LockUnavailable { key: String },

	#[error("lock {key} lost")]
	LockLost { key: String },

	#[error("{kind} job for resource {resource_id} was stopped")]
	Stopped { kind: JobKind, resource_id: ResourceId },

	#[error("collaborator error: {0}")]
	Collaborator(String),
}

impl SyncError {
	/// Whether the error came from the coordinator store, the queue or the
	/// database rather than from job logic.
	pub fn is_infrastructure(&self) -> bool {
		matches!(
			self,
			SyncError::Kv(_) | SyncError::Queue(_) | SyncError::Database(_)
		)
	}
}
