// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Closed table of job kinds.
//!
//! Everything kind-specific that the starter, generator, subtask and
//! completion hook need is looked up here. Adding a kind is one entry.

use chrono::{DateTime, Utc};
use syncfence_core::{JobKind, Resource, ResourceStatus, TaskId};
use syncfence_queue::Priority;

/// Which resource statuses a kind may start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
	RejectDeleting,
	RequireDeleting,
	Any,
}

/// When the beat scheduler considers a resource due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueRule {
	/// Active, has a period, and the period has elapsed since the last sync
	/// (or since creation).
	Periodic,
	/// Marked for deletion.
	Deleting,
	/// Flagged with pending changes.
	NeedsSync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindSpec {
	pub kind: JobKind,
	pub generator_task: &'static str,
	pub subtask_task: &'static str,
	pub queue: &'static str,
	pub generator_priority: Priority,
	pub subtask_priority: Priority,
	pub admission: Admission,
	pub due: DueRule,
}

static REGISTRY: [KindSpec; 4] = [
	KindSpec {
		kind: JobKind::Pruning,
		generator_task: "connector_pruning_generator_task",
		subtask_task: "prune_document_task",
		queue: "connector_pruning",
		generator_priority: Priority::Medium,
		subtask_priority: Priority::Low,
		admission: Admission::RejectDeleting,
		due: DueRule::Periodic,
	},
	KindSpec {
		kind: JobKind::ConnectorDeletion,
		generator_task: "connector_deletion_generator_task",
		subtask_task: "delete_connector_document_task",
		queue: "connector_deletion",
		generator_priority: Priority::Medium,
		subtask_priority: Priority::Medium,
		admission: Admission::RequireDeleting,
		due: DueRule::Deleting,
	},
	KindSpec {
		kind: JobKind::ExternalGroupSync,
		generator_task: "external_group_sync_generator_task",
		subtask_task: "sync_external_group_task",
		queue: "external_group_sync",
		generator_priority: Priority::Medium,
		subtask_priority: Priority::Medium,
		admission: Admission::RejectDeleting,
		due: DueRule::Periodic,
	},
	KindSpec {
		kind: JobKind::DocumentSetSync,
		generator_task: "document_set_sync_generator_task",
		subtask_task: "sync_document_set_member_task",
		queue: "document_set_sync",
		generator_priority: Priority::Medium,
		subtask_priority: Priority::Medium,
		admission: Admission::Any,
		due: DueRule::NeedsSync,
	},
];

pub fn all() -> &'static [KindSpec] {
	&REGISTRY
}

pub fn spec(kind: JobKind) -> &'static KindSpec {
	match kind {
		JobKind::Pruning => &REGISTRY[0],
		JobKind::ConnectorDeletion => &REGISTRY[1],
		JobKind::ExternalGroupSync => &REGISTRY[2],
		JobKind::DocumentSetSync => &REGISTRY[3],
	}
}

/// Resolve a finished task id to its kind entry. `None` for ids that are not
/// sync tasks.
pub fn resolve(task_id: &str) -> Option<(&'static KindSpec, TaskId)> {
	let id = TaskId::parse(task_id).ok()?;
	Some((spec(id.kind), id))
}

/// Every queue name the registry submits to, deduplicated.
pub fn queue_names() -> Vec<String> {
	let mut names: Vec<String> = REGISTRY.iter().map(|s| s.queue.to_string()).collect();
	names.sort();
	names.dedup();
	names
}

impl KindSpec {
	pub fn admits(&self, resource: &Resource) -> bool {
		match self.admission {
			Admission::RejectDeleting => resource.status != ResourceStatus::Deleting,
			Admission::RequireDeleting => resource.status == ResourceStatus::Deleting,
			Admission::Any => true,
		}
	}

	pub fn is_due(&self, resource: &Resource, now: DateTime<Utc>) -> bool {
		match self.due {
			DueRule::Periodic => {
				resource.status == ResourceStatus::Active
					&& resource.next_sync_due().is_some_and(|due| now >= due)
			}
			DueRule::Deleting => resource.status == ResourceStatus::Deleting,
			DueRule::NeedsSync => resource.needs_sync,
		}
	}

	pub fn is_subtask(&self, task_name: &str) -> bool {
		self.subtask_task == task_name
	}
}
