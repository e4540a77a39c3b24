// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fence payload stored while a job is in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task_id::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FencePayload {
	/// When the job starter submitted the generator.
	pub started_at: DateTime<Utc>,
	/// Queue id of the generator task that owns this fence.
	pub external_task_id: TaskId,
	/// Set by the generator once it begins enumerating work.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub generator_started_at: Option<DateTime<Utc>>,
	/// Total subtasks submitted, once generation completes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub expected_count: Option<u64>,
}

impl FencePayload {
	pub fn new(external_task_id: TaskId, started_at: DateTime<Utc>) -> Self {
		Self {
			started_at,
			external_task_id,
			generator_started_at: None,
			expected_count: None,
		}
	}

	/// Age of the fence relative to `now`.
	pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
		now - self.started_at
	}
}
