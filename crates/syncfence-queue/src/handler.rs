// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::context::TaskContext;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
	pub message: String,
	pub metadata: Option<serde_json::Value>,
}

impl TaskOutput {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			metadata: None,
		}
	}
}

#[derive(Debug, Error)]
pub enum TaskError {
	/// Resubmit the same message after `delay`. The completion hook does not
	/// fire for this attempt.
	#[error("retry in {delay:?}: {message}")]
	Retry { delay: Duration, message: String },

	/// Terminal unless `retryable`, in which case the pool applies its own
	/// backoff policy.
	#[error("task failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("soft time limit exceeded")]
	TimeLimitExceeded,

	/// The task did not run to completion because the pool is shutting down.
	/// The message goes back on the queue unchanged.
	#[error("task cancelled")]
	Cancelled,
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
	async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError>;
}

/// How a delivered task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
	Succeeded,
	Failed { message: String },
	TimeLimitExceeded,
	/// Put back for redelivery; not a terminal state.
	Cancelled,
	/// Re-submitted; not a terminal state.
	Retrying { retries: u32, delay: Duration },
}

impl TaskState {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, TaskState::Retrying { .. } | TaskState::Cancelled)
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedTask {
	pub id: String,
	pub name: String,
	pub state: TaskState,
}

/// Called once after every task that reaches a terminal state.
///
/// Implementations must not fail: anything that goes wrong is logged inside
/// the hook.
#[async_trait]
pub trait CompletionHook: Send + Sync {
	async fn on_task_finished(&self, task: &FinishedTask);
}
