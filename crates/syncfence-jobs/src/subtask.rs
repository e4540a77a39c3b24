// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Subtask: apply one idempotent effect.
//!
//! Retry policy:
//! - transient errors retry in-task a few times, then re-submit with
//!   exponential backoff until the retry budget is spent
//! - once spent, fall back to removing the resource's contribution and
//!   marking the item dirty
//! - non-retryable errors are terminal
//! - the soft time limit is enforced by the worker pool and is terminal

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use syncfence_core::{JobKind, ResourceId};
use syncfence_queue::{TaskContext, TaskError, TaskHandler, TaskOutput};
use tracing::{debug, error, instrument, warn};

use crate::collaborators::{EffectError, SubtaskEffect};
use crate::context::SyncRuntime;

pub struct SubtaskHandler {
	rt: Arc<SyncRuntime>,
	kind: JobKind,
}

impl SubtaskHandler {
	pub fn new(rt: Arc<SyncRuntime>, kind: JobKind) -> Self {
		Self { rt, kind }
	}

	/// Apply the effect, retrying transient failures up to `effect_attempts`
	/// times with a jittered pause.
	async fn apply_with_retries(
		&self,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> Result<(), EffectError> {
		let attempts = self.rt.settings.effect_attempts.max(1);
		let mut attempt = 1;
		loop {
			match self
				.rt
				.documents
				.apply_subtask_effect(self.kind, resource_id, effect)
				.await
			{
				Ok(()) => return Ok(()),
				Err(e) if e.is_retryable() && attempt < attempts => {
					debug!(attempt, attempts, error = %e, "Effect failed, retrying in task");
					tokio::time::sleep(jittered(self.rt.settings.effect_retry_delay)).await;
					attempt += 1;
				}
				Err(e) => return Err(e),
			}
		}
	}

	async fn degrade(
		&self,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
		cause: &EffectError,
	) -> Result<TaskOutput, TaskError> {
		warn!(error = %cause, "Retries exhausted, removing contribution and marking dirty");
		match self
			.rt
			.documents
			.remove_contribution_and_mark_dirty(self.kind, resource_id, effect)
			.await
		{
			Ok(()) => Ok(TaskOutput {
				message: "degraded".to_string(),
				metadata: Some(serde_json::json!({ "item_id": effect.item_id(), "error": cause.to_string() })),
			}),
			Err(e) => {
				error!(error = %e, "Degraded fallback failed");
				Err(TaskError::Failed {
					message: format!("fallback failed after {cause}: {e}"),
					retryable: false,
				})
			}
		}
	}
}

fn jittered(base: Duration) -> Duration {
	let extra = base.as_millis() as u64 / 2;
	base + Duration::from_millis(fastrand::u64(0..=extra))
}

#[async_trait]
impl TaskHandler for SubtaskHandler {
	#[instrument(skip(self, ctx), fields(kind = %self.kind, task_id = %ctx.task_id(), retries = ctx.retries()))]
	async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskError> {
		let resource_id: ResourceId = ctx.kwarg("resource_id")?;
		let effect: SubtaskEffect = ctx.kwarg("effect")?;

		let ns = self.rt.namespace(self.kind, resource_id);
		match ns.stop.is_set().await {
			Ok(true) => {
				debug!("Stop fence set, skipping subtask");
				return Ok(TaskOutput::new("stopped"));
			}
			Ok(false) => {}
			Err(e) => warn!(error = %e, "Could not read stop fence"),
		}

		if ctx.cancellation_token.is_cancelled() {
			return Err(TaskError::Cancelled);
		}

		let err = match self.apply_with_retries(resource_id, &effect).await {
			Ok(()) => return Ok(TaskOutput::new("applied")),
			Err(e) => e,
		};

		if !err.is_retryable() {
			warn!(error = %err, "Subtask failed permanently");
			return Err(TaskError::Failed {
				message: err.to_string(),
				retryable: false,
			});
		}

		let next_retry = ctx.retries().saturating_add(1);
		match self.rt.settings.subtask_retry.delay_for(next_retry) {
			Some(delay) => Err(TaskError::Retry {
				delay,
				message: err.to_string(),
			}),
			None => self.degrade(resource_id, &effect, &err).await,
		}
	}
}
