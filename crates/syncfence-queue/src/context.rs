// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;

use crate::handler::TaskError;
use crate::message::TaskMessage;

/// What a handler sees of the message it is running.
pub struct TaskContext {
	pub message: TaskMessage,
	/// Fires when the worker pool shuts down.
	pub cancellation_token: CancellationToken,
}

impl TaskContext {
	pub fn new(message: TaskMessage, cancellation_token: CancellationToken) -> Self {
		Self {
			message,
			cancellation_token,
		}
	}

	pub fn task_id(&self) -> &str {
		&self.message.id
	}

	pub fn retries(&self) -> u32 {
		self.message.retries
	}

	/// Deserialize one keyword argument. A missing or malformed argument is a
	/// non-retryable failure: resubmitting the same message cannot fix it.
	pub fn kwarg<T: DeserializeOwned>(&self, key: &str) -> Result<T, TaskError> {
		let value = self.message.kwargs.get(key).ok_or_else(|| TaskError::Failed {
			message: format!("missing kwarg {key}"),
			retryable: false,
		})?;
		serde_json::from_value(value.clone()).map_err(|e| TaskError::Failed {
			message: format!("invalid kwarg {key}: {e}"),
			retryable: false,
		})
	}

	/// Like [`TaskContext::kwarg`] but absent or null arguments become `None`.
	pub fn optional_kwarg<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, TaskError> {
		match self.message.kwargs.get(key) {
			None | Some(serde_json::Value::Null) => Ok(None),
			Some(_) => self.kwarg(key).map(Some),
		}
	}
}
