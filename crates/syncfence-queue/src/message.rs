// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Queue priority tier. Higher tiers are always dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Low,
	Medium,
	High,
}

impl Priority {
	pub fn as_i64(&self) -> i64 {
		match self {
			Priority::Low => 0,
			Priority::Medium => 1,
			Priority::High => 2,
		}
	}

	pub fn from_i64(value: i64) -> Priority {
		match value {
			i64::MIN..=0 => Priority::Low,
			1 => Priority::Medium,
			_ => Priority::High,
		}
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Priority::Low => "low",
			Priority::Medium => "medium",
			Priority::High => "high",
		};
		f.write_str(s)
	}
}

impl FromStr for Priority {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"low" => Ok(Priority::Low),
			"medium" => Ok(Priority::Medium),
			"high" => Ok(Priority::High),
			other => Err(format!("unknown priority: {other}")),
		}
	}
}

/// A unit of work on the shared queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
	/// Caller-chosen id. Retries reuse it.
	pub id: String,
	/// Handler name the worker dispatches on.
	pub name: String,
	pub queue: String,
	pub priority: Priority,
	pub kwargs: serde_json::Value,
	/// How many times this message has been re-submitted for retry.
	pub retries: u32,
	pub soft_time_limit: Option<Duration>,
}

impl TaskMessage {
	pub fn new(id: impl Into<String>, name: impl Into<String>, queue: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			queue: queue.into(),
			priority: Priority::Medium,
			kwargs: serde_json::Value::Object(Default::default()),
			retries: 0,
			soft_time_limit: None,
		}
	}

	pub fn with_priority(mut self, priority: Priority) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_kwargs(mut self, kwargs: serde_json::Value) -> Self {
		self.kwargs = kwargs;
		self
	}

	pub fn with_soft_time_limit(mut self, limit: Option<Duration>) -> Self {
		self.soft_time_limit = limit;
		self
	}

	/// The same message, marked as one retry further along.
	pub fn next_attempt(&self) -> Self {
		Self {
			retries: self.retries.saturating_add(1),
			..self.clone()
		}
	}
}

/// A claimed message. Pass it back to [`crate::TaskQueue::ack`] once handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
	pub message: TaskMessage,
	pub receipt: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn priority_order() {
		assert!(Priority::High > Priority::Medium);
		assert!(Priority::Medium > Priority::Low);
		for p in [Priority::Low, Priority::Medium, Priority::High] {
			assert_eq!(Priority::from_i64(p.as_i64()), p);
			assert_eq!(p.to_string().parse::<Priority>().unwrap(), p);
		}
		assert!("urgent".parse::<Priority>().is_err());
	}

	#[test]
	fn next_attempt_keeps_identity() {
		let msg = TaskMessage::new("id-1", "t", "q").with_priority(Priority::High);
		let next = msg.next_attempt();
		assert_eq!(next.id, "id-1");
		assert_eq!(next.priority, Priority::High);
		assert_eq!(next.retries, 1);
	}
}
