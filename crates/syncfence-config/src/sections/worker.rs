// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Worker pool configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
	pub concurrency: usize,
	pub poll_interval_ms: u64,
	/// Claimed tasks older than this are handed to another worker.
	pub visibility_timeout_secs: u64,
	pub reclaim_interval_secs: u64,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		WorkerConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfigLayer {
	#[serde(default)]
	pub concurrency: Option<usize>,
	#[serde(default)]
	pub poll_interval_ms: Option<u64>,
	#[serde(default)]
	pub visibility_timeout_secs: Option<u64>,
	#[serde(default)]
	pub reclaim_interval_secs: Option<u64>,
}

impl WorkerConfigLayer {
	pub fn merge(&mut self, other: WorkerConfigLayer) {
		if other.concurrency.is_some() {
			self.concurrency = other.concurrency;
		}
		if other.poll_interval_ms.is_some() {
			self.poll_interval_ms = other.poll_interval_ms;
		}
		if other.visibility_timeout_secs.is_some() {
			self.visibility_timeout_secs = other.visibility_timeout_secs;
		}
		if other.reclaim_interval_secs.is_some() {
			self.reclaim_interval_secs = other.reclaim_interval_secs;
		}
	}

	pub fn finalize(self) -> WorkerConfig {
		WorkerConfig {
			concurrency: self.concurrency.unwrap_or(4),
			poll_interval_ms: self.poll_interval_ms.unwrap_or(500),
			visibility_timeout_secs: self.visibility_timeout_secs.unwrap_or(1800), // 30 minutes
			reclaim_interval_secs: self.reclaim_interval_secs.unwrap_or(60),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = WorkerConfig::default();
		assert_eq!(config.concurrency, 4);
		assert_eq!(config.poll_interval_ms, 500);
		assert_eq!(config.visibility_timeout_secs, 1800);
	}
}
