// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

/// Exponential retry schedule: `base * factor^(retry - 1)`, capped at
/// `max_delay`, for at most `max_retries` retries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
	pub base: Duration,
	pub factor: f64,
	pub max_delay: Duration,
	pub max_retries: u32,
}

impl Default for BackoffPolicy {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(16),
			factor: 2.0,
			max_delay: Duration::from_secs(600),
			max_retries: 3,
		}
	}
}

impl BackoffPolicy {
	/// Delay before retry number `retry_count` (1-based), or `None` once the
	/// retry budget is spent.
	pub fn delay_for(&self, retry_count: u32) -> Option<Duration> {
		if retry_count == 0 || retry_count > self.max_retries {
			return None;
		}
		Some(calculate_backoff_delay(
			self.base,
			self.factor,
			self.max_delay,
			retry_count,
		))
	}
}

pub fn calculate_backoff_delay(base: Duration, factor: f64, max_delay: Duration, retry_count: u32) -> Duration {
	let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
	let secs = base.as_secs_f64() * factor.powi(exponent);
	if !secs.is_finite() || secs >= max_delay.as_secs_f64() {
		return max_delay;
	}
	Duration::from_secs_f64(secs)
}
