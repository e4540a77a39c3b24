// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;
use syncfence_core::JobKind;
use syncfence_queue::BackoffPolicy;

/// Tunables for the sync job runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
	/// Kinds the beat scheduler drives.
	pub kinds: Vec<JobKind>,
	/// Kinds that may only run on one resource at a time.
	pub exclusive_kinds: Vec<JobKind>,
	pub tenant_id: Option<String>,

	pub beat_lock_ttl: Duration,
	pub beat_time_limit: Duration,

	pub starter_lock_ttl: Duration,
	pub starter_lock_timeout: Duration,

	pub generator_lock_ttl: Duration,
	/// How long a generator waits for the starter's fence write.
	pub fence_wait_timeout: Duration,
	pub fence_poll_interval: Duration,
	/// Generator stop-fence check and lock renewal cadence.
	pub heartbeat_interval: Duration,

	/// Fences older than this without progress are swept by the monitor.
	pub max_job_lifetime: Duration,

	pub subtask_retry: BackoffPolicy,
	pub subtask_soft_time_limit: Duration,
	/// Attempts of the in-task retry wrapper around one effect.
	pub effect_attempts: u32,
	pub effect_retry_delay: Duration,
}

impl Default for SyncSettings {
	fn default() -> Self {
		Self {
			kinds: JobKind::ALL.to_vec(),
			exclusive_kinds: Vec::new(),
			tenant_id: None,
			beat_lock_ttl: Duration::from_secs(120),
			beat_time_limit: Duration::from_secs(300),
			starter_lock_ttl: Duration::from_secs(30),
			starter_lock_timeout: Duration::from_secs(10),
			generator_lock_ttl: Duration::from_secs(300),
			fence_wait_timeout: Duration::from_secs(60),
			fence_poll_interval: Duration::from_secs(1),
			heartbeat_interval: Duration::from_secs(5),
			max_job_lifetime: Duration::from_secs(6 * 60 * 60),
			subtask_retry: BackoffPolicy::default(),
			subtask_soft_time_limit: Duration::from_secs(105),
			effect_attempts: 3,
			effect_retry_delay: Duration::from_secs(1),
		}
	}
}
