// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;
use syncfence_config::SyncConfig;
use syncfence_jobs::SyncSettings;
use syncfence_queue::{BackoffPolicy, WorkerPoolConfig};

/// Map resolved configuration onto the job runtime's tunables.
pub fn sync_settings(config: &SyncConfig) -> SyncSettings {
	let jobs = &config.jobs;
	SyncSettings {
		kinds: config.kinds.clone(),
		exclusive_kinds: config.exclusive_kinds.clone(),
		tenant_id: jobs.tenant_id.clone(),
		beat_lock_ttl: Duration::from_secs(config.beat.lock_ttl_secs),
		beat_time_limit: Duration::from_secs(config.beat.time_limit_secs),
		starter_lock_ttl: Duration::from_secs(jobs.starter_lock_ttl_secs),
		starter_lock_timeout: Duration::from_secs(jobs.starter_lock_timeout_secs),
		generator_lock_ttl: Duration::from_secs(jobs.generator_lock_ttl_secs),
		fence_wait_timeout: Duration::from_secs(jobs.fence_wait_timeout_secs),
		heartbeat_interval: Duration::from_secs(jobs.heartbeat_interval_secs),
		max_job_lifetime: Duration::from_secs(jobs.max_job_lifetime_secs),
		subtask_retry: BackoffPolicy {
			base: Duration::from_secs(jobs.subtask_retry_base_secs),
			max_delay: Duration::from_secs(jobs.subtask_retry_max_delay_secs),
			max_retries: jobs.subtask_max_retries,
			..BackoffPolicy::default()
		},
		subtask_soft_time_limit: Duration::from_secs(jobs.subtask_soft_time_limit_secs),
		effect_attempts: jobs.effect_attempts,
		..SyncSettings::default()
	}
}

pub fn pool_config(config: &SyncConfig, queues: Vec<String>) -> WorkerPoolConfig {
	let worker = &config.worker;
	WorkerPoolConfig {
		concurrency: worker.concurrency,
		queues,
		poll_interval: Duration::from_millis(worker.poll_interval_ms),
		visibility_timeout: Duration::from_secs(worker.visibility_timeout_secs),
		reclaim_interval: Duration::from_secs(worker.reclaim_interval_secs),
		..WorkerPoolConfig::default()
	}
}
