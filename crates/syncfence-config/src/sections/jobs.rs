// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sync job tunables: locks, fence waits, lifetimes and subtask retries.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
	/// Prefix for every KV key, for stores shared between tenants.
	pub tenant_id: Option<String>,
	pub starter_lock_ttl_secs: u64,
	pub starter_lock_timeout_secs: u64,
	pub generator_lock_ttl_secs: u64,
	pub fence_wait_timeout_secs: u64,
	pub heartbeat_interval_secs: u64,
	pub max_job_lifetime_secs: u64,
	pub subtask_retry_base_secs: u64,
	pub subtask_retry_max_delay_secs: u64,
	pub subtask_max_retries: u32,
	pub subtask_soft_time_limit_secs: u64,
	pub effect_attempts: u32,
}

impl Default for JobsConfig {
	fn default() -> Self {
		JobsConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	#[serde(default)]
	pub tenant_id: Option<String>,
	#[serde(default)]
	pub starter_lock_ttl_secs: Option<u64>,
	#[serde(default)]
	pub starter_lock_timeout_secs: Option<u64>,
	#[serde(default)]
	pub generator_lock_ttl_secs: Option<u64>,
	#[serde(default)]
	pub fence_wait_timeout_secs: Option<u64>,
	#[serde(default)]
	pub heartbeat_interval_secs: Option<u64>,
	#[serde(default)]
	pub max_job_lifetime_secs: Option<u64>,
	#[serde(default)]
	pub subtask_retry_base_secs: Option<u64>,
	#[serde(default)]
	pub subtask_retry_max_delay_secs: Option<u64>,
	#[serde(default)]
	pub subtask_max_retries: Option<u32>,
	#[serde(default)]
	pub subtask_soft_time_limit_secs: Option<u64>,
	#[serde(default)]
	pub effect_attempts: Option<u32>,
}

macro_rules! overlay {
	($self:ident, $other:ident, $($field:ident),+ $(,)?) => {
		$(
			if $other.$field.is_some() {
				$self.$field = $other.$field;
			}
		)+
	};
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: JobsConfigLayer) {
		overlay!(
			self,
			other,
			tenant_id,
			starter_lock_ttl_secs,
			starter_lock_timeout_secs,
			generator_lock_ttl_secs,
			fence_wait_timeout_secs,
			heartbeat_interval_secs,
			max_job_lifetime_secs,
			subtask_retry_base_secs,
			subtask_retry_max_delay_secs,
			subtask_max_retries,
			subtask_soft_time_limit_secs,
			effect_attempts,
		);
	}

	pub fn finalize(self) -> JobsConfig {
		JobsConfig {
			tenant_id: self.tenant_id.filter(|t| !t.is_empty()),
			starter_lock_ttl_secs: self.starter_lock_ttl_secs.unwrap_or(30),
			starter_lock_timeout_secs: self.starter_lock_timeout_secs.unwrap_or(10),
			generator_lock_ttl_secs: self.generator_lock_ttl_secs.unwrap_or(300),
			fence_wait_timeout_secs: self.fence_wait_timeout_secs.unwrap_or(60),
			heartbeat_interval_secs: self.heartbeat_interval_secs.unwrap_or(5),
			max_job_lifetime_secs: self.max_job_lifetime_secs.unwrap_or(6 * 60 * 60),
			subtask_retry_base_secs: self.subtask_retry_base_secs.unwrap_or(16),
			subtask_retry_max_delay_secs: self.subtask_retry_max_delay_secs.unwrap_or(600),
			subtask_max_retries: self.subtask_max_retries.unwrap_or(3),
			subtask_soft_time_limit_secs: self.subtask_soft_time_limit_secs.unwrap_or(105),
			effect_attempts: self.effect_attempts.unwrap_or(3),
		}
	}
}
