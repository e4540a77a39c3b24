// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, a TOML file and environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::SyncConfigLayer;
use crate::sections::{
	BeatConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LogFormat, LoggingConfigLayer,
	WorkerConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<SyncConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<SyncConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(SyncConfigLayer::default())
	}
}

/// TOML file source. A missing file is an empty layer.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/syncfence/worker.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<SyncConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(SyncConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: SyncConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: SYNCFENCE_<SECTION>_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<SyncConfigLayer, ConfigError> {
		debug!("loading environment variables");
		load_from(&|name| std::env::var(name).ok())
	}
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Build a layer from an arbitrary variable lookup.
pub fn load_from(lookup: Lookup<'_>) -> Result<SyncConfigLayer, ConfigError> {
	let env = Env(lookup);
	Ok(SyncConfigLayer {
		database: Some(DatabaseConfigLayer {
			url: env.var("SYNCFENCE_DATABASE_URL"),
			connect_attempts: env.parse("SYNCFENCE_DATABASE_CONNECT_ATTEMPTS")?,
			connect_retry_delay_ms: env.parse("SYNCFENCE_DATABASE_CONNECT_RETRY_DELAY_MS")?,
		}),
		beat: Some(BeatConfigLayer {
			enabled: env.bool("SYNCFENCE_BEAT_ENABLED"),
			interval_secs: env.parse("SYNCFENCE_BEAT_INTERVAL_SECS")?,
			lock_ttl_secs: env.parse("SYNCFENCE_BEAT_LOCK_TTL_SECS")?,
			time_limit_secs: env.parse("SYNCFENCE_BEAT_TIME_LIMIT_SECS")?,
			kinds: env.list("SYNCFENCE_BEAT_KINDS"),
			exclusive_kinds: env.list("SYNCFENCE_BEAT_EXCLUSIVE_KINDS"),
		}),
		worker: Some(WorkerConfigLayer {
			concurrency: env.parse("SYNCFENCE_WORKER_CONCURRENCY")?,
			poll_interval_ms: env.parse("SYNCFENCE_WORKER_POLL_INTERVAL_MS")?,
			visibility_timeout_secs: env.parse("SYNCFENCE_WORKER_VISIBILITY_TIMEOUT_SECS")?,
			reclaim_interval_secs: env.parse("SYNCFENCE_WORKER_RECLAIM_INTERVAL_SECS")?,
		}),
		jobs: Some(JobsConfigLayer {
			tenant_id: env.var("SYNCFENCE_JOBS_TENANT_ID"),
			starter_lock_ttl_secs: env.parse("SYNCFENCE_JOBS_STARTER_LOCK_TTL_SECS")?,
			starter_lock_timeout_secs: env.parse("SYNCFENCE_JOBS_STARTER_LOCK_TIMEOUT_SECS")?,
			generator_lock_ttl_secs: env.parse("SYNCFENCE_JOBS_GENERATOR_LOCK_TTL_SECS")?,
			fence_wait_timeout_secs: env.parse("SYNCFENCE_JOBS_FENCE_WAIT_TIMEOUT_SECS")?,
			heartbeat_interval_secs: env.parse("SYNCFENCE_JOBS_HEARTBEAT_INTERVAL_SECS")?,
			max_job_lifetime_secs: env.parse("SYNCFENCE_JOBS_MAX_JOB_LIFETIME_SECS")?,
			subtask_retry_base_secs: env.parse("SYNCFENCE_JOBS_SUBTASK_RETRY_BASE_SECS")?,
			subtask_retry_max_delay_secs: env.parse("SYNCFENCE_JOBS_SUBTASK_RETRY_MAX_DELAY_SECS")?,
			subtask_max_retries: env.parse("SYNCFENCE_JOBS_SUBTASK_MAX_RETRIES")?,
			subtask_soft_time_limit_secs: env.parse("SYNCFENCE_JOBS_SUBTASK_SOFT_TIME_LIMIT_SECS")?,
			effect_attempts: env.parse("SYNCFENCE_JOBS_EFFECT_ATTEMPTS")?,
		}),
		logging: Some(LoggingConfigLayer {
			level: env.var("SYNCFENCE_LOGGING_LEVEL"),
			format: env
				.var("SYNCFENCE_LOGGING_FORMAT")
				.map(|v| match v.to_lowercase().as_str() {
					"json" => Ok(LogFormat::Json),
					"pretty" | "text" => Ok(LogFormat::Pretty),
					_ => Err(ConfigError::InvalidValue {
						key: "SYNCFENCE_LOGGING_FORMAT".to_string(),
						message: format!("unknown log format '{v}'"),
					}),
				})
				.transpose()?,
		}),
	})
}

struct Env<'a>(Lookup<'a>);

impl Env<'_> {
	fn var(&self, name: &str) -> Option<String> {
		(self.0)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid numeric value '{v}'"),
			}),
			None => Ok(None),
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|s| {
			s.split(',')
				.map(|s| s.trim().to_string())
				.filter(|s| !s.is_empty())
				.collect()
		})
	}
}
