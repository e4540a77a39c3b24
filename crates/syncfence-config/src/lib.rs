// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for syncfence workers.
//!
//! This crate provides:
//! - Layered configuration from defaults, a TOML file and the environment
//! - Type-safe sections with validation
//! - Consistent environment variable naming (`SYNCFENCE_<SECTION>_<FIELD>`)

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::SyncConfigLayer;
pub use sections::*;
pub use sources::{load_from, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use syncfence_core::JobKind;
use tracing::{debug, info};

/// Fully resolved worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
	pub database: DatabaseConfig,
	pub beat: BeatConfig,
	pub worker: WorkerConfig,
	pub jobs: JobsConfig,
	pub logging: LoggingConfig,
	/// Kinds the beat drives, resolved from `beat.kinds`.
	pub kinds: Vec<JobKind>,
	pub exclusive_kinds: Vec<JobKind>,
}

/// Load configuration with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`SYNCFENCE_*`)
/// 2. Config file (`/etc/syncfence/worker.toml`, or `path`)
/// 3. Built-in defaults
pub fn load_config(path: Option<std::path::PathBuf>) -> Result<SyncConfig, ConfigError> {
	let file = match path {
		Some(path) => TomlSource::new(path),
		None => TomlSource::system(),
	};
	let sources: Vec<Box<dyn ConfigSource>> =
		vec![Box::new(DefaultsSource), Box::new(file), Box::new(EnvSource)];
	load_from_sources(sources)
}

pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<SyncConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = SyncConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

/// Resolve a merged layer and validate it.
pub fn finalize(layer: SyncConfigLayer) -> Result<SyncConfig, ConfigError> {
	let database = layer.database.unwrap_or_default().finalize();
	let beat = layer.beat.unwrap_or_default().finalize();
	let worker = layer.worker.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	let kinds = if beat.kinds.is_empty() {
		JobKind::ALL.to_vec()
	} else {
		parse_kinds("beat.kinds", &beat.kinds)?
	};
	let exclusive_kinds = parse_kinds("beat.exclusive_kinds", &beat.exclusive_kinds)?;

	validate_config(&beat, &worker, &jobs)?;

	info!(
		database = %database.url,
		beat_enabled = beat.enabled,
		concurrency = worker.concurrency,
		kinds = ?kinds,
		tenant = jobs.tenant_id.as_deref().unwrap_or("-"),
		"Worker configuration loaded"
	);

	Ok(SyncConfig {
		database,
		beat,
		worker,
		jobs,
		logging,
		kinds,
		exclusive_kinds,
	})
}

fn parse_kinds(key: &str, tags: &[String]) -> Result<Vec<JobKind>, ConfigError> {
	let mut kinds = Vec::with_capacity(tags.len());
	for tag in tags {
		let kind = JobKind::from_tag(tag).ok_or_else(|| ConfigError::InvalidValue {
			key: key.to_string(),
			message: format!("unknown job kind '{tag}'"),
		})?;
		if !kinds.contains(&kind) {
			kinds.push(kind);
		}
	}
	Ok(kinds)
}

/// Validate cross-field configuration rules.
fn validate_config(beat: &BeatConfig, worker: &WorkerConfig, jobs: &JobsConfig) -> Result<(), ConfigError> {
	if worker.concurrency == 0 {
		return Err(ConfigError::Validation("worker.concurrency must be at least 1".to_string()));
	}
	if beat.interval_secs == 0 {
		return Err(ConfigError::Validation("beat.interval_secs must be at least 1".to_string()));
	}
	// The beat renews its lock every lock_ttl / 2.
	if beat.lock_ttl_secs < 2 {
		return Err(ConfigError::Validation("beat.lock_ttl_secs must be at least 2".to_string()));
	}
	if jobs.generator_lock_ttl_secs <= jobs.heartbeat_interval_secs {
		return Err(ConfigError::Validation(format!(
			"jobs.generator_lock_ttl_secs ({}) must exceed jobs.heartbeat_interval_secs ({})",
			jobs.generator_lock_ttl_secs, jobs.heartbeat_interval_secs
		)));
	}
	if jobs.starter_lock_ttl_secs == 0 {
		return Err(ConfigError::Validation("jobs.starter_lock_ttl_secs must be at least 1".to_string()));
	}
	if jobs.effect_attempts == 0 {
		return Err(ConfigError::Validation("jobs.effect_attempts must be at least 1".to_string()));
	}
	Ok(())
}
