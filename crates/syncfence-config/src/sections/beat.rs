// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beat scheduler configuration.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct BeatConfig {
	pub enabled: bool,
	pub interval_secs: u64,
	pub lock_ttl_secs: u64,
	pub time_limit_secs: u64,
	/// Kind tags to drive; empty means every kind.
	pub kinds: Vec<String>,
	/// Kind tags limited to one resource at a time.
	pub exclusive_kinds: Vec<String>,
}

impl Default for BeatConfig {
	fn default() -> Self {
		BeatConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub interval_secs: Option<u64>,
	#[serde(default)]
	pub lock_ttl_secs: Option<u64>,
	#[serde(default)]
	pub time_limit_secs: Option<u64>,
	#[serde(default)]
	pub kinds: Option<Vec<String>>,
	#[serde(default)]
	pub exclusive_kinds: Option<Vec<String>>,
}

impl BeatConfigLayer {
	pub fn merge(&mut self, other: BeatConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.interval_secs.is_some() {
			self.interval_secs = other.interval_secs;
		}
		if other.lock_ttl_secs.is_some() {
			self.lock_ttl_secs = other.lock_ttl_secs;
		}
		if other.time_limit_secs.is_some() {
			self.time_limit_secs = other.time_limit_secs;
		}
		if other.kinds.is_some() {
			self.kinds = other.kinds;
		}
		if other.exclusive_kinds.is_some() {
			self.exclusive_kinds = other.exclusive_kinds;
		}
	}

	pub fn finalize(self) -> BeatConfig {
		BeatConfig {
			enabled: self.enabled.unwrap_or(true),
			interval_secs: self.interval_secs.unwrap_or(15),
			lock_ttl_secs: self.lock_ttl_secs.unwrap_or(120),
			time_limit_secs: self.time_limit_secs.unwrap_or(300),
			kinds: self.kinds.unwrap_or_default(),
			exclusive_kinds: self.exclusive_kinds.unwrap_or_default(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_defaults() {
		let config = BeatConfig::default();
		assert!(config.enabled);
		assert_eq!(config.interval_secs, 15);
		assert_eq!(config.lock_ttl_secs, 120);
		assert!(config.kinds.is_empty());
	}

	#[test]
	fn test_deserialize_partial() {
		let layer: BeatConfigLayer = toml::from_str(
			r#"
kinds = ["connectorpruning"]
interval_secs = 60
"#,
		)
		.unwrap();
		let config = layer.finalize();
		assert_eq!(config.kinds, vec!["connectorpruning".to_string()]);
		assert_eq!(config.interval_secs, 60);
		assert_eq!(config.time_limit_secs, 300);
	}
}
