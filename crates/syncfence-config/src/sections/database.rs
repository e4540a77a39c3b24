// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database configuration. One SQLite file backs the KV store, the task
//! queue and the catalog.

use serde::Deserialize;

const DEFAULT_URL: &str = "sqlite:./syncfence.db";

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
	pub url: String,
	/// Startup connectivity checks before giving up.
	pub connect_attempts: u32,
	pub connect_retry_delay_ms: u64,
}

impl Default for DatabaseConfig {
	fn default() -> Self {
		DatabaseConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfigLayer {
	#[serde(default)]
	pub url: Option<String>,
	#[serde(default)]
	pub connect_attempts: Option<u32>,
	#[serde(default)]
	pub connect_retry_delay_ms: Option<u64>,
}

impl DatabaseConfigLayer {
	pub fn merge(&mut self, other: DatabaseConfigLayer) {
		if other.url.is_some() {
			self.url = other.url;
		}
		if other.connect_attempts.is_some() {
			self.connect_attempts = other.connect_attempts;
		}
		if other.connect_retry_delay_ms.is_some() {
			self.connect_retry_delay_ms = other.connect_retry_delay_ms;
		}
	}

	pub fn finalize(self) -> DatabaseConfig {
		DatabaseConfig {
			url: self.url.unwrap_or_else(|| DEFAULT_URL.to_string()),
			connect_attempts: self.connect_attempts.unwrap_or(10),
			connect_retry_delay_ms: self.connect_retry_delay_ms.unwrap_or(500),
		}
	}
}
