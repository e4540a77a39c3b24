// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::Deserialize;

use crate::sections::{
	BeatConfigLayer, DatabaseConfigLayer, JobsConfigLayer, LoggingConfigLayer, WorkerConfigLayer,
};

/// One source's partial configuration. Later layers override earlier ones
/// field by field.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfigLayer {
	#[serde(default)]
	pub database: Option<DatabaseConfigLayer>,
	#[serde(default)]
	pub beat: Option<BeatConfigLayer>,
	#[serde(default)]
	pub worker: Option<WorkerConfigLayer>,
	#[serde(default)]
	pub jobs: Option<JobsConfigLayer>,
	#[serde(default)]
	pub logging: Option<LoggingConfigLayer>,
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: impl FnOnce(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(b), Some(o)) => merge(b, o),
		(None, Some(o)) => *base = Some(o),
		(_, None) => {}
	}
}

impl SyncConfigLayer {
	pub fn merge(&mut self, other: SyncConfigLayer) {
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.beat, other.beat, BeatConfigLayer::merge);
		merge_section(&mut self.worker, other.worker, WorkerConfigLayer::merge);
		merge_section(&mut self.jobs, other.jobs, JobsConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_merge_is_field_wise() {
		let mut base: SyncConfigLayer = toml::from_str(
			r#"
[database]
url = "sqlite:/var/lib/syncfence/base.db"

[worker]
concurrency = 8
"#,
		)
		.unwrap();
		let overlay: SyncConfigLayer = toml::from_str(
			r#"
[worker]
poll_interval_ms = 50
"#,
		)
		.unwrap();

		base.merge(overlay);
		let worker = base.worker.unwrap();
		assert_eq!(worker.concurrency, Some(8));
		assert_eq!(worker.poll_interval_ms, Some(50));
		assert_eq!(
			base.database.unwrap().url.as_deref(),
			Some("sqlite:/var/lib/syncfence/base.db")
		);
	}
}
