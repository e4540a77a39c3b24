// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Beat scheduler: one active instance per kind scans for due resources.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use syncfence_core::JobKind;
use syncfence_kv::KvLock;
use syncfence_queue::CancellationToken;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::context::SyncRuntime;
use crate::error::Result;
use crate::guard::with_held_lock;
use crate::reaper::{FenceReaper, MonitorReport};
use crate::registry;
use crate::starter::{JobStarter, StartOutcome};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BeatReport {
	pub due: usize,
	pub started: usize,
	pub skipped: usize,
	pub errors: usize,
	pub monitor: MonitorReport,
	/// The pass stopped early on the time limit or lost the beat lock.
	pub cut_short: bool,
}

pub struct BeatScheduler {
	rt: Arc<SyncRuntime>,
	starter: JobStarter,
	reaper: FenceReaper,
}

impl BeatScheduler {
	pub fn new(rt: Arc<SyncRuntime>) -> Self {
		Self {
			starter: JobStarter::new(rt.clone()),
			reaper: FenceReaper::new(rt.clone()),
			rt,
		}
	}

	/// One pass for `kind`. Returns `None` when another instance holds the
	/// beat lock.
	#[instrument(skip(self), fields(kind = %kind))]
	pub async fn run_pass(&self, kind: JobKind) -> Result<Option<BeatReport>> {
		let lock = self.rt.beat_lock(kind);
		if !lock.acquire(false, Duration::ZERO).await? {
			debug!("Beat lock held elsewhere");
			return Ok(None);
		}
		with_held_lock(&lock, || self.scan(kind, &lock)).await.map(Some)
	}

	async fn scan(&self, kind: JobKind, lock: &KvLock) -> Result<BeatReport> {
		let spec = registry::spec(kind);
		let settings = &self.rt.settings;
		let started_at = Instant::now();
		let mut last_renewal = started_at;
		let mut report = BeatReport::default();

		match self.reaper.monitor_pass(kind).await {
			Ok(monitor) => report.monitor = monitor,
			Err(e) => warn!(error = %e, "Fence monitor pass failed"),
		}

		let now = Utc::now();
		let due: Vec<_> = self
			.rt
			.resources
			.list_resources(kind)
			.await?
			.into_iter()
			.filter(|r| spec.is_due(r, now))
			.collect();
		report.due = due.len();

		for resource in due {
			if started_at.elapsed() >= settings.beat_time_limit {
				info!(remaining = report.due - report.started - report.skipped - report.errors, "Beat pass time limit reached");
				report.cut_short = true;
				break;
			}
			if last_renewal.elapsed() >= lock.ttl() / 2 {
				if !lock.reacquire().await? {
					warn!("Beat lock lost mid-scan");
					report.cut_short = true;
					break;
				}
				last_renewal = Instant::now();
			}

			match self.starter.try_creating_task(kind, resource.id, None).await {
				Ok(StartOutcome::Started { task_id }) => {
					info!(resource_id = %resource.id, task_id = %task_id, "Job started");
					report.started += 1;
				}
				Ok(StartOutcome::Skipped(reason)) => {
					debug!(resource_id = %resource.id, reason = %reason, "Job not started");
					report.skipped += 1;
				}
				Err(e) => {
					warn!(resource_id = %resource.id, error = %e, "Failed to start job");
					report.errors += 1;
				}
			}
		}

		if report.started > 0 || report.errors > 0 {
			info!(
				due = report.due,
				started = report.started,
				skipped = report.skipped,
				errors = report.errors,
				"Beat pass finished"
			);
		}
		Ok(report)
	}

	/// Run a pass for every configured kind each `interval` until `shutdown`
	/// fires.
	pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
		info!(interval_secs = interval.as_secs(), kinds = ?self.rt.settings.kinds, "Beat scheduler started");
		loop {
			for kind in &self.rt.settings.kinds {
				if shutdown.is_cancelled() {
					break;
				}
				if let Err(e) = self.run_pass(*kind).await {
					error!(kind = %kind, error = %e, "Beat pass failed");
				}
			}
			tokio::select! {
				_ = shutdown.cancelled() => break,
				_ = tokio::time::sleep(interval) => {}
			}
		}
		info!("Beat scheduler stopped");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::collaborators::ResourceStore;
	use crate::testing::TestHarness;
	use syncfence_core::ResourceId;

	#[tokio::test]
	async fn pass_starts_only_due_resources() {
		let h = TestHarness::new();
		for id in 1..=3 {
			h.catalog.add_cc_pair(ResourceId(id));
		}
		h.catalog
			.mark_resource_synced(JobKind::Pruning, ResourceId(3), Utc::now())
			.await
			.unwrap();

		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert_eq!(report.due, 2);
		assert_eq!(report.started, 2);
		assert!(!report.cut_short);
		assert!(h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(3)).await);

		// Still due, but already running.
		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert_eq!(report.started, 0);
		assert_eq!(report.skipped, 2);
	}

	#[tokio::test]
	async fn one_beat_instance_per_kind() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		let other = h.rt.beat_lock(JobKind::Pruning);
		assert!(other.acquire(false, Duration::ZERO).await.unwrap());

		assert!(h.beat().run_pass(JobKind::Pruning).await.unwrap().is_none());
		// Other kinds have their own lock.
		assert!(h
			.beat()
			.run_pass(JobKind::ExternalGroupSync)
			.await
			.unwrap()
			.is_some());
	}

	#[tokio::test]
	async fn beat_lock_released_after_pass() {
		let h = TestHarness::new();
		h.beat().run_pass(JobKind::Pruning).await.unwrap();
		assert!(!h
			.store
			.exists(&h.rt.keys.beat_lock(JobKind::Pruning))
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn enumeration_failure_in_generator_does_not_fail_the_pass() {
		let h = TestHarness::new();
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.fail_enumeration("source offline");

		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert_eq!(report.started, 1);

		// The generator fails and rolls back; the next pass can start again.
		h.drain().await;
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert_eq!(report.started, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn slow_scan_is_cut_short_at_the_time_limit() {
		let h = TestHarness::with_settings(crate::settings::SyncSettings {
			beat_time_limit: Duration::from_secs(2),
			..crate::testing::test_settings()
		});
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.add_cc_pair(ResourceId(2));
		h.catalog.slow_down(Duration::from_secs(5));

		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert!(report.cut_short);
		assert_eq!(report.due, 2);
		assert_eq!(report.started, 0);
		assert!(!h.has_job_keys(JobKind::Pruning, ResourceId(1)).await);
	}

	#[tokio::test(start_paused = true)]
	async fn scan_stops_when_the_beat_lock_is_taken_over() {
		let h = TestHarness::with_settings(crate::settings::SyncSettings {
			beat_lock_ttl: Duration::from_secs(2),
			..crate::testing::test_settings()
		});
		h.catalog.add_cc_pair(ResourceId(1));
		h.catalog.slow_down(Duration::from_secs(3));

		let rt = h.rt.clone();
		let usurper = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(2500)).await;
			let lock = rt.beat_lock(JobKind::Pruning);
			assert!(lock.acquire(false, Duration::ZERO).await.unwrap());
			lock
		});

		let report = h.beat().run_pass(JobKind::Pruning).await.unwrap().unwrap();
		assert!(report.cut_short);
		assert_eq!(report.started, 0);

		// The pass must not release a lock it no longer owns.
		let usurper = usurper.await.unwrap();
		assert!(usurper.owned().await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn run_stops_on_shutdown() {
		let h = TestHarness::new();
		let beat = h.beat();
		let shutdown = CancellationToken::new();
		let stopper = shutdown.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(90)).await;
			stopper.cancel();
		});

		tokio::time::timeout(Duration::from_secs(300), beat.run(Duration::from_secs(30), shutdown))
			.await
			.expect("beat loop did not stop");
	}
}
