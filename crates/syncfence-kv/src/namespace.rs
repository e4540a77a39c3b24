// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-(kind, resource) coordination keys.

use std::sync::Arc;
use std::time::Duration;
use syncfence_core::{FencePayload, JobKind, ResourceId};

use crate::error::{KvError, Result};
use crate::keys::KeySpace;
use crate::lock::KvLock;
use crate::store::KvStore;

/// "A job of this kind is in flight for this resource."
#[derive(Clone)]
pub struct Fence {
	store: Arc<dyn KvStore>,
	key: String,
}

impl Fence {
	pub fn new(store: Arc<dyn KvStore>, key: String) -> Self {
		Self { store, key }
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub async fn set(&self, payload: &FencePayload) -> Result<()> {
		let json = serde_json::to_string(payload)?;
		self.store.set(&self.key, &json, None).await
	}

	pub async fn get(&self) -> Result<Option<FencePayload>> {
		match self.store.get(&self.key).await? {
			Some(json) => Ok(Some(serde_json::from_str(&json)?)),
			None => Ok(None),
		}
	}

	pub async fn exists(&self) -> Result<bool> {
		self.store.exists(&self.key).await
	}

	pub async fn clear(&self) -> Result<()> {
		self.store.delete(&self.key).await?;
		Ok(())
	}
}

/// Outstanding subtask ids.
#[derive(Clone)]
pub struct Taskset {
	store: Arc<dyn KvStore>,
	key: String,
}

impl Taskset {
	pub fn new(store: Arc<dyn KvStore>, key: String) -> Self {
		Self { store, key }
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub async fn add(&self, id: &str) -> Result<bool> {
		self.store.sadd(&self.key, id).await
	}

	/// Removing a non-member is a no-op.
	pub async fn remove(&self, id: &str) -> Result<bool> {
		self.store.srem(&self.key, id).await
	}

	pub async fn size(&self) -> Result<u64> {
		self.store.scard(&self.key).await
	}

	pub async fn members(&self) -> Result<Vec<String>> {
		self.store.smembers(&self.key).await
	}

	pub async fn clear(&self) -> Result<()> {
		self.store.delete(&self.key).await?;
		Ok(())
	}
}

/// Integer key used for generator progress and the generation-complete marker.
#[derive(Clone)]
pub struct Counter {
	store: Arc<dyn KvStore>,
	key: String,
}

impl Counter {
	pub fn new(store: Arc<dyn KvStore>, key: String) -> Self {
		Self { store, key }
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub async fn incr_by(&self, n: i64) -> Result<i64> {
		self.store.incr_by(&self.key, n).await
	}

	pub async fn set(&self, n: i64) -> Result<()> {
		self.store.set(&self.key, &n.to_string(), None).await
	}

	pub async fn get(&self) -> Result<Option<i64>> {
		match self.store.get(&self.key).await? {
			Some(raw) => raw.parse::<i64>().map(Some).map_err(|e| KvError::InvalidValue {
				key: self.key.clone(),
				message: e.to_string(),
			}),
			None => Ok(None),
		}
	}

	pub async fn clear(&self) -> Result<()> {
		self.store.delete(&self.key).await?;
		Ok(())
	}
}

/// Out-of-band cancellation marker.
#[derive(Clone)]
pub struct StopFence {
	store: Arc<dyn KvStore>,
	key: String,
}

impl StopFence {
	pub fn new(store: Arc<dyn KvStore>, key: String) -> Self {
		Self { store, key }
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Set the marker; `None` keeps it until cleared.
	pub async fn set(&self, ttl: Option<Duration>) -> Result<()> {
		self.store.set(&self.key, "1", ttl).await
	}

	pub async fn is_set(&self) -> Result<bool> {
		self.store.exists(&self.key).await
	}

	pub async fn clear(&self) -> Result<()> {
		self.store.delete(&self.key).await?;
		Ok(())
	}
}

/// Every coordination key for one (kind, resource).
#[derive(Clone)]
pub struct SyncNamespace {
	store: Arc<dyn KvStore>,
	pub kind: JobKind,
	pub resource_id: ResourceId,
	pub fence: Fence,
	pub taskset: Taskset,
	pub progress: Counter,
	pub complete: Counter,
	pub stop: StopFence,
	starter_lock_key: String,
	generator_lock_key: String,
}

impl SyncNamespace {
	pub fn new(store: Arc<dyn KvStore>, keys: &KeySpace, kind: JobKind, resource_id: ResourceId) -> Self {
		Self {
			fence: Fence::new(store.clone(), keys.fence(kind, resource_id)),
			taskset: Taskset::new(store.clone(), keys.taskset(kind, resource_id)),
			progress: Counter::new(store.clone(), keys.generator_progress(kind, resource_id)),
			complete: Counter::new(store.clone(), keys.generator_complete(kind, resource_id)),
			stop: StopFence::new(store.clone(), keys.stop_fence(kind, resource_id)),
			starter_lock_key: keys.starter_lock(kind, resource_id),
			generator_lock_key: keys.generator_lock(kind, resource_id),
			store,
			kind,
			resource_id,
		}
	}

	pub fn starter_lock(&self, ttl: Duration) -> KvLock {
		KvLock::new(self.store.clone(), self.starter_lock_key.clone(), ttl)
	}

	pub fn generator_lock(&self, ttl: Duration) -> KvLock {
		KvLock::new(self.store.clone(), self.generator_lock_key.clone(), ttl)
	}

	/// Whether some generator currently holds the generator lock.
	pub async fn generator_running(&self) -> Result<bool> {
		self.store.exists(&self.generator_lock_key).await
	}

	/// Drop taskset, progress and complete keys left by an earlier run.
	pub async fn clear_leftovers(&self) -> Result<()> {
		self.taskset.clear().await?;
		self.progress.clear().await?;
		self.complete.clear().await?;
		Ok(())
	}

	/// Delete every job key. The fence goes last so a concurrent starter
	/// never sees an absent fence next to live job state.
	pub async fn reset(&self) -> Result<()> {
		self.clear_leftovers().await?;
		self.fence.clear().await
	}
}
