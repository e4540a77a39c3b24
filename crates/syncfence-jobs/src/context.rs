// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use syncfence_core::{JobKind, ResourceId};
use syncfence_kv::{KeySpace, KvLock, KvStore, SyncNamespace};
use syncfence_queue::TaskQueue;
use tracing::info;

use crate::collaborators::{Collaborators, ConnectorSource, DocumentStore, ResourceStore};
use crate::settings::SyncSettings;

/// Process-wide handles shared by every component.
///
/// Built once at startup and passed around as `Arc<SyncRuntime>`. Call
/// [`SyncRuntime::shutdown`] once all workers have stopped.
pub struct SyncRuntime {
	pub store: Arc<dyn KvStore>,
	pub queue: Arc<dyn TaskQueue>,
	pub resources: Arc<dyn ResourceStore>,
	pub connectors: Arc<dyn ConnectorSource>,
	pub documents: Arc<dyn DocumentStore>,
	pub keys: KeySpace,
	pub settings: SyncSettings,
}

impl SyncRuntime {
	pub fn new(
		store: Arc<dyn KvStore>,
		queue: Arc<dyn TaskQueue>,
		collaborators: Collaborators,
		settings: SyncSettings,
	) -> Self {
		Self {
			store,
			queue,
			resources: collaborators.resources,
			connectors: collaborators.connectors,
			documents: collaborators.documents,
			keys: KeySpace::new(settings.tenant_id.clone()),
			settings,
		}
	}

	pub fn namespace(&self, kind: JobKind, resource_id: ResourceId) -> SyncNamespace {
		SyncNamespace::new(self.store.clone(), &self.keys, kind, resource_id)
	}

	pub fn beat_lock(&self, kind: JobKind) -> KvLock {
		KvLock::new(
			self.store.clone(),
			self.keys.beat_lock(kind),
			self.settings.beat_lock_ttl,
		)
	}

	pub fn kind_starter_lock(&self, kind: JobKind) -> KvLock {
		KvLock::new(
			self.store.clone(),
			self.keys.kind_starter_lock(kind),
			self.settings.starter_lock_ttl,
		)
	}

	/// Keyword arguments every task message carries.
	pub fn base_kwargs(&self, resource_id: ResourceId) -> serde_json::Value {
		serde_json::json!({
			"resource_id": resource_id,
			"tenant_id": self.keys.tenant(),
		})
	}

	pub async fn shutdown(&self) {
		self.queue.close().await;
		self.store.close().await;
		info!("Sync runtime shut down");
	}
}
