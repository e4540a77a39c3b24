// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-memory collaborators and a wired-up runtime for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use syncfence_core::{ExternalGroup, JobKind, Resource, ResourceId, ResourceStatus, ResourceType};
use syncfence_kv::{KvStore, MemoryKvStore, SyncNamespace};
use syncfence_queue::{MemoryTaskQueue, TaskQueue, WorkerPool, WorkerPoolConfig};

use crate::admin::JobAdmin;
use crate::beat::BeatScheduler;
use crate::collaborators::{
	Collaborators, ConnectorSource, DocumentStore, EffectError, ResourceStore, SubtaskEffect,
};
use crate::context::SyncRuntime;
use crate::error::{Result, SyncError};
use crate::registry;
use crate::settings::SyncSettings;
use crate::starter::JobStarter;
use crate::worker::install_handlers;

#[derive(Default)]
struct CatalogState {
	resources: HashMap<(ResourceType, ResourceId), Resource>,
	last_synced: HashMap<(JobKind, ResourceId), DateTime<Utc>>,
	documents: HashMap<ResourceId, BTreeSet<String>>,
	set_members: HashMap<ResourceId, BTreeSet<String>>,
	synced_members: HashMap<ResourceId, BTreeSet<String>>,
	external_ids: HashMap<ResourceId, HashSet<String>>,
	external_groups: HashMap<ResourceId, Vec<ExternalGroup>>,
	synced_groups: HashMap<ResourceId, BTreeMap<String, ExternalGroup>>,
	dirty: Vec<(JobKind, ResourceId, String)>,
	applied: Vec<(JobKind, ResourceId, SubtaskEffect)>,
	effect_failures: VecDeque<EffectError>,
	enumeration_failure: Option<String>,
	/// Added to resource listing and source enumeration.
	latency: Duration,
}

/// Resources, documents and an external source held in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
	state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, CatalogState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	pub fn collaborators(self: &Arc<Self>) -> Collaborators {
		Collaborators {
			resources: self.clone(),
			connectors: self.clone(),
			documents: self.clone(),
		}
	}

	pub fn add_resource(&self, resource: Resource) {
		self.state()
			.resources
			.insert((resource.resource_type, resource.id), resource);
	}

	/// An active cc_pair, due for periodic jobs every hour since two hours ago.
	pub fn add_cc_pair(&self, id: ResourceId) {
		let mut resource = Resource::new(
			id,
			ResourceType::ConnectorCredentialPair,
			Utc::now() - chrono::Duration::hours(2),
		);
		resource.sync_period_secs = Some(3600);
		self.add_resource(resource);
	}

	pub fn add_document_set(&self, id: ResourceId, members: &[&str]) {
		let mut resource = Resource::new(id, ResourceType::DocumentSet, Utc::now());
		resource.needs_sync = true;
		self.add_resource(resource);
		self.state()
			.set_members
			.insert(id, members.iter().map(|s| s.to_string()).collect());
	}

	pub fn set_status(&self, resource_type: ResourceType, id: ResourceId, status: ResourceStatus) {
		if let Some(r) = self.state().resources.get_mut(&(resource_type, id)) {
			r.status = status;
		}
	}

	pub fn add_documents(&self, cc_pair: ResourceId, ids: &[&str]) {
		self.state()
			.documents
			.entry(cc_pair)
			.or_default()
			.extend(ids.iter().map(|s| s.to_string()));
	}

	pub fn set_external_ids(&self, cc_pair: ResourceId, ids: &[&str]) {
		self.state()
			.external_ids
			.insert(cc_pair, ids.iter().map(|s| s.to_string()).collect());
	}

	pub fn set_external_groups(&self, cc_pair: ResourceId, groups: Vec<ExternalGroup>) {
		self.state().external_groups.insert(cc_pair, groups);
	}

	/// Make the next `errors.len()` effect applications fail, in order.
	pub fn fail_next_effects(&self, errors: impl IntoIterator<Item = EffectError>) {
		self.state().effect_failures.extend(errors);
	}

	pub fn fail_enumeration(&self, message: &str) {
		self.state().enumeration_failure = Some(message.to_string());
	}

	/// Make resource listing and source enumeration take `latency`.
	pub fn slow_down(&self, latency: Duration) {
		self.state().latency = latency;
	}

	async fn wait_latency(&self) {
		let latency = self.state().latency;
		if !latency.is_zero() {
			tokio::time::sleep(latency).await;
		}
	}

	pub fn documents(&self, cc_pair: ResourceId) -> Vec<String> {
		self.state()
			.documents
			.get(&cc_pair)
			.map(|d| d.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn last_synced(&self, kind: JobKind, id: ResourceId) -> Option<DateTime<Utc>> {
		self.state().last_synced.get(&(kind, id)).copied()
	}

	pub fn has_resource(&self, resource_type: ResourceType, id: ResourceId) -> bool {
		self.state().resources.contains_key(&(resource_type, id))
	}

	pub fn needs_sync(&self, id: ResourceId) -> bool {
		self.state()
			.resources
			.get(&(ResourceType::DocumentSet, id))
			.is_some_and(|r| r.needs_sync)
	}

	pub fn synced_members(&self, set: ResourceId) -> Vec<String> {
		self.state()
			.synced_members
			.get(&set)
			.map(|m| m.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn synced_groups(&self, cc_pair: ResourceId) -> Vec<ExternalGroup> {
		self.state()
			.synced_groups
			.get(&cc_pair)
			.map(|g| g.values().cloned().collect())
			.unwrap_or_default()
	}

	pub fn dirty(&self) -> Vec<(JobKind, ResourceId, String)> {
		self.state().dirty.clone()
	}

	pub fn applied(&self) -> Vec<(JobKind, ResourceId, SubtaskEffect)> {
		self.state().applied.clone()
	}

	fn with_last_synced(state: &CatalogState, kind: JobKind, mut resource: Resource) -> Resource {
		resource.last_synced_at = state.last_synced.get(&(kind, resource.id)).copied();
		resource
	}
}

#[async_trait]
impl ResourceStore for InMemoryCatalog {
	async fn list_resources(&self, kind: JobKind) -> Result<Vec<Resource>> {
		self.wait_latency().await;
		let state = self.state();
		let mut resources: Vec<Resource> = state
			.resources
			.values()
			.filter(|r| r.resource_type == kind.resource_type())
			.map(|r| Self::with_last_synced(&state, kind, r.clone()))
			.collect();
		resources.sort_by_key(|r| r.id);
		Ok(resources)
	}

	async fn get_resource(&self, kind: JobKind, id: ResourceId) -> Result<Option<Resource>> {
		let state = self.state();
		Ok(state
			.resources
			.get(&(kind.resource_type(), id))
			.map(|r| Self::with_last_synced(&state, kind, r.clone())))
	}

	async fn mark_resource_synced(&self, kind: JobKind, id: ResourceId, at: DateTime<Utc>) -> Result<()> {
		let mut state = self.state();
		match kind {
			JobKind::ConnectorDeletion => {
				state.resources.remove(&(kind.resource_type(), id));
				state.documents.remove(&id);
			}
			JobKind::DocumentSetSync => {
				if let Some(r) = state.resources.get_mut(&(kind.resource_type(), id)) {
					r.needs_sync = false;
				}
			}
			JobKind::Pruning | JobKind::ExternalGroupSync => {}
		}
		state.last_synced.insert((kind, id), at);
		Ok(())
	}
}

#[async_trait]
impl ConnectorSource for InMemoryCatalog {
	async fn enumerate_current_ids(&self, resource: &Resource) -> Result<HashSet<String>> {
		self.wait_latency().await;
		let state = self.state();
		if let Some(message) = &state.enumeration_failure {
			return Err(SyncError::Collaborator(message.clone()));
		}
		Ok(state
			.external_ids
			.get(&resource.id)
			.cloned()
			.unwrap_or_default())
	}

	async fn enumerate_external_groups(&self, resource: &Resource) -> Result<Vec<ExternalGroup>> {
		self.wait_latency().await;
		let state = self.state();
		if let Some(message) = &state.enumeration_failure {
			return Err(SyncError::Collaborator(message.clone()));
		}
		Ok(state
			.external_groups
			.get(&resource.id)
			.cloned()
			.unwrap_or_default())
	}
}

#[async_trait]
impl DocumentStore for InMemoryCatalog {
	async fn document_ids(&self, kind: JobKind, resource: &Resource) -> Result<HashSet<String>> {
		let state = self.state();
		let ids = match kind {
			JobKind::Pruning | JobKind::ConnectorDeletion => state.documents.get(&resource.id),
			JobKind::DocumentSetSync => state.set_members.get(&resource.id),
			JobKind::ExternalGroupSync => None,
		};
		Ok(ids.map(|ids| ids.iter().cloned().collect()).unwrap_or_default())
	}

	async fn apply_subtask_effect(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError> {
		let mut state = self.state();
		if let Some(err) = state.effect_failures.pop_front() {
			return Err(err);
		}
		match effect {
			SubtaskEffect::RemoveDocument { document_id } => {
				if let Some(docs) = state.documents.get_mut(&resource_id) {
					docs.remove(document_id);
				}
			}
			SubtaskEffect::UpsertExternalGroup { group } => {
				state
					.synced_groups
					.entry(resource_id)
					.or_default()
					.insert(group.id.clone(), group.clone());
			}
			SubtaskEffect::SyncDocumentSetMembership { document_id } => {
				state
					.synced_members
					.entry(resource_id)
					.or_default()
					.insert(document_id.clone());
			}
		}
		state.applied.push((kind, resource_id, effect.clone()));
		Ok(())
	}

	async fn remove_contribution_and_mark_dirty(
		&self,
		kind: JobKind,
		resource_id: ResourceId,
		effect: &SubtaskEffect,
	) -> std::result::Result<(), EffectError> {
		let mut state = self.state();
		match effect {
			SubtaskEffect::RemoveDocument { document_id } => {
				if let Some(docs) = state.documents.get_mut(&resource_id) {
					docs.remove(document_id);
				}
			}
			SubtaskEffect::UpsertExternalGroup { group } => {
				if let Some(groups) = state.synced_groups.get_mut(&resource_id) {
					groups.remove(&group.id);
				}
			}
			SubtaskEffect::SyncDocumentSetMembership { document_id } => {
				if let Some(members) = state.synced_members.get_mut(&resource_id) {
					members.remove(document_id);
				}
			}
		}
		state
			.dirty
			.push((kind, resource_id, effect.item_id().to_string()));
		Ok(())
	}
}

/// Settings with short waits so tests do not stall on real time.
pub fn test_settings() -> SyncSettings {
	SyncSettings {
		starter_lock_timeout: Duration::from_secs(1),
		fence_wait_timeout: Duration::from_millis(200),
		fence_poll_interval: Duration::from_millis(10),
		effect_retry_delay: Duration::from_millis(1),
		..SyncSettings::default()
	}
}

fn worker_pool(rt: &Arc<SyncRuntime>) -> WorkerPool {
	let mut pool = WorkerPool::new(
		rt.queue.clone(),
		WorkerPoolConfig {
			concurrency: 1,
			queues: registry::queue_names(),
			..Default::default()
		},
	);
	install_handlers(&mut pool, rt);
	pool
}

/// A runtime, worker pool and catalog wired together over in-memory
/// backends, driven by hand with [`TestHarness::drain`].
pub struct TestHarness {
	pub store: Arc<dyn KvStore>,
	pub queue: Arc<dyn TaskQueue>,
	pub catalog: Arc<InMemoryCatalog>,
	pub rt: Arc<SyncRuntime>,
	pub pool: WorkerPool,
}

impl Default for TestHarness {
	fn default() -> Self {
		Self::new()
	}
}

impl TestHarness {
	pub fn new() -> Self {
		Self::with_settings(test_settings())
	}

	pub fn with_settings(settings: SyncSettings) -> Self {
		Self::with_backends(
			Arc::new(MemoryKvStore::new()),
			Arc::new(MemoryTaskQueue::new()),
			settings,
		)
	}

	pub fn with_backends(store: Arc<dyn KvStore>, queue: Arc<dyn TaskQueue>, settings: SyncSettings) -> Self {
		let catalog = Arc::new(InMemoryCatalog::new());
		let rt = Arc::new(SyncRuntime::new(
			store.clone(),
			queue.clone(),
			catalog.collaborators(),
			settings,
		));
		let pool = worker_pool(&rt);
		Self {
			store,
			queue,
			catalog,
			rt,
			pool,
		}
	}

	/// A fresh pool over the same runtime, as a restarted worker would build.
	pub fn worker_pool(&self) -> WorkerPool {
		worker_pool(&self.rt)
	}

	pub fn starter(&self) -> JobStarter {
		JobStarter::new(self.rt.clone())
	}

	pub fn beat(&self) -> BeatScheduler {
		BeatScheduler::new(self.rt.clone())
	}

	pub fn admin(&self) -> JobAdmin {
		JobAdmin::new(self.rt.clone())
	}

	pub fn namespace(&self, kind: JobKind, id: ResourceId) -> SyncNamespace {
		self.rt.namespace(kind, id)
	}

	/// Run queued tasks until none is ready.
	pub async fn drain(&self) -> usize {
		match self.pool.drain().await {
			Ok(n) => n,
			Err(e) => panic!("worker pool failed: {e}"),
		}
	}

	/// Whether any job key (fence, taskset, progress, complete) is present.
	pub async fn has_job_keys(&self, kind: JobKind, id: ResourceId) -> bool {
		let ns = self.namespace(kind, id);
		let check = async {
			Ok::<bool, SyncError>(
				ns.fence.exists().await?
					|| ns.taskset.size().await? > 0
					|| ns.progress.get().await?.is_some()
					|| ns.complete.get().await?.is_some(),
			)
		};
		match check.await {
			Ok(present) => present,
			Err(e) => panic!("kv store failed: {e}"),
		}
	}
}
