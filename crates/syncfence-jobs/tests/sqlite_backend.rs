// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Jobs over the SQLite KV store, task queue and catalog sharing one file.

use std::sync::Arc;
use syncfence_core::{JobKind, Resource, ResourceId, ResourceType};
use syncfence_jobs::testing::test_settings;
use syncfence_jobs::{install_handlers, registry, BeatScheduler, SqliteCatalog, SyncRuntime};
use syncfence_kv::{create_pool, SqliteKvStore};
use syncfence_queue::{SqliteTaskQueue, WorkerPool, WorkerPoolConfig};

struct Backend {
	_dir: tempfile::TempDir,
	catalog: Arc<SqliteCatalog>,
	rt: Arc<SyncRuntime>,
	pool: WorkerPool,
}

async fn backend() -> Backend {
	let dir = tempfile::tempdir().unwrap();
	let url = format!("sqlite://{}", dir.path().join("sync.db").display());
	let db = create_pool(&url).await.unwrap();

	let store = SqliteKvStore::new(db.clone());
	store.ensure_schema().await.unwrap();
	let queue = SqliteTaskQueue::new(db.clone());
	queue.ensure_schema().await.unwrap();
	let catalog = Arc::new(SqliteCatalog::new(db));
	catalog.ensure_schema().await.unwrap();

	let collaborators = catalog.collaborators();
	let queue = Arc::new(queue);
	let rt = Arc::new(SyncRuntime::new(
		Arc::new(store),
		queue.clone(),
		collaborators,
		test_settings(),
	));
	let mut pool = WorkerPool::new(
		queue,
		WorkerPoolConfig {
			queues: registry::queue_names(),
			..Default::default()
		},
	);
	install_handlers(&mut pool, &rt);

	Backend {
		_dir: dir,
		catalog,
		rt,
		pool,
	}
}

/// Tests a pruning job against the persistent backends.
///
/// Purpose: Verify that the fence, taskset and queue round-trip through
/// SQLite and the job finalizes.
#[tokio::test]
async fn test_pruning_over_sqlite() {
	let b = backend().await;
	let mut cc_pair = Resource::new(
		ResourceId(1),
		ResourceType::ConnectorCredentialPair,
		chrono::Utc::now() - chrono::Duration::hours(2),
	);
	cc_pair.sync_period_secs = Some(3600);
	b.catalog.upsert_resource(&cc_pair).await.unwrap();
	b.catalog.add_documents(ResourceId(1), &["a", "b", "c"]).await.unwrap();
	b.catalog.set_source_ids(ResourceId(1), &["b"]).await.unwrap();

	let report = BeatScheduler::new(b.rt.clone())
		.run_pass(JobKind::Pruning)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(report.started, 1);

	assert_eq!(b.pool.drain().await.unwrap(), 3);

	let ns = b.rt.namespace(JobKind::Pruning, ResourceId(1));
	assert!(!ns.fence.exists().await.unwrap());
	assert_eq!(ns.taskset.size().await.unwrap(), 0);

	let resource = b
		.rt
		.resources
		.get_resource(JobKind::Pruning, ResourceId(1))
		.await
		.unwrap()
		.unwrap();
	assert!(resource.last_synced_at.is_some());
	let remaining = b
		.rt
		.documents
		.document_ids(JobKind::Pruning, &resource)
		.await
		.unwrap();
	assert_eq!(remaining.into_iter().collect::<Vec<_>>(), vec!["b".to_string()]);
}

/// Tests that a second process sees the first one's fence.
///
/// Purpose: Verify that admission is excluded across runtimes sharing the
/// database.
#[tokio::test]
async fn test_fence_is_shared_across_runtimes() {
	let b = backend().await;
	let mut cc_pair = Resource::new(
		ResourceId(2),
		ResourceType::ConnectorCredentialPair,
		chrono::Utc::now() - chrono::Duration::hours(2),
	);
	cc_pair.sync_period_secs = Some(3600);
	b.catalog.upsert_resource(&cc_pair).await.unwrap();

	let first = syncfence_jobs::JobStarter::new(b.rt.clone());
	assert!(first
		.try_creating_task(JobKind::Pruning, ResourceId(2), None)
		.await
		.unwrap()
		.is_started());

	let other = Arc::new(SyncRuntime::new(
		b.rt.store.clone(),
		b.rt.queue.clone(),
		syncfence_jobs::Collaborators {
			resources: b.catalog.clone(),
			connectors: b.catalog.clone(),
			documents: b.catalog.clone(),
		},
		test_settings(),
	));
	let second = syncfence_jobs::JobStarter::new(other);
	assert!(!second
		.try_creating_task(JobKind::Pruning, ResourceId(2), None)
		.await
		.unwrap()
		.is_started());
}
