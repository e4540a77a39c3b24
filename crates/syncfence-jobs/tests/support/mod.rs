// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Backends that fail or observe on demand.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncfence_core::TaskId;
use syncfence_jobs::registry;
use syncfence_kv::{KeySpace, KvError, KvStore, MemoryKvStore};
use syncfence_queue::{Delivery, MemoryTaskQueue, QueueError, TaskMessage, TaskQueue};

/// A memory store whose `sadd` fails once a budget of successful calls is
/// spent.
pub struct FlakyKv {
	inner: MemoryKvStore,
	sadd_budget: AtomicUsize,
	failing: AtomicBool,
}

impl FlakyKv {
	pub fn new() -> Self {
		Self {
			inner: MemoryKvStore::new(),
			sadd_budget: AtomicUsize::new(usize::MAX),
			failing: AtomicBool::new(false),
		}
	}

	/// Let `n` more `sadd` calls succeed, then fail every one after.
	pub fn fail_sadd_after(&self, n: usize) {
		self.sadd_budget.store(n, Ordering::SeqCst);
		self.failing.store(true, Ordering::SeqCst);
	}

	pub fn heal(&self) {
		self.failing.store(false, Ordering::SeqCst);
	}
}

#[async_trait]
impl KvStore for FlakyKv {
	async fn ping(&self) -> syncfence_kv::Result<()> {
		self.inner.ping().await
	}

	async fn get(&self, key: &str) -> syncfence_kv::Result<Option<String>> {
		self.inner.get(key).await
	}

	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> syncfence_kv::Result<()> {
		self.inner.set(key, value, ttl).await
	}

	async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> syncfence_kv::Result<bool> {
		self.inner.set_nx(key, value, ttl).await
	}

	async fn delete(&self, key: &str) -> syncfence_kv::Result<bool> {
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> syncfence_kv::Result<bool> {
		self.inner.exists(key).await
	}

	async fn delete_if_eq(&self, key: &str, expected: &str) -> syncfence_kv::Result<bool> {
		self.inner.delete_if_eq(key, expected).await
	}

	async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> syncfence_kv::Result<bool> {
		self.inner.expire_if_eq(key, expected, ttl).await
	}

	async fn incr_by(&self, key: &str, delta: i64) -> syncfence_kv::Result<i64> {
		self.inner.incr_by(key, delta).await
	}

	async fn sadd(&self, key: &str, member: &str) -> syncfence_kv::Result<bool> {
		if self.failing.load(Ordering::SeqCst) {
			let left = self.sadd_budget.load(Ordering::SeqCst);
			if left == 0 {
				return Err(KvError::Unavailable {
					attempts: 1,
					message: "connection reset".to_string(),
				});
			}
			self.sadd_budget.store(left - 1, Ordering::SeqCst);
		}
		self.inner.sadd(key, member).await
	}

	async fn srem(&self, key: &str, member: &str) -> syncfence_kv::Result<bool> {
		self.inner.srem(key, member).await
	}

	async fn scard(&self, key: &str) -> syncfence_kv::Result<u64> {
		self.inner.scard(key).await
	}

	async fn smembers(&self, key: &str) -> syncfence_kv::Result<Vec<String>> {
		self.inner.smembers(key).await
	}

	async fn keys_with_prefix(&self, prefix: &str) -> syncfence_kv::Result<Vec<String>> {
		self.inner.keys_with_prefix(prefix).await
	}
}

/// A memory queue that checks, for every subtask submission, that the
/// subtask id is already in its taskset.
pub struct RecordingQueue {
	inner: MemoryTaskQueue,
	store: Arc<dyn KvStore>,
	keys: KeySpace,
	violations: Mutex<Vec<String>>,
	subtask_submissions: AtomicUsize,
	reject_subtasks_after: Mutex<Option<usize>>,
}

impl RecordingQueue {
	pub fn new(store: Arc<dyn KvStore>) -> Self {
		Self {
			inner: MemoryTaskQueue::new(),
			store,
			keys: KeySpace::default(),
			violations: Mutex::new(Vec::new()),
			subtask_submissions: AtomicUsize::new(0),
			reject_subtasks_after: Mutex::new(None),
		}
	}

	/// Accept `n` more subtask submissions, then reject every one after.
	pub fn reject_subtasks_after(&self, n: usize) {
		*self.reject_subtasks_after.lock().unwrap() = Some(n);
	}

	pub fn violations(&self) -> Vec<String> {
		self.violations.lock().unwrap().clone()
	}

	pub fn subtask_submissions(&self) -> usize {
		self.subtask_submissions.load(Ordering::SeqCst)
	}

	async fn observe(&self, message: &TaskMessage) -> syncfence_queue::Result<()> {
		let Some((spec, task_id)) = registry::resolve(&message.id) else {
			return Ok(());
		};
		if !spec.is_subtask(&message.name) || message.retries > 0 {
			return Ok(());
		}

		{
			let mut reject = self.reject_subtasks_after.lock().unwrap();
			if let Some(left) = reject.as_mut() {
				if *left == 0 {
					return Err(QueueError::Internal("broker unavailable".to_string()));
				}
				*left -= 1;
			}
		}

		let TaskId {
			kind, resource_id, ..
		} = task_id;
		let members = self
			.store
			.smembers(&self.keys.taskset(kind, resource_id))
			.await
			.map_err(|e| QueueError::Internal(e.to_string()))?;
		if !members.contains(&message.id) {
			self.violations.lock().unwrap().push(message.id.clone());
		}
		self.subtask_submissions.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}
}

#[async_trait]
impl TaskQueue for RecordingQueue {
	async fn submit(&self, message: TaskMessage) -> syncfence_queue::Result<()> {
		self.observe(&message).await?;
		self.inner.submit(message).await
	}

	async fn submit_after(&self, message: TaskMessage, countdown: Duration) -> syncfence_queue::Result<()> {
		self.observe(&message).await?;
		self.inner.submit_after(message, countdown).await
	}

	async fn dequeue(&self, queues: &[String]) -> syncfence_queue::Result<Option<Delivery>> {
		self.inner.dequeue(queues).await
	}

	async fn ack(&self, delivery: &Delivery) -> syncfence_queue::Result<()> {
		self.inner.ack(delivery).await
	}

	async fn len(&self, queue: &str) -> syncfence_queue::Result<u64> {
		self.inner.len(queue).await
	}

	async fn reclaim_expired(&self, visibility: Duration) -> syncfence_queue::Result<u64> {
		self.inner.reclaim_expired(visibility).await
	}
}
