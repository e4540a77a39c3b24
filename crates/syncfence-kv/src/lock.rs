// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Advisory TTL lock with an owner token.
//!
//! The lock is a string key holding a random token. Ownership is only ever
//! changed by compare-and-swap on that token, so a holder whose TTL lapsed
//! can never release or extend a lock that someone else now holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::store::KvStore;

const POLL_MIN: Duration = Duration::from_millis(50);
const POLL_JITTER_MS: u64 = 150;

pub struct KvLock {
	store: Arc<dyn KvStore>,
	key: String,
	token: String,
	ttl: Duration,
	owned: AtomicBool,
}

impl std::fmt::Debug for KvLock {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KvLock")
			.field("key", &self.key)
			.field("ttl", &self.ttl)
			.field("owned", &self.owned.load(Ordering::SeqCst))
			.finish()
	}
}

impl KvLock {
	pub fn new(store: Arc<dyn KvStore>, key: impl Into<String>, ttl: Duration) -> Self {
		Self {
			store,
			key: key.into(),
			token: Uuid::new_v4().to_string(),
			ttl,
			owned: AtomicBool::new(false),
		}
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Try to take the lock.
	///
	/// Non-blocking acquisition makes one attempt. Blocking acquisition polls
	/// with a jittered interval until `timeout` elapses.
	pub async fn acquire(&self, blocking: bool, timeout: Duration) -> Result<bool> {
		let deadline = Instant::now() + timeout;
		loop {
			if self
				.store
				.set_nx(&self.key, &self.token, Some(self.ttl))
				.await?
			{
				self.owned.store(true, Ordering::SeqCst);
				debug!(key = %self.key, "lock acquired");
				return Ok(true);
			}

			let now = Instant::now();
			if !blocking || now >= deadline {
				debug!(key = %self.key, blocking, "lock not acquired");
				return Ok(false);
			}

			let pause = POLL_MIN + Duration::from_millis(fastrand::u64(0..=POLL_JITTER_MS));
			tokio::time::sleep(pause.min(deadline - now)).await;
		}
	}

	/// Extend the TTL while still owned. Returns false once ownership is lost.
	pub async fn reacquire(&self) -> Result<bool> {
		let extended = self
			.store
			.expire_if_eq(&self.key, &self.token, self.ttl)
			.await?;
		if !extended {
			self.owned.store(false, Ordering::SeqCst);
			warn!(key = %self.key, "lock ownership lost");
		}
		Ok(extended)
	}

	/// Release the lock if this handle still owns it.
	pub async fn release(&self) -> Result<()> {
		if !self.owned.swap(false, Ordering::SeqCst) {
			return Ok(());
		}
		if !self.store.delete_if_eq(&self.key, &self.token).await? {
			debug!(key = %self.key, "lock already expired or taken over at release");
		}
		Ok(())
	}

	/// Whether the store still holds this handle's token.
	pub async fn owned(&self) -> Result<bool> {
		if !self.owned.load(Ordering::SeqCst) {
			return Ok(false);
		}
		let current = self.store.get(&self.key).await?;
		Ok(current.as_deref() == Some(self.token.as_str()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::MemoryKvStore;

	fn store() -> Arc<dyn KvStore> {
		Arc::new(MemoryKvStore::new())
	}

	#[tokio::test(start_paused = true)]
	async fn only_one_holder() {
		let store = store();
		let a = KvLock::new(store.clone(), "l", Duration::from_secs(30));
		let b = KvLock::new(store.clone(), "l", Duration::from_secs(30));

		assert!(a.acquire(false, Duration::ZERO).await.unwrap());
		assert!(!b.acquire(false, Duration::ZERO).await.unwrap());
		assert!(a.owned().await.unwrap());
		assert!(!b.owned().await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn blocking_acquire_waits_for_release() {
		let store = store();
		let a = Arc::new(KvLock::new(store.clone(), "l", Duration::from_secs(30)));
		let b = KvLock::new(store.clone(), "l", Duration::from_secs(30));
		assert!(a.acquire(false, Duration::ZERO).await.unwrap());

		let holder = a.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(2)).await;
			holder.release().await.unwrap();
		});

		assert!(b.acquire(true, Duration::from_secs(10)).await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn blocking_acquire_times_out() {
		let store = store();
		let a = KvLock::new(store.clone(), "l", Duration::from_secs(300));
		let b = KvLock::new(store.clone(), "l", Duration::from_secs(300));
		assert!(a.acquire(false, Duration::ZERO).await.unwrap());

		let started = Instant::now();
		assert!(!b.acquire(true, Duration::from_secs(5)).await.unwrap());
		assert!(started.elapsed() >= Duration::from_secs(5));
		assert!(started.elapsed() < Duration::from_secs(6));
	}

	#[tokio::test(start_paused = true)]
	async fn reacquire_extends_ttl() {
		let store = store();
		let lock = KvLock::new(store.clone(), "l", Duration::from_secs(10));
		assert!(lock.acquire(false, Duration::ZERO).await.unwrap());

		for _ in 0..5 {
			tokio::time::advance(Duration::from_secs(6)).await;
			assert!(lock.reacquire().await.unwrap());
		}
		assert!(lock.owned().await.unwrap());
	}

	#[tokio::test(start_paused = true)]
	async fn expired_holder_cannot_release_new_owner() {
		let store = store();
		let a = KvLock::new(store.clone(), "l", Duration::from_secs(10));
		let b = KvLock::new(store.clone(), "l", Duration::from_secs(10));
		assert!(a.acquire(false, Duration::ZERO).await.unwrap());

		tokio::time::advance(Duration::from_secs(11)).await;
		assert!(b.acquire(false, Duration::ZERO).await.unwrap());

		assert!(!a.reacquire().await.unwrap());
		a.release().await.unwrap();
		assert!(b.owned().await.unwrap());
	}

	#[tokio::test]
	async fn release_without_acquire_is_noop() {
		let store = store();
		let a = KvLock::new(store.clone(), "l", Duration::from_secs(10));
		let b = KvLock::new(store.clone(), "l", Duration::from_secs(10));
		assert!(b.acquire(false, Duration::ZERO).await.unwrap());
		a.release().await.unwrap();
		assert!(b.owned().await.unwrap());
	}
}
