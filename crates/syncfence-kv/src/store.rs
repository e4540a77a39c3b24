// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The shared KV store abstraction.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{KvError, Result};

/// A shared, low-latency key-value store.
///
/// Each method is one round trip and is atomic with respect to its single key.
/// String keys and set keys live in separate namespaces of the same keyspace:
/// using a set operation on a string key is a [`KvError::WrongType`] where the
/// backend can detect it.
#[async_trait]
pub trait KvStore: Send + Sync {
	async fn ping(&self) -> Result<()>;

	async fn get(&self, key: &str) -> Result<Option<String>>;

	/// Fails with `WrongType` if `key` holds a set.
	async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

	/// Set only if the key is absent (or expired). Returns whether it was set.
	/// Fails with `WrongType` if `key` holds a set.
	async fn set_nx(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

	/// Delete a string or set key. Returns whether anything was removed.
	async fn delete(&self, key: &str) -> Result<bool>;

	async fn exists(&self, key: &str) -> Result<bool>;

	/// Delete the key only while it still holds `expected`.
	async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool>;

	/// Reset the TTL only while the key still holds `expected`.
	async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

	/// Add `delta` to an integer key, creating it at zero. Returns the new value.
	async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

	/// Add a set member. Returns whether the member was new.
	async fn sadd(&self, key: &str, member: &str) -> Result<bool>;

	/// Remove a set member. Removing a non-member is a no-op returning false.
	async fn srem(&self, key: &str, member: &str) -> Result<bool>;

	async fn scard(&self, key: &str) -> Result<u64>;

	async fn smembers(&self, key: &str) -> Result<Vec<String>>;

	/// All live keys (string or set) starting with `prefix`.
	async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

	/// Release backend resources at shutdown.
	async fn close(&self) {}
}

/// Ping the store until it answers, giving up after `attempts` tries.
pub async fn wait_for_store(store: &dyn KvStore, attempts: u32, delay: Duration) -> Result<()> {
	let attempts = attempts.max(1);
	let mut last_error = String::new();

	for attempt in 1..=attempts {
		match store.ping().await {
			Ok(()) => {
				info!(attempt, "KV store reachable");
				return Ok(());
			}
			Err(e) => {
				warn!(attempt, attempts, error = %e, "KV store not reachable yet");
				last_error = e.to_string();
			}
		}
		if attempt < attempts {
			tokio::time::sleep(delay).await;
		}
	}

	Err(KvError::Unavailable {
		attempts,
		message: last_error,
	})
}
