// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Guaranteed release and cleanup on every exit path.

use futures::FutureExt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use syncfence_kv::KvLock;
use tracing::warn;

use crate::error::Result;

/// Run `body` while holding an already-acquired `lock`, then release it
/// whether `body` returned, failed or panicked.
pub async fn with_held_lock<T, F, Fut>(lock: &KvLock, body: F) -> Result<T>
where
	F: FnOnce() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let outcome = AssertUnwindSafe(body()).catch_unwind().await;

	if let Err(e) = lock.release().await {
		warn!(key = lock.key(), error = %e, "Failed to release lock");
	}

	match outcome {
		Ok(result) => result,
		Err(panic) => resume_unwind(panic),
	}
}

/// Run `body`; if it fails or panics, run `cleanup` before surfacing the
/// original error. Cleanup failures are logged, never returned.
pub async fn run_with_cleanup<T, B, C, CFut>(body: B, cleanup: C) -> Result<T>
where
	B: Future<Output = Result<T>>,
	C: FnOnce() -> CFut,
	CFut: Future<Output = Result<()>>,
{
	match AssertUnwindSafe(body).catch_unwind().await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => {
			if let Err(cleanup_err) = cleanup().await {
				warn!(error = %cleanup_err, original = %e, "Cleanup after failure failed");
			}
			Err(e)
		}
		Err(panic) => {
			if let Err(cleanup_err) = cleanup().await {
				warn!(error = %cleanup_err, "Cleanup after panic failed");
			}
			resume_unwind(panic)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::SyncError;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::sync::Arc;
	use std::time::Duration;
	use syncfence_kv::{KvStore, MemoryKvStore};

	fn lock(store: &Arc<dyn KvStore>) -> KvLock {
		KvLock::new(store.clone(), "guarded", Duration::from_secs(30))
	}

	#[tokio::test]
	async fn lock_released_after_error() {
		let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		let l = lock(&store);
		assert!(l.acquire(false, Duration::ZERO).await.unwrap());

		let result: Result<()> = with_held_lock(&l, || async {
			Err(SyncError::Collaborator("boom".to_string()))
		})
		.await;

		assert!(result.is_err());
		assert!(!store.exists("guarded").await.unwrap());
	}

	#[tokio::test]
	async fn lock_released_after_panic() {
		let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
		let l = Arc::new(lock(&store));
		assert!(l.acquire(false, Duration::ZERO).await.unwrap());

		let held = l.clone();
		let joined = tokio::spawn(async move {
			with_held_lock(&held, || async {
				if held.key() == "guarded" {
					panic!("body panicked");
				}
				Ok(())
			})
			.await
		})
		.await;

		assert!(joined.unwrap_err().is_panic());
		assert!(!store.exists("guarded").await.unwrap());
	}

	#[tokio::test]
	async fn cleanup_runs_only_on_failure() {
		let cleaned = AtomicBool::new(false);

		let ok: Result<u32> = run_with_cleanup(async { Ok(7) }, || async {
			cleaned.store(true, Ordering::SeqCst);
			Ok(())
		})
		.await;
		assert_eq!(ok.unwrap(), 7);
		assert!(!cleaned.load(Ordering::SeqCst));

		let err: Result<u32> = run_with_cleanup(
			async { Err(SyncError::Collaborator("boom".to_string())) },
			|| async {
				cleaned.store(true, Ordering::SeqCst);
				Ok(())
			},
		)
		.await;
		assert!(matches!(err, Err(SyncError::Collaborator(_))));
		assert!(cleaned.load(Ordering::SeqCst));
	}

	#[tokio::test]
	async fn cleanup_failure_keeps_original_error() {
		let err: Result<()> = run_with_cleanup(
			async { Err(SyncError::Collaborator("original".to_string())) },
			|| async { Err(SyncError::Collaborator("cleanup".to_string())) },
		)
		.await;
		match err {
			Err(SyncError::Collaborator(m)) => assert_eq!(m, "original"),
			other => panic!("unexpected {other:?}"),
		}
	}
}
