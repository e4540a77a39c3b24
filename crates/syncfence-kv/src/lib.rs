// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared KV coordinator primitives.
//!
//! All cross-process coordination goes through a [`KvStore`]: single-key
//! operations with optional TTLs plus set membership. On top of it this crate
//! builds the per-(kind, resource) primitives used by the job runtime:
//!
//! - [`Fence`]: "a job of this kind is in flight for this resource"
//! - [`Taskset`]: outstanding subtask ids
//! - [`Counter`]: generator progress and the generation-complete marker
//! - [`StopFence`]: out-of-band cancellation
//! - [`KvLock`]: advisory TTL lock with owner token and manual renewal
//!
//! There are no multi-key transactions. Callers keep invariants by the order in
//! which they issue single-key operations.

pub mod error;
pub mod keys;
pub mod lock;
pub mod memory;
pub mod namespace;
pub mod sqlite;
pub mod store;

pub use error::{KvError, Result};
pub use keys::KeySpace;
pub use lock::KvLock;
pub use memory::MemoryKvStore;
pub use namespace::{Counter, Fence, StopFence, SyncNamespace, Taskset};
pub use sqlite::{create_pool, SqliteKvStore};
pub use store::{wait_for_store, KvStore};
