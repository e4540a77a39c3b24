// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared task queue and worker pool.
//!
//! Producers submit [`TaskMessage`]s by name onto named queues with a priority
//! tier. A [`WorkerPool`] pulls from a set of queues, dispatches each message
//! to its registered [`TaskHandler`], re-submits retries with a countdown, and
//! reports every terminal outcome to a single [`CompletionHook`].

pub mod backoff;
pub mod context;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod queue;
pub mod sqlite;
pub mod worker;

pub use backoff::{calculate_backoff_delay, BackoffPolicy};
pub use context::TaskContext;
pub use error::{QueueError, Result};
pub use handler::{CompletionHook, FinishedTask, TaskError, TaskHandler, TaskOutput, TaskState};
pub use memory::MemoryTaskQueue;
pub use message::{Delivery, Priority, TaskMessage};
pub use queue::TaskQueue;
pub use sqlite::SqliteTaskQueue;
pub use tokio_util::sync::CancellationToken;
pub use worker::{WorkerPool, WorkerPoolConfig};
