// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::message::{Delivery, TaskMessage};

/// Shared work queue.
///
/// Delivery is at-least-once: a claimed message that is never acked becomes
/// visible again after [`TaskQueue::reclaim_expired`]. Among ready messages in
/// the requested queues the highest priority wins, FIFO within a tier.
#[async_trait]
pub trait TaskQueue: Send + Sync {
	async fn submit(&self, message: TaskMessage) -> Result<()>;

	/// Submit a message that becomes visible after `countdown`.
	async fn submit_after(&self, message: TaskMessage, countdown: Duration) -> Result<()>;

	async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>>;

	async fn ack(&self, delivery: &Delivery) -> Result<()>;

	/// Messages waiting (ready or delayed, not claimed) on `queue`.
	async fn len(&self, queue: &str) -> Result<u64>;

	/// Return claims older than `visibility` to the queue.
	async fn reclaim_expired(&self, visibility: Duration) -> Result<u64>;

	async fn close(&self) {}
}
