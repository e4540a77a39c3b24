// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process task queue. Timing uses the tokio clock.

use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{QueueError, Result};
use crate::message::{Delivery, TaskMessage};
use crate::queue::TaskQueue;

struct Entry {
	seq: i64,
	message: TaskMessage,
	ready_at: Instant,
	claimed_at: Option<Instant>,
}

#[derive(Default)]
struct State {
	next_seq: i64,
	entries: Vec<Entry>,
	closed: bool,
}

#[derive(Default)]
pub struct MemoryTaskQueue {
	state: Mutex<State>,
}

impl MemoryTaskQueue {
	pub fn new() -> Self {
		Self::default()
	}

	fn state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn push(&self, message: TaskMessage, ready_at: Instant) -> Result<()> {
		let mut state = self.state();
		if state.closed {
			return Err(QueueError::Closed);
		}
		state.next_seq += 1;
		let seq = state.next_seq;
		state.entries.push(Entry {
			seq,
			message,
			ready_at,
			claimed_at: None,
		});
		Ok(())
	}

	/// Every message not yet acked, in submission order.
	pub fn messages(&self) -> Vec<TaskMessage> {
		self.state()
			.entries
			.iter()
			.map(|e| e.message.clone())
			.collect()
	}
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
	async fn submit(&self, message: TaskMessage) -> Result<()> {
		self.push(message, Instant::now())
	}

	async fn submit_after(&self, message: TaskMessage, countdown: Duration) -> Result<()> {
		self.push(message, Instant::now() + countdown)
	}

	async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>> {
		let now = Instant::now();
		let mut state = self.state();
		if state.closed {
			return Err(QueueError::Closed);
		}
		let picked = state
			.entries
			.iter_mut()
			.filter(|e| e.claimed_at.is_none() && e.ready_at <= now && queues.contains(&e.message.queue))
			.max_by(|a, b| {
				a.message
					.priority
					.cmp(&b.message.priority)
					.then_with(|| b.seq.cmp(&a.seq))
			});
		Ok(picked.map(|entry| {
			entry.claimed_at = Some(now);
			Delivery {
				message: entry.message.clone(),
				receipt: entry.seq,
			}
		}))
	}

	async fn ack(&self, delivery: &Delivery) -> Result<()> {
		let mut state = self.state();
		let before = state.entries.len();
		state.entries.retain(|e| e.seq != delivery.receipt);
		if state.entries.len() == before {
			return Err(QueueError::UnknownReceipt(delivery.receipt));
		}
		Ok(())
	}

	async fn len(&self, queue: &str) -> Result<u64> {
		Ok(self
			.state()
			.entries
			.iter()
			.filter(|e| e.claimed_at.is_none() && e.message.queue == queue)
			.count() as u64)
	}

	async fn reclaim_expired(&self, visibility: Duration) -> Result<u64> {
		let now = Instant::now();
		let mut reclaimed = 0;
		for entry in self.state().entries.iter_mut() {
			if entry.claimed_at.is_some_and(|at| at + visibility <= now) {
				entry.claimed_at = None;
				reclaimed += 1;
			}
		}
		Ok(reclaimed)
	}

	async fn close(&self) {
		self.state().closed = true;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::Priority;

	fn queues(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn priority_then_fifo() {
		let q = MemoryTaskQueue::new();
		q.submit(TaskMessage::new("low", "t", "q").with_priority(Priority::Low))
			.await
			.unwrap();
		q.submit(TaskMessage::new("m1", "t", "q")).await.unwrap();
		q.submit(TaskMessage::new("high", "t", "q").with_priority(Priority::High))
			.await
			.unwrap();
		q.submit(TaskMessage::new("m2", "t", "q")).await.unwrap();

		let mut order = Vec::new();
		while let Some(d) = q.dequeue(&queues(&["q"])).await.unwrap() {
			order.push(d.message.id.clone());
			q.ack(&d).await.unwrap();
		}
		assert_eq!(order, vec!["high", "m1", "m2", "low"]);
	}

	#[tokio::test]
	async fn only_requested_queues() {
		let q = MemoryTaskQueue::new();
		q.submit(TaskMessage::new("a", "t", "light")).await.unwrap();
		assert!(q.dequeue(&queues(&["heavy"])).await.unwrap().is_none());
		assert!(q.dequeue(&queues(&["heavy", "light"])).await.unwrap().is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn countdown_delays_visibility() {
		let q = MemoryTaskQueue::new();
		q.submit_after(TaskMessage::new("later", "t", "q"), Duration::from_secs(16))
			.await
			.unwrap();
		assert_eq!(q.len("q").await.unwrap(), 1);
		assert!(q.dequeue(&queues(&["q"])).await.unwrap().is_none());
		tokio::time::advance(Duration::from_secs(16)).await;
		assert!(q.dequeue(&queues(&["q"])).await.unwrap().is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn unacked_claims_are_reclaimed() {
		let q = MemoryTaskQueue::new();
		q.submit(TaskMessage::new("a", "t", "q")).await.unwrap();
		let first = q.dequeue(&queues(&["q"])).await.unwrap().unwrap();
		assert!(q.dequeue(&queues(&["q"])).await.unwrap().is_none());
		assert_eq!(q.len("q").await.unwrap(), 0);

		tokio::time::advance(Duration::from_secs(30)).await;
		assert_eq!(q.reclaim_expired(Duration::from_secs(60)).await.unwrap(), 0);
		tokio::time::advance(Duration::from_secs(30)).await;
		assert_eq!(q.reclaim_expired(Duration::from_secs(60)).await.unwrap(), 1);

		let again = q.dequeue(&queues(&["q"])).await.unwrap().unwrap();
		assert_eq!(again.message.id, first.message.id);
	}

	#[tokio::test]
	async fn ack_unknown_receipt_fails() {
		let q = MemoryTaskQueue::new();
		q.submit(TaskMessage::new("a", "t", "q")).await.unwrap();
		let d = q.dequeue(&queues(&["q"])).await.unwrap().unwrap();
		q.ack(&d).await.unwrap();
		assert!(matches!(q.ack(&d).await, Err(QueueError::UnknownReceipt(_))));
	}

	#[tokio::test]
	async fn closed_queue_rejects_submissions() {
		let q = MemoryTaskQueue::new();
		q.close().await;
		assert!(matches!(
			q.submit(TaskMessage::new("a", "t", "q")).await,
			Err(QueueError::Closed)
		));
	}
}
