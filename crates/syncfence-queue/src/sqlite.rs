// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SQLite-backed task queue shared by every worker pointed at the same file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::instrument;

use crate::error::{QueueError, Result};
use crate::message::{Delivery, Priority, TaskMessage};
use crate::queue::TaskQueue;

type TaskRow = (i64, String, String, String, i64, String, i64, Option<i64>);

fn now_ms() -> i64 {
	Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
	i64::try_from(d.as_millis()).unwrap_or(i64::MAX / 2)
}

pub struct SqliteTaskQueue {
	pool: SqlitePool,
	worker_id: String,
	closed: AtomicBool,
}

impl SqliteTaskQueue {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			worker_id: uuid::Uuid::new_v4().to_string(),
			closed: AtomicBool::new(false),
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	#[instrument(skip(self))]
	pub async fn ensure_schema(&self) -> Result<()> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS task_queue (
				seq INTEGER PRIMARY KEY AUTOINCREMENT,
				task_id TEXT NOT NULL,
				name TEXT NOT NULL,
				queue TEXT NOT NULL,
				priority INTEGER NOT NULL,
				kwargs TEXT NOT NULL,
				retries INTEGER NOT NULL DEFAULT 0,
				soft_time_limit_ms INTEGER,
				ready_at INTEGER NOT NULL,
				claimed_at INTEGER,
				claimed_by TEXT
			)
			"#,
		)
		.execute(&self.pool)
		.await?;

		sqlx::query(
			r#"
			CREATE INDEX IF NOT EXISTS idx_task_queue_ready
			ON task_queue (queue, claimed_at, ready_at, priority DESC, seq)
			"#,
		)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	fn ensure_open(&self) -> Result<()> {
		if self.closed.load(Ordering::SeqCst) {
			return Err(QueueError::Closed);
		}
		Ok(())
	}

	async fn insert(&self, message: TaskMessage, ready_at: i64) -> Result<()> {
		self.ensure_open()?;
		let kwargs = serde_json::to_string(&message.kwargs)?;
		sqlx::query(
			r#"
			INSERT INTO task_queue
				(task_id, name, queue, priority, kwargs, retries, soft_time_limit_ms, ready_at)
			VALUES (?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(&message.id)
		.bind(&message.name)
		.bind(&message.queue)
		.bind(message.priority.as_i64())
		.bind(kwargs)
		.bind(i64::from(message.retries))
		.bind(message.soft_time_limit.map(duration_ms))
		.bind(ready_at)
		.execute(&self.pool)
		.await?;
		Ok(())
	}
}

fn row_to_delivery(row: TaskRow) -> Result<Delivery> {
	let (seq, task_id, name, queue, priority, kwargs, retries, soft_limit_ms) = row;
	Ok(Delivery {
		message: TaskMessage {
			id: task_id,
			name,
			queue,
			priority: Priority::from_i64(priority),
			kwargs: serde_json::from_str(&kwargs)?,
			retries: u32::try_from(retries).unwrap_or(u32::MAX),
			soft_time_limit: soft_limit_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
		},
		receipt: seq,
	})
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
	#[instrument(skip(self, message), fields(task_id = %message.id, name = %message.name))]
	async fn submit(&self, message: TaskMessage) -> Result<()> {
		self.insert(message, now_ms()).await
	}

	#[instrument(skip(self, message), fields(task_id = %message.id, name = %message.name))]
	async fn submit_after(&self, message: TaskMessage, countdown: Duration) -> Result<()> {
		self.insert(message, now_ms() + duration_ms(countdown)).await
	}

	#[instrument(skip(self))]
	async fn dequeue(&self, queues: &[String]) -> Result<Option<Delivery>> {
		self.ensure_open()?;
		if queues.is_empty() {
			return Ok(None);
		}

		let placeholders = vec!["?"; queues.len()].join(", ");
		let sql = format!(
			r#"
			UPDATE task_queue SET claimed_at = ?, claimed_by = ?
			WHERE seq = (
				SELECT seq FROM task_queue
				WHERE claimed_at IS NULL AND ready_at <= ? AND queue IN ({placeholders})
				ORDER BY priority DESC, seq ASC
				LIMIT 1
			)
			RETURNING seq, task_id, name, queue, priority, kwargs, retries, soft_time_limit_ms
			"#
		);

		let now = now_ms();
		let mut query = sqlx::query_as::<_, TaskRow>(&sql)
			.bind(now)
			.bind(&self.worker_id)
			.bind(now);
		for queue in queues {
			query = query.bind(queue);
		}

		match query.fetch_optional(&self.pool).await? {
			Some(row) => Ok(Some(row_to_delivery(row)?)),
			None => Ok(None),
		}
	}

	#[instrument(skip(self, delivery), fields(task_id = %delivery.message.id))]
	async fn ack(&self, delivery: &Delivery) -> Result<()> {
		let result = sqlx::query("DELETE FROM task_queue WHERE seq = ?")
			.bind(delivery.receipt)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(QueueError::UnknownReceipt(delivery.receipt));
		}
		Ok(())
	}

	#[instrument(skip(self))]
	async fn len(&self, queue: &str) -> Result<u64> {
		let (count,): (i64,) =
			sqlx::query_as("SELECT COUNT(*) FROM task_queue WHERE queue = ? AND claimed_at IS NULL")
				.bind(queue)
				.fetch_one(&self.pool)
				.await?;
		Ok(count.max(0) as u64)
	}

	#[instrument(skip(self))]
	async fn reclaim_expired(&self, visibility: Duration) -> Result<u64> {
		let cutoff = now_ms() - duration_ms(visibility);
		let result = sqlx::query(
			r#"
			UPDATE task_queue SET claimed_at = NULL, claimed_by = NULL
			WHERE claimed_at IS NOT NULL AND claimed_at <= ?
			"#,
		)
		.bind(cutoff)
		.execute(&self.pool)
		.await?;
		Ok(result.rows_affected())
	}

	async fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.pool.close().await;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use sqlx::sqlite::SqlitePoolOptions;

	async fn make_queue() -> SqliteTaskQueue {
		let pool = SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.unwrap();
		let queue = SqliteTaskQueue::new(pool);
		queue.ensure_schema().await.unwrap();
		queue
	}

	fn queues(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	#[tokio::test]
	async fn priority_then_fifo() {
		let q = make_queue().await;
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
	async fn message_fields_survive_storage() {
		let q = make_queue().await;
		let msg = TaskMessage::new("id", "prune_document_task", "light")
			.with_kwargs(serde_json::json!({"resource_id": 4, "document_id": "doc-1"}))
			.with_soft_time_limit(Some(Duration::from_secs(105)))
			.next_attempt();
		q.submit(msg.clone()).await.unwrap();

		let d = q.dequeue(&queues(&["light"])).await.unwrap().unwrap();
		assert_eq!(d.message, msg);
	}

	#[tokio::test]
	async fn countdown_hides_message() {
		let q = make_queue().await;
		q.submit_after(TaskMessage::new("later", "t", "q"), Duration::from_secs(3600))
			.await
			.unwrap();
		assert_eq!(q.len("q").await.unwrap(), 1);
		assert!(q.dequeue(&queues(&["q"])).await.unwrap().is_none());
	}

	#[tokio::test]
	async fn claims_are_exclusive_until_reclaimed() {
		let q = make_queue().await;
		q.submit(TaskMessage::new("a", "t", "q")).await.unwrap();
		let first = q.dequeue(&queues(&["q"])).await.unwrap().unwrap();
		assert!(q.dequeue(&queues(&["q"])).await.unwrap().is_none());

		assert_eq!(q.reclaim_expired(Duration::from_secs(3600)).await.unwrap(), 0);
		assert_eq!(q.reclaim_expired(Duration::ZERO).await.unwrap(), 1);

		let again = q.dequeue(&queues(&["q"])).await.unwrap().unwrap();
		assert_eq!(again.message.id, first.message.id);
		q.ack(&again).await.unwrap();
		assert!(matches!(
			q.ack(&again).await,
			Err(QueueError::UnknownReceipt(_))
		));
	}
}
