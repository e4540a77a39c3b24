// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Worker pool: pulls messages, dispatches them by name, applies retry and
//! soft time limit rules, and fires the completion hook on terminal states.

use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::context::TaskContext;
use crate::error::Result;
use crate::handler::{CompletionHook, FinishedTask, TaskError, TaskHandler, TaskState};
use crate::message::{Delivery, TaskMessage};
use crate::queue::TaskQueue;

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
	pub concurrency: usize,
	pub queues: Vec<String>,
	pub poll_interval: Duration,
	pub visibility_timeout: Duration,
	pub reclaim_interval: Duration,
	/// Applied to `TaskError::Failed { retryable: true }`.
	pub retry_policy: BackoffPolicy,
}

impl Default for WorkerPoolConfig {
	fn default() -> Self {
		Self {
			concurrency: 4,
			queues: Vec::new(),
			poll_interval: Duration::from_millis(500),
			visibility_timeout: Duration::from_secs(3600),
			reclaim_interval: Duration::from_secs(60),
			retry_policy: BackoffPolicy::default(),
		}
	}
}

pub struct WorkerPool {
	queue: Arc<dyn TaskQueue>,
	handlers: HashMap<String, Arc<dyn TaskHandler>>,
	hook: Option<Arc<dyn CompletionHook>>,
	config: WorkerPoolConfig,
	shutdown: CancellationToken,
}

impl WorkerPool {
	pub fn new(queue: Arc<dyn TaskQueue>, config: WorkerPoolConfig) -> Self {
		Self {
			queue,
			handlers: HashMap::new(),
			hook: None,
			config,
			shutdown: CancellationToken::new(),
		}
	}

	pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
		self.handlers.insert(name.into(), handler);
	}

	pub fn set_completion_hook(&mut self, hook: Arc<dyn CompletionHook>) {
		self.hook = Some(hook);
	}

	pub fn handler_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.handlers.keys().cloned().collect();
		names.sort();
		names
	}

	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	pub fn shutdown(&self) {
		self.shutdown.cancel();
	}

	/// Run worker loops until [`WorkerPool::shutdown`] is called.
	pub async fn run(self: Arc<Self>) {
		let concurrency = self.config.concurrency.max(1);
		let mut handles = Vec::with_capacity(concurrency + 1);

		for worker in 0..concurrency {
			let pool = Arc::clone(&self);
			handles.push(tokio::spawn(async move { pool.worker_loop(worker).await }));
		}

		let pool = Arc::clone(&self);
		handles.push(tokio::spawn(async move { pool.reclaim_loop().await }));

		info!(
			concurrency,
			queues = ?self.config.queues,
			handlers = self.handlers.len(),
			"Worker pool started"
		);

		for handle in handles {
			if let Err(e) = handle.await {
				error!(error = %e, "Worker loop terminated abnormally");
			}
		}

		info!("Worker pool shut down");
	}

	async fn worker_loop(&self, worker: usize) {
		loop {
			if self.shutdown.is_cancelled() {
				break;
			}
			match self.process_next().await {
				Ok(Some(_)) => continue,
				Ok(None) => {}
				Err(e) => error!(worker, error = %e, "Failed to process task"),
			}
			tokio::select! {
				_ = self.shutdown.cancelled() => break,
				_ = tokio::time::sleep(self.config.poll_interval) => {}
			}
		}
		debug!(worker, "Worker loop stopped");
	}

	async fn reclaim_loop(&self) {
		loop {
			tokio::select! {
				_ = self.shutdown.cancelled() => break,
				_ = tokio::time::sleep(self.config.reclaim_interval) => {
					match self.queue.reclaim_expired(self.config.visibility_timeout).await {
						Ok(0) => {}
						Ok(n) => warn!(reclaimed = n, "Reclaimed expired task claims"),
						Err(e) => error!(error = %e, "Failed to reclaim expired task claims"),
					}
				}
			}
		}
	}

	/// Dequeue and fully handle one message. Returns `None` when nothing was
	/// ready.
	pub async fn process_next(&self) -> Result<Option<FinishedTask>> {
		// A pool that is shutting down takes no new work.
		if self.shutdown.is_cancelled() {
			return Ok(None);
		}
		match self.queue.dequeue(&self.config.queues).await? {
			Some(delivery) => self.handle(delivery).await.map(Some),
			None => Ok(None),
		}
	}

	/// Process messages until none is ready. Returns how many were handled.
	pub async fn drain(&self) -> Result<usize> {
		let mut handled = 0;
		while self.process_next().await?.is_some() {
			handled += 1;
		}
		Ok(handled)
	}

	#[instrument(skip(self, delivery), fields(task_id = %delivery.message.id, name = %delivery.message.name))]
	async fn handle(&self, delivery: Delivery) -> Result<FinishedTask> {
		let message = &delivery.message;
		let state = match self.handlers.get(&message.name) {
			Some(handler) => self.invoke(Arc::clone(handler), message).await,
			None => {
				error!("No handler registered for task");
				TaskState::Failed {
					message: format!("no handler registered for {}", message.name),
				}
			}
		};

		// Resubmit before ack: a crash in between duplicates the message
		// rather than losing it.
		match &state {
			TaskState::Retrying { delay, .. } => {
				self.queue
					.submit_after(message.next_attempt(), *delay)
					.await?;
			}
			TaskState::Cancelled => self.queue.submit(message.clone()).await?,
			_ => {}
		}
		self.queue.ack(&delivery).await?;

		let finished = FinishedTask {
			id: message.id.clone(),
			name: message.name.clone(),
			state,
		};

		if finished.state.is_terminal() {
			if let Some(hook) = &self.hook {
				hook.on_task_finished(&finished).await;
			}
		}

		Ok(finished)
	}

	async fn invoke(&self, handler: Arc<dyn TaskHandler>, message: &TaskMessage) -> TaskState {
		let ctx = TaskContext::new(message.clone(), self.shutdown.child_token());
		let run = AssertUnwindSafe(handler.run(&ctx)).catch_unwind();

		let outcome = match message.soft_time_limit {
			Some(limit) => match tokio::time::timeout(limit, run).await {
				Ok(outcome) => outcome,
				Err(_) => {
					info!(limit_secs = limit.as_secs(), "Task exceeded soft time limit");
					return TaskState::TimeLimitExceeded;
				}
			},
			None => run.await,
		};

		match outcome {
			Err(panic) => {
				let message = panic_message(panic.as_ref());
				error!(error = %message, "Task panicked");
				TaskState::Failed { message }
			}
			Ok(Ok(output)) => {
				debug!(output = %output.message, "Task succeeded");
				TaskState::Succeeded
			}
			Ok(Err(TaskError::Retry { delay, message: reason })) => {
				let retries = message.retries.saturating_add(1);
				warn!(retries, delay_secs = delay.as_secs(), error = %reason, "Task failed, retrying");
				TaskState::Retrying { retries, delay }
			}
			Ok(Err(TaskError::Failed {
				message: reason,
				retryable: true,
			})) => {
				let retries = message.retries.saturating_add(1);
				match self.config.retry_policy.delay_for(retries) {
					Some(delay) => {
						warn!(retries, delay_secs = delay.as_secs(), error = %reason, "Task failed, retrying");
						TaskState::Retrying { retries, delay }
					}
					None => {
						warn!(error = %reason, "Task failed, retries exhausted");
						TaskState::Failed { message: reason }
					}
				}
			}
			Ok(Err(TaskError::Failed { message: reason, .. })) => {
				warn!(error = %reason, "Task failed");
				TaskState::Failed { message: reason }
			}
			Ok(Err(TaskError::TimeLimitExceeded)) => {
				info!("Task reported soft time limit exceeded");
				TaskState::TimeLimitExceeded
			}
			Ok(Err(TaskError::Cancelled)) => {
				info!("Task cancelled, returning it to the queue");
				TaskState::Cancelled
			}
		}
	}
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		format!("panicked: {s}")
	} else if let Some(s) = panic.downcast_ref::<String>() {
		format!("panicked: {s}")
	} else {
		"panicked".to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::handler::TaskOutput;
	use crate::memory::MemoryTaskQueue;
	use async_trait::async_trait;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Mutex;

	#[derive(Default)]
	struct RecordingHook {
		finished: Mutex<Vec<FinishedTask>>,
	}

	impl RecordingHook {
		fn finished(&self) -> Vec<FinishedTask> {
			self.finished.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl CompletionHook for RecordingHook {
		async fn on_task_finished(&self, task: &FinishedTask) {
			self.finished.lock().unwrap().push(task.clone());
		}
	}

	struct OkHandler;

	#[async_trait]
	impl TaskHandler for OkHandler {
		async fn run(&self, _ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			Ok(TaskOutput::new("done"))
		}
	}

	struct RetryingHandler {
		calls: AtomicU32,
		fail_times: u32,
	}

	#[async_trait]
	impl TaskHandler for RetryingHandler {
		async fn run(&self, ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			if ctx.retries() < self.fail_times {
				return Err(TaskError::Retry {
					delay: Duration::from_secs(10),
					message: "transient".to_string(),
				});
			}
			Ok(TaskOutput::new("done"))
		}
	}

	struct FailingHandler {
		retryable: bool,
	}

	#[async_trait]
	impl TaskHandler for FailingHandler {
		async fn run(&self, _ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			Err(TaskError::Failed {
				message: "boom".to_string(),
				retryable: self.retryable,
			})
		}
	}

	struct PanickingHandler;

	#[async_trait]
	impl TaskHandler for PanickingHandler {
		async fn run(&self, _ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			panic!("handler bug");
		}
	}

	struct CancelledOnceHandler {
		calls: AtomicU32,
	}

	#[async_trait]
	impl TaskHandler for CancelledOnceHandler {
		async fn run(&self, _ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
				return Err(TaskError::Cancelled);
			}
			Ok(TaskOutput::new("done"))
		}
	}

	struct SlowHandler;

	#[async_trait]
	impl TaskHandler for SlowHandler {
		async fn run(&self, _ctx: &TaskContext) -> std::result::Result<TaskOutput, TaskError> {
			tokio::time::sleep(Duration::from_secs(300)).await;
			Ok(TaskOutput::new("late"))
		}
	}

	fn make_pool(queue: Arc<MemoryTaskQueue>, hook: Arc<RecordingHook>) -> WorkerPool {
		let mut pool = WorkerPool::new(
			queue,
			WorkerPoolConfig {
				queues: vec!["q".to_string()],
				..Default::default()
			},
		);
		pool.set_completion_hook(hook);
		pool
	}

	#[tokio::test]
	async fn success_fires_hook() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("ok", Arc::new(OkHandler));

		queue.submit(TaskMessage::new("t1", "ok", "q")).await.unwrap();
		let finished = pool.process_next().await.unwrap().unwrap();

		assert_eq!(finished.state, TaskState::Succeeded);
		assert_eq!(hook.finished(), vec![finished]);
		assert_eq!(queue.len("q").await.unwrap(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn retry_resubmits_without_hook() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let handler = Arc::new(RetryingHandler {
			calls: AtomicU32::new(0),
			fail_times: 2,
		});
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("flaky", handler.clone());

		queue.submit(TaskMessage::new("t1", "flaky", "q")).await.unwrap();

		let first = pool.process_next().await.unwrap().unwrap();
		assert_eq!(
			first.state,
			TaskState::Retrying {
				retries: 1,
				delay: Duration::from_secs(10)
			}
		);
		assert!(hook.finished().is_empty());
		assert!(pool.process_next().await.unwrap().is_none());

		tokio::time::advance(Duration::from_secs(10)).await;
		pool.process_next().await.unwrap().unwrap();
		tokio::time::advance(Duration::from_secs(10)).await;
		let last = pool.process_next().await.unwrap().unwrap();

		assert_eq!(last.state, TaskState::Succeeded);
		assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
		assert_eq!(hook.finished().len(), 1);
		assert_eq!(hook.finished()[0].id, "t1");
	}

	#[tokio::test(start_paused = true)]
	async fn retryable_failure_uses_pool_policy() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("fail", Arc::new(FailingHandler { retryable: true }));

		queue.submit(TaskMessage::new("t1", "fail", "q")).await.unwrap();

		let mut delays = Vec::new();
		loop {
			let finished = pool.process_next().await.unwrap().unwrap();
			match finished.state {
				TaskState::Retrying { delay, .. } => {
					delays.push(delay);
					tokio::time::advance(delay).await;
				}
				TaskState::Failed { .. } => break,
				other => panic!("unexpected state {other:?}"),
			}
		}

		assert_eq!(
			delays,
			vec![
				Duration::from_secs(16),
				Duration::from_secs(32),
				Duration::from_secs(64)
			]
		);
		assert_eq!(hook.finished().len(), 1);
	}

	#[tokio::test]
	async fn terminal_failure_fires_hook_once() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("fail", Arc::new(FailingHandler { retryable: false }));

		queue.submit(TaskMessage::new("t1", "fail", "q")).await.unwrap();
		let finished = pool.process_next().await.unwrap().unwrap();

		assert!(matches!(finished.state, TaskState::Failed { .. }));
		assert_eq!(hook.finished().len(), 1);
		assert!(pool.process_next().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn panic_is_a_failure() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("panic", Arc::new(PanickingHandler));

		queue.submit(TaskMessage::new("t1", "panic", "q")).await.unwrap();
		let finished = pool.process_next().await.unwrap().unwrap();

		match finished.state {
			TaskState::Failed { message } => assert!(message.contains("handler bug")),
			other => panic!("unexpected state {other:?}"),
		}
		assert_eq!(hook.finished().len(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn soft_time_limit_is_terminal() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("slow", Arc::new(SlowHandler));

		queue
			.submit(
				TaskMessage::new("t1", "slow", "q").with_soft_time_limit(Some(Duration::from_secs(105))),
			)
			.await
			.unwrap();
		let finished = pool.process_next().await.unwrap().unwrap();

		assert_eq!(finished.state, TaskState::TimeLimitExceeded);
		assert_eq!(hook.finished().len(), 1);
	}

	#[tokio::test]
	async fn unknown_task_name_is_terminal() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let pool = make_pool(queue.clone(), hook.clone());

		queue.submit(TaskMessage::new("t1", "nobody", "q")).await.unwrap();
		let finished = pool.process_next().await.unwrap().unwrap();

		assert!(matches!(finished.state, TaskState::Failed { .. }));
		assert_eq!(hook.finished().len(), 1);
	}

	#[tokio::test]
	async fn cancelled_task_is_requeued_without_hook() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register(
			"interrupted",
			Arc::new(CancelledOnceHandler {
				calls: AtomicU32::new(0),
			}),
		);

		queue
			.submit(TaskMessage::new("t1", "interrupted", "q"))
			.await
			.unwrap();

		let first = pool.process_next().await.unwrap().unwrap();
		assert_eq!(first.state, TaskState::Cancelled);
		assert!(hook.finished().is_empty());
		assert_eq!(queue.len("q").await.unwrap(), 1);

		let second = pool.process_next().await.unwrap().unwrap();
		assert_eq!(second.id, "t1");
		assert_eq!(second.state, TaskState::Succeeded);
		assert_eq!(hook.finished(), vec![second]);
	}

	#[tokio::test]
	async fn shut_down_pool_takes_no_work() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("ok", Arc::new(OkHandler));

		queue.submit(TaskMessage::new("t1", "ok", "q")).await.unwrap();
		pool.shutdown();

		assert!(pool.process_next().await.unwrap().is_none());
		assert_eq!(queue.len("q").await.unwrap(), 1);
		assert!(hook.finished().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn run_stops_on_shutdown() {
		let queue = Arc::new(MemoryTaskQueue::new());
		let hook = Arc::new(RecordingHook::default());
		let mut pool = make_pool(queue.clone(), hook.clone());
		pool.register("ok", Arc::new(OkHandler));
		let pool = Arc::new(pool);

		for i in 0..5 {
			queue
				.submit(TaskMessage::new(format!("t{i}"), "ok", "q"))
				.await
				.unwrap();
		}

		let runner = tokio::spawn(Arc::clone(&pool).run());
		tokio::time::sleep(Duration::from_secs(2)).await;
		pool.shutdown();
		runner.await.unwrap();

		assert_eq!(hook.finished().len(), 5);
	}
}
