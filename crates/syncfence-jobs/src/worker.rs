// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use syncfence_queue::WorkerPool;
use tracing::debug;

use crate::completion::CompletionRouter;
use crate::context::SyncRuntime;
use crate::generator::GeneratorHandler;
use crate::registry;
use crate::subtask::SubtaskHandler;

/// Register every kind's generator and subtask handler plus the completion
/// router on `pool`.
pub fn install_handlers(pool: &mut WorkerPool, rt: &Arc<SyncRuntime>) {
	for spec in registry::all() {
		pool.register(
			spec.generator_task,
			Arc::new(GeneratorHandler::new(rt.clone(), spec.kind)),
		);
		pool.register(
			spec.subtask_task,
			Arc::new(SubtaskHandler::new(rt.clone(), spec.kind)),
		);
		debug!(kind = %spec.kind, "Registered sync handlers");
	}
	pool.set_completion_hook(Arc::new(CompletionRouter::new(rt.clone())));
}
