// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! syncfence worker binary: runs the worker pool and beat scheduler, and
//! exposes operator commands against the same store.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use syncfence_config::{LogFormat, SyncConfig};
use syncfence_core::{JobKind, ResourceId};
use syncfence_jobs::{install_handlers, registry, BeatScheduler, JobAdmin, SqliteCatalog, SyncRuntime};
use syncfence_kv::{create_pool, wait_for_store, KvStore, SqliteKvStore};
use syncfence_queue::{CancellationToken, SqliteTaskQueue, TaskQueue, WorkerPool};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod settings;
mod version;

/// syncfence worker - fenced fan-out sync jobs.
#[derive(Parser, Debug)]
#[command(name = "syncfence-worker", about = "Fenced fan-out sync job worker", version)]
struct Args {
	/// Config file (defaults to /etc/syncfence/worker.toml)
	#[arg(long, short, env = "SYNCFENCE_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the worker pool and, if enabled, the beat scheduler (default)
	Run,
	/// Show the coordination state of one job
	Status { kind: JobKind, resource_id: ResourceId },
	/// List in-flight jobs of a kind
	Active { kind: JobKind },
	/// Set the stop fence for a job
	Stop {
		kind: JobKind,
		resource_id: ResourceId,
		/// Clear the stop fence automatically after this many seconds
		#[arg(long)]
		ttl_secs: Option<u64>,
	},
	/// Clear the stop fence for a job
	Resume { kind: JobKind, resource_id: ResourceId },
	/// Force-clear a stuck job without recording a sync
	Reap { kind: JobKind, resource_id: ResourceId },
	/// Start a job now at high priority
	Trigger { kind: JobKind, resource_id: ResourceId },
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	dotenvy::dotenv().ok();

	let config = syncfence_config::load_config(args.config)?;
	init_tracing(&config);

	let rt = connect(&config).await?;
	let result = match args.command.unwrap_or(Command::Run) {
		Command::Run => run(&config, rt.clone()).await,
		command => admin(command, &rt).await,
	};
	rt.shutdown().await;
	result
}

fn init_tracing(config: &SyncConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

async fn connect(config: &SyncConfig) -> anyhow::Result<Arc<SyncRuntime>> {
	let pool = create_pool(&config.database.url).await?;

	let store = Arc::new(SqliteKvStore::new(pool.clone()));
	wait_for_store(
		store.as_ref(),
		config.database.connect_attempts,
		Duration::from_millis(config.database.connect_retry_delay_ms),
	)
	.await?;
	store.ensure_schema().await?;

	let queue = SqliteTaskQueue::new(pool.clone());
	queue.ensure_schema().await?;

	let catalog = Arc::new(SqliteCatalog::new(pool));
	catalog.ensure_schema().await?;

	let store: Arc<dyn KvStore> = store;
	let queue: Arc<dyn TaskQueue> = Arc::new(queue);
	Ok(Arc::new(SyncRuntime::new(
		store,
		queue,
		catalog.collaborators(),
		settings::sync_settings(config),
	)))
}

async fn run(config: &SyncConfig, rt: Arc<SyncRuntime>) -> anyhow::Result<()> {
	tracing::info!(
		database = %config.database.url,
		concurrency = config.worker.concurrency,
		beat = config.beat.enabled,
		"starting syncfence-worker"
	);

	let mut pool = WorkerPool::new(
		rt.queue.clone(),
		settings::pool_config(config, registry::queue_names()),
	);
	install_handlers(&mut pool, &rt);
	let pool = Arc::new(pool);
	let shutdown = CancellationToken::new();

	let worker = tokio::spawn(Arc::clone(&pool).run());

	let beat = if config.beat.enabled {
		let scheduler = BeatScheduler::new(rt.clone());
		let interval = Duration::from_secs(config.beat.interval_secs);
		let token = shutdown.clone();
		Some(tokio::spawn(async move { scheduler.run(interval, token).await }))
	} else {
		None
	};

	tokio::signal::ctrl_c().await?;
	tracing::info!("Shutdown signal received, draining workers");

	shutdown.cancel();
	pool.shutdown();
	if let Some(beat) = beat {
		if let Err(e) = beat.await {
			tracing::error!(error = %e, "Beat scheduler task failed");
		}
	}
	if let Err(e) = worker.await {
		tracing::error!(error = %e, "Worker pool task failed");
	}
	Ok(())
}

async fn admin(command: Command, rt: &Arc<SyncRuntime>) -> anyhow::Result<()> {
	let admin = JobAdmin::new(rt.clone());
	match command {
		Command::Status { kind, resource_id } => {
			let status = admin.job_status(kind, resource_id).await?;
			println!("{}", serde_json::to_string_pretty(&status)?);
		}
		Command::Active { kind } => {
			let jobs = admin.active_jobs(kind).await?;
			println!("{}", serde_json::to_string_pretty(&jobs)?);
		}
		Command::Stop {
			kind,
			resource_id,
			ttl_secs,
		} => {
			admin
				.stop_job(kind, resource_id, ttl_secs.map(Duration::from_secs))
				.await?;
			println!("stop fence set for {kind} {resource_id}");
		}
		Command::Resume { kind, resource_id } => {
			admin.resume_job(kind, resource_id).await?;
			println!("stop fence cleared for {kind} {resource_id}");
		}
		Command::Reap { kind, resource_id } => {
			admin.reap(kind, resource_id).await?;
			println!("reaped {kind} {resource_id}");
		}
		Command::Trigger { kind, resource_id } => {
			let outcome = admin.trigger(kind, resource_id).await?;
			println!("{outcome:?}");
		}
		Command::Run | Command::Version => {}
	}
	Ok(())
}
