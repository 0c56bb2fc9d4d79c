use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use voiceflow_queue::Queue;
use voiceflow_storage::Store;
use voiceflow_transcriber::TranscriptionEngine;

use crate::worker::{Worker, WorkerConfig};

/// Fixed-size set of workers sharing one queue and one store. Workers never
/// share engine state; the engine itself is stateless per job.
pub struct WorkerPool {
	shutdown: CancellationToken,
	handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
	pub fn start(
		size: usize,
		queue: Arc<dyn Queue>,
		store: Arc<dyn Store>,
		engine: Arc<TranscriptionEngine>,
		config: WorkerConfig,
	) -> Self {
		let shutdown = CancellationToken::new();
		let size = size.max(1);

		let handles = (0..size)
			.map(|id| {
				let worker = Worker {
					id,
					queue: Arc::clone(&queue),
					store: Arc::clone(&store),
					engine: Arc::clone(&engine),
					shutdown: shutdown.clone(),
					config: config.clone(),
				};
				tokio::spawn(worker.run())
			})
			.collect();

		info!(workers = size, "worker pool started");
		Self { shutdown, handles }
	}

	/// Cancels every worker and waits up to `grace` for in-flight jobs to
	/// reach a terminal state and settle their deliveries.
	pub async fn shutdown(self, grace: Duration) {
		info!("stopping worker pool");
		self.shutdown.cancel();

		match tokio::time::timeout(grace, futures::future::join_all(self.handles)).await {
			Ok(_) => info!("all workers stopped"),
			Err(_) => warn!("worker pool shutdown timed out, abandoning in-flight workers"),
		}
	}
}
