use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use voiceflow_models::JobStatus;
use voiceflow_queue::{Delivery, DeliveryHandle, Queue, QueueError};
use voiceflow_storage::Store;
use voiceflow_transcriber::TranscriptionEngine;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	/// Hard deadline for one job, derived from the worker's cancellation.
	pub job_timeout: Duration,
	/// Pause after a failed dequeue before trying again.
	pub dequeue_retry_backoff: Duration,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			job_timeout: Duration::from_secs(30 * 60),
			dequeue_retry_backoff: Duration::from_secs(1),
		}
	}
}

/// A long-lived job consumer. Owns one in-flight job at a time: dequeues,
/// drives the engine, applies the terminal state transition and settles the
/// queue delivery with an ack or nack.
pub(crate) struct Worker {
	pub(crate) id: usize,
	pub(crate) queue: Arc<dyn Queue>,
	pub(crate) store: Arc<dyn Store>,
	pub(crate) engine: Arc<TranscriptionEngine>,
	pub(crate) shutdown: CancellationToken,
	pub(crate) config: WorkerConfig,
}

impl Worker {
	pub(crate) async fn run(self) {
		info!(worker = self.id, "worker started, waiting for jobs");

		loop {
			if self.shutdown.is_cancelled() {
				break;
			}

			let delivery = match self.queue.dequeue(&self.shutdown).await {
				Ok(delivery) => delivery,
				Err(QueueError::Closed) if self.shutdown.is_cancelled() => break,
				Err(e) => {
					// Transient transport trouble (or a closed broker
					// channel mid-reconnect): back off and try again.
					warn!(worker = self.id, error = %e, "dequeue failed, backing off");
					tokio::select! {
						_ = self.shutdown.cancelled() => break,
						_ = tokio::time::sleep(self.config.dequeue_retry_backoff) => {}
					}
					continue;
				}
			};

			self.process(delivery).await;
		}

		info!(worker = self.id, "worker stopped");
	}

	async fn process(&self, delivery: Delivery) {
		let Delivery { job, handle } = delivery;
		let job_id = job.id.clone();
		let started = Instant::now();
		info!(worker = self.id, job_id = %job_id, source = %job.source_name, "processing job");

		if let Err(e) = self
			.store
			.update(
				&job_id,
				Box::new(|j| {
					j.status = JobStatus::Processing;
					j.progress = 0;
				}),
			)
			.await
		{
			warn!(worker = self.id, job_id = %job_id, error = %e, "marking job as processing failed");
		}

		// Progress writes go through one writer task per job so store
		// updates stay ordered; the engine's collector is the only sender.
		let (progress_tx, mut progress_rx) = mpsc::channel::<u8>(16);
		let progress_writer = {
			let store = Arc::clone(&self.store);
			let job_id = job_id.clone();
			tokio::spawn(async move {
				while let Some(pct) = progress_rx.recv().await {
					if let Err(e) = store
						.update(&job_id, Box::new(move |j| j.progress = pct))
						.await
					{
						warn!(job_id = %job_id, error = %e, "progress update failed");
					}
				}
			})
		};

		let job_token = self.shutdown.child_token();
		let outcome = tokio::time::timeout(
			self.config.job_timeout,
			self.engine.transcribe(
				&job_token,
				Path::new(&job.source_path),
				job.language.as_deref(),
				progress_tx,
			),
		)
		.await;

		// Let the writer finish any queued progress update before the
		// terminal write lands.
		let _ = progress_writer.await;

		match outcome {
			Ok(Ok(result)) => {
				info!(
					worker = self.id,
					job_id = %job_id,
					elapsed_secs = started.elapsed().as_secs(),
					chars = result.text.len(),
					"job completed"
				);
				let text = result.text;
				let subtitle_paths = result.subtitle_paths;
				let language = result.language;
				let duration_seconds = result.duration_seconds;
				if let Err(e) = self
					.store
					.update(
						&job_id,
						Box::new(move |j| {
							j.status = JobStatus::Completed;
							j.result_text = text.clone();
							j.subtitle_paths = subtitle_paths.clone();
							if let Some(language) = &language {
								j.language = Some(language.clone());
							}
							if let Some(duration) = duration_seconds {
								j.duration_seconds = Some(duration);
							}
							j.progress = 100;
							j.completed_at = Some(Utc::now());
						}),
					)
					.await
				{
					error!(worker = self.id, job_id = %job_id, error = %e, "writing completed state failed");
				}
				if let Err(e) = self.queue.ack(handle).await {
					warn!(worker = self.id, job_id = %job_id, error = %e, "ack failed");
				}
			}
			Ok(Err(engine_error)) => {
				self.fail_job(&job_id, handle, engine_error.to_string()).await;
			}
			Err(_elapsed) => {
				// Tear the fan-out down before reporting the deadline.
				job_token.cancel();
				self.fail_job(
					&job_id,
					handle,
					format!(
						"processing deadline exceeded after {} seconds",
						self.config.job_timeout.as_secs()
					),
				)
				.await;
			}
		}
	}

	async fn fail_job(&self, job_id: &str, handle: DeliveryHandle, message: String) {
		warn!(worker = self.id, job_id = %job_id, error = %message, "job failed");

		if let Err(e) = self
			.store
			.update(
				job_id,
				Box::new(move |j| {
					j.status = JobStatus::Failed;
					j.error_message = Some(message.clone());
					j.completed_at = Some(Utc::now());
				}),
			)
			.await
		{
			error!(worker = self.id, job_id = %job_id, error = %e, "writing failed state failed");
		}

		// Failed jobs are never requeued from here; broker redelivery of
		// unacked messages on consumer death is the only queue-level retry.
		if let Err(e) = self.queue.nack(handle, false).await {
			warn!(worker = self.id, job_id = %job_id, error = %e, "nack failed");
		}
	}
}
