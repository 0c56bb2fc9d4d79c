use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voiceflow_models::Job;

use crate::{JobMutator, Store, StoreError};

/// Tuning knobs for the hybrid store's write-behind machinery. The defaults
/// match production behaviour; tests shrink the intervals.
#[derive(Debug, Clone)]
pub struct HybridConfig {
	pub sync_queue_capacity: usize,
	pub sync_batch_size: usize,
	pub sync_flush_interval: Duration,
	pub drain_timeout: Duration,
	pub drain_poll_interval: Duration,
}

impl Default for HybridConfig {
	fn default() -> Self {
		Self {
			sync_queue_capacity: 100,
			sync_batch_size: 50,
			sync_flush_interval: Duration::from_secs(5),
			drain_timeout: Duration::from_secs(5),
			drain_poll_interval: Duration::from_millis(100),
		}
	}
}

/// Two-tier store: a fast TTL-bounded hot tier fronting a durable cold tier.
///
/// Writes always hit the hot tier synchronously; only terminal records are
/// forwarded to the cold tier, asynchronously through a bounded sync queue
/// flushed in batches by one background task. Progress updates on a
/// processing job dominate write traffic and never touch the cold tier.
/// Reads are cache-aside: hot first, cold on miss with an async hot
/// repopulation.
pub struct HybridStore {
	hot: Arc<dyn Store>,
	cold: Arc<dyn Store>,
	sync_tx: mpsc::Sender<Job>,
	stop: CancellationToken,
	sync_task: Mutex<Option<JoinHandle<()>>>,
	config: HybridConfig,
}

impl HybridStore {
	pub fn new(hot: Arc<dyn Store>, cold: Arc<dyn Store>) -> Self {
		Self::with_config(hot, cold, HybridConfig::default())
	}

	pub fn with_config(hot: Arc<dyn Store>, cold: Arc<dyn Store>, config: HybridConfig) -> Self {
		let (sync_tx, sync_rx) = mpsc::channel(config.sync_queue_capacity.max(1));
		let stop = CancellationToken::new();

		let sync_task = tokio::spawn(run_sync_worker(
			Arc::clone(&cold),
			sync_rx,
			stop.clone(),
			config.sync_batch_size.max(1),
			config.sync_flush_interval,
		));
		info!("hybrid store started (hot tier + write-behind cold tier)");

		Self {
			hot,
			cold,
			sync_tx,
			stop,
			sync_task: Mutex::new(Some(sync_task)),
			config,
		}
	}

	/// Jobs queued for the cold tier but not yet picked up by the sync task.
	fn pending_sync(&self) -> usize {
		self.sync_tx.max_capacity() - self.sync_tx.capacity()
	}

	/// Queues a terminal record for the cold tier. A full queue degrades to a
	/// synchronous cold write, which is the back-pressure path under
	/// sustained overload.
	async fn sync_to_cold(&self, job: Job) {
		match self.sync_tx.try_send(job) {
			Ok(()) => {}
			Err(mpsc::error::TrySendError::Full(job)) => {
				warn!(job_id = %job.id, "sync queue full, writing cold tier synchronously");
				if let Err(e) = self.cold.save(&job).await {
					error!(job_id = %job.id, error = %e, "synchronous cold-tier write failed");
				}
			}
			Err(mpsc::error::TrySendError::Closed(job)) => {
				if let Err(e) = self.cold.save(&job).await {
					error!(job_id = %job.id, error = %e, "cold-tier write after close failed");
				}
			}
		}
	}
}

#[async_trait]
impl Store for HybridStore {
	async fn save(&self, job: &Job) -> Result<(), StoreError> {
		if let Err(e) = self.hot.save(job).await {
			// Hot-tier trouble must not fail the write; the cold path below
			// still persists terminal records.
			warn!(job_id = %job.id, error = %e, "hot-tier save failed");
		}
		if job.is_terminal() {
			self.sync_to_cold(job.clone()).await;
		}
		Ok(())
	}

	async fn get(&self, id: &str) -> Result<Job, StoreError> {
		match self.hot.get(id).await {
			Ok(job) => Ok(job),
			Err(hot_err) => {
				if !matches!(hot_err, StoreError::NotFound(_)) {
					warn!(job_id = id, error = %hot_err, "hot-tier get failed, falling back");
				}
				let job = self.cold.get(id).await?;

				// Repopulate the hot tier off the read path.
				let hot = Arc::clone(&self.hot);
				let cached = job.clone();
				tokio::spawn(async move {
					if let Err(e) = hot.save(&cached).await {
						warn!(job_id = %cached.id, error = %e, "hot-tier repopulation failed");
					}
				});

				Ok(job)
			}
		}
	}

	async fn update(&self, id: &str, mutate: JobMutator) -> Result<Job, StoreError> {
		let mutate: Arc<dyn Fn(&mut Job) + Send + Sync> = Arc::from(mutate);

		let hot_mutate = Arc::clone(&mutate);
		let job = match self
			.hot
			.update(id, Box::new(move |job| hot_mutate(job)))
			.await
		{
			Ok(job) => job,
			Err(hot_err) => {
				warn!(job_id = id, error = %hot_err, "hot-tier update failed, updating cold tier");
				let cold_mutate = Arc::clone(&mutate);
				return self
					.cold
					.update(id, Box::new(move |job| cold_mutate(job)))
					.await;
			}
		};

		if job.is_terminal() {
			self.sync_to_cold(job.clone()).await;
		}
		Ok(job)
	}

	async fn list(&self) -> Result<Vec<Job>, StoreError> {
		match self.hot.list().await {
			Ok(jobs) => Ok(jobs),
			Err(hot_err) => {
				warn!(error = %hot_err, "hot-tier list failed, falling back to cold tier");
				self.cold.list().await
			}
		}
	}

	async fn delete(&self, id: &str) -> Result<(), StoreError> {
		if let Err(e) = self.hot.delete(id).await {
			// The blob may simply have expired; the cold tier is authoritative.
			debug!(job_id = id, error = %e, "hot-tier delete failed");
		}
		self.cold.delete(id).await
	}

	async fn close(&self) -> Result<(), StoreError> {
		self.stop.cancel();

		let deadline = Instant::now() + self.config.drain_timeout;
		loop {
			let remaining = self.pending_sync();
			if remaining == 0 {
				break;
			}
			if Instant::now() >= deadline {
				// Acceptable loss: the hot tier keeps these records until TTL.
				warn!(remaining, "sync queue drain timed out");
				break;
			}
			tokio::time::sleep(self.config.drain_poll_interval).await;
		}

		if let Some(task) = self.sync_task.lock().await.take() {
			let _ = tokio::time::timeout(self.config.drain_timeout, task).await;
		}

		if let Err(e) = self.hot.close().await {
			warn!(error = %e, "hot-tier close failed");
		}
		self.cold.close().await?;
		info!("hybrid store closed");
		Ok(())
	}
}

/// Background batcher: flushes queued terminal records to the cold tier in
/// batches, or on a timer, whichever fills first. On the stop signal it
/// drains whatever is still queued, flushes once and exits.
async fn run_sync_worker(
	cold: Arc<dyn Store>,
	mut rx: mpsc::Receiver<Job>,
	stop: CancellationToken,
	batch_size: usize,
	flush_interval: Duration,
) {
	let mut ticker = tokio::time::interval(flush_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	let mut batch: Vec<Job> = Vec::with_capacity(batch_size);

	loop {
		tokio::select! {
			_ = stop.cancelled() => {
				while let Ok(job) = rx.try_recv() {
					batch.push(job);
				}
				flush_batch(cold.as_ref(), &mut batch).await;
				return;
			}
			_ = ticker.tick() => {
				flush_batch(cold.as_ref(), &mut batch).await;
			}
			received = rx.recv() => match received {
				Some(job) => {
					batch.push(job);
					if batch.len() >= batch_size {
						flush_batch(cold.as_ref(), &mut batch).await;
					}
				}
				None => {
					flush_batch(cold.as_ref(), &mut batch).await;
					return;
				}
			},
		}
	}
}

async fn flush_batch(cold: &dyn Store, batch: &mut Vec<Job>) {
	if batch.is_empty() {
		return;
	}
	let total = batch.len();
	let mut synced = 0usize;
	for job in batch.drain(..) {
		// Failed records are not re-queued; the hot tier retains them for
		// its TTL and the status remains readable.
		match cold.save(&job).await {
			Ok(()) => synced += 1,
			Err(e) => error!(job_id = %job.id, error = %e, "cold-tier batch write failed"),
		}
	}
	debug!(synced, total, "flushed sync batch to cold tier");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryStore;
	use std::time::Duration;
	use voiceflow_models::JobStatus;

	fn fast_config() -> HybridConfig {
		HybridConfig {
			sync_queue_capacity: 100,
			sync_batch_size: 50,
			sync_flush_interval: Duration::from_millis(20),
			drain_timeout: Duration::from_secs(1),
			drain_poll_interval: Duration::from_millis(5),
		}
	}

	fn completed_job(name: &str) -> Job {
		let mut job = Job::new(name, format!("uploads/{name}"));
		job.status = JobStatus::Completed;
		job.progress = 100;
		job.result_text = "done".to_string();
		job.completed_at = Some(chrono::Utc::now());
		job
	}

	async fn wait_until<F>(mut check: F, timeout: Duration) -> bool
	where
		F: FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
	{
		let deadline = tokio::time::Instant::now() + timeout;
		while tokio::time::Instant::now() < deadline {
			if check().await {
				return true;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		false
	}

	/// A tier that refuses every operation, for fallback paths.
	struct BrokenStore;

	#[async_trait]
	impl Store for BrokenStore {
		async fn save(&self, _job: &Job) -> Result<(), StoreError> {
			Err(StoreError::NotFound("broken".to_string()))
		}
		async fn get(&self, id: &str) -> Result<Job, StoreError> {
			Err(StoreError::NotFound(id.to_string()))
		}
		async fn update(&self, id: &str, _mutate: JobMutator) -> Result<Job, StoreError> {
			Err(StoreError::NotFound(id.to_string()))
		}
		async fn list(&self) -> Result<Vec<Job>, StoreError> {
			Err(StoreError::NotFound("broken".to_string()))
		}
		async fn delete(&self, id: &str) -> Result<(), StoreError> {
			Err(StoreError::NotFound(id.to_string()))
		}
		async fn close(&self) -> Result<(), StoreError> {
			Ok(())
		}
	}

	#[tokio::test]
	async fn test_non_terminal_writes_stay_hot() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(hot.clone(), cold.clone(), fast_config());

		let mut job = Job::new("a.mp3", "uploads/a.mp3");
		store.save(&job).await.unwrap();
		job.status = JobStatus::Processing;
		job.progress = 50;
		store.save(&job).await.unwrap();

		// Give the sync worker several flush cycles to prove nothing arrives.
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert!(hot.get(&job.id).await.is_ok());
		assert!(matches!(cold.get(&job.id).await, Err(StoreError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_terminal_save_reaches_cold_tier() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(hot.clone(), cold.clone(), fast_config());

		let job = completed_job("done.mp3");
		store.save(&job).await.unwrap();

		let cold_check = cold.clone();
		let id = job.id.clone();
		let synced = wait_until(
			move || {
				let cold = cold_check.clone();
				let id = id.clone();
				Box::pin(async move { cold.get(&id).await.is_ok() })
			},
			Duration::from_secs(2),
		)
		.await;
		assert!(synced, "terminal record never reached the cold tier");
	}

	#[tokio::test]
	async fn test_terminal_update_reaches_cold_tier() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(hot.clone(), cold.clone(), fast_config());

		let job = Job::new("a.mp3", "uploads/a.mp3");
		store.save(&job).await.unwrap();
		store
			.update(
				&job.id,
				Box::new(|j| {
					j.status = JobStatus::Failed;
					j.error_message = Some("boom".to_string());
					j.completed_at = Some(chrono::Utc::now());
				}),
			)
			.await
			.unwrap();

		let cold_check = cold.clone();
		let id = job.id.clone();
		let synced = wait_until(
			move || {
				let cold = cold_check.clone();
				let id = id.clone();
				Box::pin(async move {
					matches!(cold.get(&id).await, Ok(j) if j.status == JobStatus::Failed)
				})
			},
			Duration::from_secs(2),
		)
		.await;
		assert!(synced);
	}

	#[tokio::test]
	async fn test_cold_only_get_repopulates_hot() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(hot.clone(), cold.clone(), fast_config());

		// Simulate a hot-tier eviction: the record exists only in the cold tier.
		let job = completed_job("evicted.mp3");
		cold.save(&job).await.unwrap();

		let first = store.get(&job.id).await.unwrap();
		assert_eq!(first.id, job.id);
		let second = store.get(&job.id).await.unwrap();
		assert_eq!(second.result_text, first.result_text);

		let hot_check = hot.clone();
		let id = job.id.clone();
		let repopulated = wait_until(
			move || {
				let hot = hot_check.clone();
				let id = id.clone();
				Box::pin(async move { hot.get(&id).await.is_ok() })
			},
			Duration::from_secs(2),
		)
		.await;
		assert!(repopulated, "hot tier was not repopulated after a cold read");
	}

	#[tokio::test]
	async fn test_update_falls_back_to_cold_when_hot_broken() {
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(Arc::new(BrokenStore), cold.clone(), fast_config());

		let job = Job::new("a.mp3", "uploads/a.mp3");
		cold.save(&job).await.unwrap();

		let updated = store
			.update(&job.id, Box::new(|j| j.progress = 75))
			.await
			.unwrap();
		assert_eq!(updated.progress, 75);
		assert_eq!(cold.get(&job.id).await.unwrap().progress, 75);
	}

	#[tokio::test]
	async fn test_list_falls_back_to_cold_when_hot_broken() {
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(Arc::new(BrokenStore), cold.clone(), fast_config());

		cold.save(&completed_job("a.mp3")).await.unwrap();
		let listed = store.list().await.unwrap();
		assert_eq!(listed.len(), 1);
	}

	#[tokio::test]
	async fn test_close_drains_pending_records() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		// Long flush interval: nothing reaches the cold tier until close.
		let config = HybridConfig {
			sync_flush_interval: Duration::from_secs(30),
			..fast_config()
		};
		let store = HybridStore::with_config(hot.clone(), cold.clone(), config);

		let jobs: Vec<Job> = (0..5).map(|i| completed_job(&format!("j{i}.mp3"))).collect();
		for job in &jobs {
			store.save(job).await.unwrap();
		}

		store.close().await.unwrap();
		for job in &jobs {
			assert!(
				cold.get(&job.id).await.is_ok(),
				"record lost during close drain"
			);
		}
	}

	#[tokio::test]
	async fn test_sync_queue_overflow_degrades_to_synchronous_write() {
		let hot = Arc::new(MemoryStore::new());
		let cold: Arc<MemoryStore> = Arc::new(MemoryStore::new());

		// Single-slot queue with a receiver that never consumes, so the
		// second terminal write finds the queue full.
		let (sync_tx, _sync_rx) = mpsc::channel(1);
		let store = HybridStore {
			hot,
			cold: cold.clone(),
			sync_tx,
			stop: CancellationToken::new(),
			sync_task: Mutex::new(None),
			config: fast_config(),
		};

		let queued = completed_job("queued.mp3");
		let overflow = completed_job("overflow.mp3");
		store.save(&queued).await.unwrap();
		store.save(&overflow).await.unwrap();

		assert!(
			cold.get(&overflow.id).await.is_ok(),
			"overflow write did not reach the cold tier synchronously"
		);
		// The queued record is still parked in the sync queue, not in cold.
		assert!(matches!(cold.get(&queued.id).await, Err(StoreError::NotFound(_))));
	}

	#[tokio::test]
	async fn test_delete_requires_cold_tier_success() {
		let hot = Arc::new(MemoryStore::new());
		let cold = Arc::new(MemoryStore::new());
		let store = HybridStore::with_config(hot.clone(), cold.clone(), fast_config());

		let job = completed_job("gone.mp3");
		hot.save(&job).await.unwrap();
		cold.save(&job).await.unwrap();
		store.delete(&job.id).await.unwrap();
		assert!(matches!(cold.get(&job.id).await, Err(StoreError::NotFound(_))));

		// Hot-tier absence alone is non-fatal, cold-tier absence is surfaced.
		let err = store.delete("missing").await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound(_)));
	}
}
