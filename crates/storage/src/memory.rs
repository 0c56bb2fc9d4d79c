use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use voiceflow_models::Job;

use crate::{JobMutator, Store, StoreError};

/// In-process store backed by a reader/writer-locked map.
///
/// Reads take the shared lock; updates hold the exclusive lock for the whole
/// read-modify-write, which is what serialises concurrent mutators on the
/// same id.
#[derive(Default)]
pub struct MemoryStore {
	jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn save(&self, job: &Job) -> Result<(), StoreError> {
		let mut jobs = self.jobs.write().await;
		jobs.insert(job.id.clone(), job.clone());
		Ok(())
	}

	async fn get(&self, id: &str) -> Result<Job, StoreError> {
		let jobs = self.jobs.read().await;
		jobs.get(id)
			.cloned()
			.ok_or_else(|| StoreError::NotFound(id.to_string()))
	}

	async fn update(&self, id: &str, mutate: JobMutator) -> Result<Job, StoreError> {
		let mut jobs = self.jobs.write().await;
		let job = jobs
			.get_mut(id)
			.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
		mutate(job);
		Ok(job.clone())
	}

	async fn list(&self) -> Result<Vec<Job>, StoreError> {
		let jobs = self.jobs.read().await;
		let mut all: Vec<Job> = jobs.values().cloned().collect();
		all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(all)
	}

	async fn delete(&self, id: &str) -> Result<(), StoreError> {
		let mut jobs = self.jobs.write().await;
		jobs.remove(id)
			.map(|_| ())
			.ok_or_else(|| StoreError::NotFound(id.to_string()))
	}

	async fn close(&self) -> Result<(), StoreError> {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use voiceflow_models::JobStatus;

	fn test_job(name: &str) -> Job {
		Job::new(name, format!("uploads/{name}"))
	}

	#[tokio::test]
	async fn test_save_get_round_trip() {
		let store = MemoryStore::new();
		let job = test_job("a.mp3");
		store.save(&job).await.unwrap();

		let fetched = store.get(&job.id).await.unwrap();
		assert_eq!(fetched.id, job.id);
		assert_eq!(fetched.source_name, "a.mp3");
	}

	#[tokio::test]
	async fn test_save_is_upsert() {
		let store = MemoryStore::new();
		let mut job = test_job("a.mp3");
		store.save(&job).await.unwrap();
		store.save(&job).await.unwrap();

		job.status = JobStatus::Processing;
		store.save(&job).await.unwrap();

		let fetched = store.get(&job.id).await.unwrap();
		assert_eq!(fetched.status, JobStatus::Processing);
		assert_eq!(store.list().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_get_missing_is_not_found() {
		let store = MemoryStore::new();
		let err = store.get("nope").await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound(_)));
	}

	#[tokio::test]
	async fn test_update_applies_mutator() {
		let store = MemoryStore::new();
		let job = test_job("a.mp3");
		store.save(&job).await.unwrap();

		let updated = store
			.update(
				&job.id,
				Box::new(|j| {
					j.status = JobStatus::Processing;
					j.progress = 40;
				}),
			)
			.await
			.unwrap();
		assert_eq!(updated.progress, 40);

		let fetched = store.get(&job.id).await.unwrap();
		assert_eq!(fetched.status, JobStatus::Processing);
		assert_eq!(fetched.progress, 40);
	}

	#[tokio::test]
	async fn test_concurrent_updates_lose_nothing() {
		let store = Arc::new(MemoryStore::new());
		let job = test_job("a.mp3");
		store.save(&job).await.unwrap();

		let mut handles = Vec::new();
		for i in 0..50 {
			let store = Arc::clone(&store);
			let id = job.id.clone();
			handles.push(tokio::spawn(async move {
				store
					.update(&id, Box::new(move |j| j.vocabulary.push(format!("word-{i}"))))
					.await
					.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}

		let fetched = store.get(&job.id).await.unwrap();
		assert_eq!(fetched.vocabulary.len(), 50);
	}

	#[tokio::test]
	async fn test_list_newest_first() {
		let store = MemoryStore::new();
		let mut older = test_job("old.mp3");
		older.created_at = older.created_at - chrono::Duration::seconds(60);
		let newer = test_job("new.mp3");
		store.save(&older).await.unwrap();
		store.save(&newer).await.unwrap();

		let all = store.list().await.unwrap();
		assert_eq!(all.len(), 2);
		assert_eq!(all[0].id, newer.id);
		assert_eq!(all[1].id, older.id);
	}

	#[tokio::test]
	async fn test_delete() {
		let store = MemoryStore::new();
		let job = test_job("a.mp3");
		store.save(&job).await.unwrap();

		store.delete(&job.id).await.unwrap();
		assert!(matches!(store.get(&job.id).await, Err(StoreError::NotFound(_))));
		assert!(matches!(store.delete(&job.id).await, Err(StoreError::NotFound(_))));
	}
}
