use async_trait::async_trait;
use voiceflow_models::Job;

mod hybrid;
mod memory;
mod postgres;
mod redis_store;

pub use hybrid::{HybridConfig, HybridStore};
pub use memory::MemoryStore;
pub use postgres::{PostgresConfig, PostgresStore};
pub use redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("job not found: {0}")]
	NotFound(String),
	#[error("redis error: {0}")]
	Redis(#[from] redis::RedisError),
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),
	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

/// A pure mutation applied to the current persisted record.
///
/// Mutators must be side-effect free: an implementation may re-apply one
/// against a different tier after a hot-tier failure.
pub type JobMutator = Box<dyn Fn(&mut Job) + Send + Sync>;

/// Persistence for job records. The store owns the canonical copy of every
/// job; workers hold transient references while processing.
#[async_trait]
pub trait Store: Send + Sync {
	/// Upserts the record.
	async fn save(&self, job: &Job) -> Result<(), StoreError>;

	/// Fetches one record by id.
	async fn get(&self, id: &str) -> Result<Job, StoreError>;

	/// Reads the current record, applies the mutator and writes the result
	/// back atomically with respect to other updates on the same id.
	/// Returns the record as written.
	async fn update(&self, id: &str, mutate: JobMutator) -> Result<Job, StoreError>;

	/// Lists records, most recent first where the backend can order them.
	async fn list(&self) -> Result<Vec<Job>, StoreError>;

	async fn delete(&self, id: &str) -> Result<(), StoreError>;

	/// Flushes and releases backend resources. Idempotent.
	async fn close(&self) -> Result<(), StoreError>;
}
