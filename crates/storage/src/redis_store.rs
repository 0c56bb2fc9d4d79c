use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::debug;
use voiceflow_models::Job;

use crate::{JobMutator, Store, StoreError};

const JOB_KEY_PREFIX: &str = "voiceflow:job:";
const INDEX_KEY: &str = "voiceflow:jobs:index";

/// Hot-tier store: one JSON blob per job under a TTL plus a sorted-set index
/// scored by creation time for recency-first listing.
///
/// Update is read-modify-save without cross-key coordination; workers are
/// the only writers for a given job id, so last-writer-wins per key stays
/// within the store contract.
pub struct RedisStore {
	conn: ConnectionManager,
	ttl: Duration,
}

impl RedisStore {
	/// Connects and verifies the server responds. `db` selects the logical
	/// database; an empty password means no AUTH.
	pub async fn connect(
		addr: &str,
		password: &str,
		db: i64,
		ttl: Duration,
	) -> Result<Self, StoreError> {
		let url = if password.is_empty() {
			format!("redis://{addr}/{db}")
		} else {
			format!("redis://:{password}@{addr}/{db}")
		};
		let client = redis::Client::open(url)?;
		let mut conn = client.get_connection_manager().await?;

		let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
		debug!(addr, response = %pong, "redis store connected");

		Ok(Self { conn, ttl })
	}

	fn job_key(id: &str) -> String {
		format!("{JOB_KEY_PREFIX}{id}")
	}
}

#[async_trait]
impl Store for RedisStore {
	async fn save(&self, job: &Job) -> Result<(), StoreError> {
		let payload = serde_json::to_vec(job)?;
		let mut conn = self.conn.clone();

		let _: () = conn
			.set_ex(Self::job_key(&job.id), payload, self.ttl.as_secs())
			.await?;
		let _: () = conn
			.zadd(INDEX_KEY, &job.id, job.created_at.timestamp() as f64)
			.await?;
		Ok(())
	}

	async fn get(&self, id: &str) -> Result<Job, StoreError> {
		let mut conn = self.conn.clone();
		let payload: Option<Vec<u8>> = conn.get(Self::job_key(id)).await?;
		match payload {
			Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
			None => Err(StoreError::NotFound(id.to_string())),
		}
	}

	async fn update(&self, id: &str, mutate: JobMutator) -> Result<Job, StoreError> {
		let mut job = self.get(id).await?;
		mutate(&mut job);
		self.save(&job).await?;
		Ok(job)
	}

	async fn list(&self) -> Result<Vec<Job>, StoreError> {
		let mut conn = self.conn.clone();
		let ids: Vec<String> = conn.zrevrange(INDEX_KEY, 0, -1).await?;

		let mut jobs = Vec::with_capacity(ids.len());
		for id in ids {
			match self.get(&id).await {
				Ok(job) => jobs.push(job),
				Err(StoreError::NotFound(_)) => {
					// Blob expired under its TTL; evict the index entry lazily.
					let _: () = conn.zrem(INDEX_KEY, &id).await?;
				}
				Err(e) => return Err(e),
			}
		}
		Ok(jobs)
	}

	async fn delete(&self, id: &str) -> Result<(), StoreError> {
		let mut conn = self.conn.clone();
		let removed: i64 = conn.del(Self::job_key(id)).await?;
		let _: () = conn.zrem(INDEX_KEY, id).await?;
		if removed == 0 {
			return Err(StoreError::NotFound(id.to_string()));
		}
		Ok(())
	}

	async fn close(&self) -> Result<(), StoreError> {
		// The multiplexed connection closes when the last clone drops.
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_job_key_shape() {
		assert_eq!(RedisStore::job_key("abc-123"), "voiceflow:job:abc-123");
	}
}
