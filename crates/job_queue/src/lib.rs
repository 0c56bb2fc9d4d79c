use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use voiceflow_models::Job;

mod memory;
mod rabbitmq;

pub use memory::MemoryQueue;
pub use rabbitmq::RabbitMqQueue;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
	#[error("queue is full")]
	Full,
	#[error("queue is closed")]
	Closed,
	#[error("queue unavailable: {0}")]
	Unavailable(String),
	#[error("poison message rejected: {0}")]
	Poison(String),
	#[error("payload serialization failed: {0}")]
	Serialization(#[from] serde_json::Error),
	#[error("broker error: {0}")]
	Broker(#[from] lapin::Error),
}

/// Acknowledgement state for one delivered job.
///
/// The handle travels beside the job, never inside it: it is process-local
/// and must not survive serialization or persistence.
pub enum DeliveryHandle {
	/// Memory-queue deliveries need no acknowledgement.
	Untracked,
	/// A broker delivery awaiting manual ack or nack.
	Amqp(lapin::acker::Acker),
}

/// A dequeued job paired with its acknowledgement handle.
pub struct Delivery {
	pub job: Job,
	pub handle: DeliveryHandle,
}

/// Transport between job producers and the worker pool.
///
/// `dequeue` blocks until a job arrives, the queue closes, or the caller's
/// cancellation token fires; the latter two surface as [`QueueError::Closed`]
/// within a bounded time. Each delivered message belongs to exactly one
/// worker from dequeue until ack/nack.
#[async_trait]
pub trait Queue: Send + Sync {
	/// Places a job for later consumption. Non-blocking: a bounded queue at
	/// capacity returns [`QueueError::Full`], a disconnected broker
	/// [`QueueError::Unavailable`].
	async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

	/// Blocks until a job is available and returns it with its handle.
	async fn dequeue(&self, cancel: &CancellationToken) -> Result<Delivery, QueueError>;

	/// Positive acknowledgement: the job was fully processed.
	async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError>;

	/// Negative acknowledgement with optional requeue.
	async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), QueueError>;

	/// Releases every blocked dequeuer with [`QueueError::Closed`]. Idempotent.
	async fn close(&self) -> Result<(), QueueError>;
}
