use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use voiceflow_models::Job;

use crate::{Delivery, DeliveryHandle, Queue, QueueError};

/// Bounded in-process FIFO backed by a tokio channel.
///
/// Enqueue never blocks; a full buffer is reported to the producer so the
/// upload surface can shed load instead of hiding it. Jobs still buffered
/// when the queue closes are dropped, which is the accepted durability level
/// of this implementation.
pub struct MemoryQueue {
	tx: mpsc::Sender<Job>,
	rx: Mutex<mpsc::Receiver<Job>>,
	closed: CancellationToken,
}

impl MemoryQueue {
	pub fn new(buffer_size: usize) -> Self {
		let (tx, rx) = mpsc::channel(buffer_size.max(1));
		Self {
			tx,
			rx: Mutex::new(rx),
			closed: CancellationToken::new(),
		}
	}
}

#[async_trait]
impl Queue for MemoryQueue {
	async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
		if self.closed.is_cancelled() {
			return Err(QueueError::Closed);
		}
		match self.tx.try_send(job.clone()) {
			Ok(()) => Ok(()),
			Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::Full),
			Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
		}
	}

	async fn dequeue(&self, cancel: &CancellationToken) -> Result<Delivery, QueueError> {
		tokio::select! {
			_ = cancel.cancelled() => Err(QueueError::Closed),
			_ = self.closed.cancelled() => Err(QueueError::Closed),
			received = async {
				let mut rx = self.rx.lock().await;
				rx.recv().await
			} => match received {
				Some(job) => Ok(Delivery {
					job,
					handle: DeliveryHandle::Untracked,
				}),
				None => Err(QueueError::Closed),
			},
		}
	}

	async fn ack(&self, _handle: DeliveryHandle) -> Result<(), QueueError> {
		Ok(())
	}

	async fn nack(&self, _handle: DeliveryHandle, _requeue: bool) -> Result<(), QueueError> {
		Ok(())
	}

	async fn close(&self) -> Result<(), QueueError> {
		self.closed.cancel();
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::time::Duration;

	fn test_job(name: &str) -> Job {
		Job::new(name, format!("uploads/{name}"))
	}

	#[tokio::test]
	async fn test_enqueue_dequeue_fifo() {
		let queue = MemoryQueue::new(4);
		let cancel = CancellationToken::new();

		let first = test_job("first.mp3");
		let second = test_job("second.mp3");
		queue.enqueue(&first).await.unwrap();
		queue.enqueue(&second).await.unwrap();

		let a = queue.dequeue(&cancel).await.unwrap();
		let b = queue.dequeue(&cancel).await.unwrap();
		assert_eq!(a.job.id, first.id);
		assert_eq!(b.job.id, second.id);
	}

	#[tokio::test]
	async fn test_enqueue_full_does_not_block() {
		let queue = MemoryQueue::new(1);
		queue.enqueue(&test_job("a.mp3")).await.unwrap();

		let err = queue.enqueue(&test_job("b.mp3")).await.unwrap_err();
		assert!(matches!(err, QueueError::Full));
	}

	#[tokio::test]
	async fn test_close_releases_blocked_dequeuer() {
		let queue = Arc::new(MemoryQueue::new(1));
		let cancel = CancellationToken::new();

		let waiting = {
			let queue = Arc::clone(&queue);
			let cancel = cancel.clone();
			tokio::spawn(async move { queue.dequeue(&cancel).await })
		};

		// Give the dequeuer time to park.
		tokio::time::sleep(Duration::from_millis(20)).await;
		queue.close().await.unwrap();

		let result = tokio::time::timeout(Duration::from_secs(1), waiting)
			.await
			.expect("dequeue did not unblock after close")
			.unwrap();
		assert!(matches!(result, Err(QueueError::Closed)));
	}

	#[tokio::test]
	async fn test_cancellation_releases_blocked_dequeuer() {
		let queue = Arc::new(MemoryQueue::new(1));
		let cancel = CancellationToken::new();

		let waiting = {
			let queue = Arc::clone(&queue);
			let cancel = cancel.clone();
			tokio::spawn(async move { queue.dequeue(&cancel).await })
		};

		tokio::time::sleep(Duration::from_millis(20)).await;
		cancel.cancel();

		let result = tokio::time::timeout(Duration::from_secs(1), waiting)
			.await
			.expect("dequeue did not observe cancellation")
			.unwrap();
		assert!(matches!(result, Err(QueueError::Closed)));
	}

	#[tokio::test]
	async fn test_enqueue_after_close_is_rejected() {
		let queue = MemoryQueue::new(2);
		queue.close().await.unwrap();
		// Close is idempotent.
		queue.close().await.unwrap();

		let err = queue.enqueue(&test_job("late.mp3")).await.unwrap_err();
		assert!(matches!(err, QueueError::Closed));
	}

	#[tokio::test]
	async fn test_ack_and_nack_are_noops() {
		let queue = MemoryQueue::new(1);
		let cancel = CancellationToken::new();
		queue.enqueue(&test_job("x.mp3")).await.unwrap();

		let delivery = queue.dequeue(&cancel).await.unwrap();
		queue.ack(delivery.handle).await.unwrap();
		queue.nack(DeliveryHandle::Untracked, true).await.unwrap();
	}
}
