use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
	BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
	QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use voiceflow_models::Job;

use crate::{Delivery, DeliveryHandle, Queue, QueueError};

const PERSISTENT_DELIVERY_MODE: u8 = 2;
const CONSUMER_TAG: &str = "voiceflow-worker";

/// RabbitMQ-backed queue.
///
/// Two independent connections: one for publishing (channel guarded by a
/// mutex so publishes stay serialised) and one for consuming. The queue is
/// declared durable and idempotently at startup; messages are published with
/// persistent delivery mode. The consumer prefetch equals the worker-pool
/// size so the broker hands out at most that many unacknowledged messages,
/// and the single consumer stream is shared by all workers behind a mutex so
/// each delivery reaches exactly one of them.
pub struct RabbitMqQueue {
	queue_name: String,
	publish_channel: Mutex<Channel>,
	consumer: Mutex<Consumer>,
	ack_serial: Mutex<()>,
	publish_conn: Connection,
	consume_conn: Connection,
	closed: CancellationToken,
}

impl RabbitMqQueue {
	/// Connects both ends and declares the durable queue. `prefetch` should
	/// be the worker-pool size.
	pub async fn connect(url: &str, queue_name: &str, prefetch: u16) -> Result<Self, QueueError> {
		let publish_conn = Connection::connect(url, ConnectionProperties::default()).await?;
		let consume_conn = Connection::connect(url, ConnectionProperties::default()).await?;

		let publish_channel = publish_conn.create_channel().await?;
		publish_channel
			.queue_declare(
				queue_name,
				QueueDeclareOptions {
					durable: true,
					..QueueDeclareOptions::default()
				},
				FieldTable::default(),
			)
			.await?;

		let consume_channel = consume_conn.create_channel().await?;
		consume_channel
			.basic_qos(prefetch.max(1), BasicQosOptions::default())
			.await?;
		let consumer = consume_channel
			.basic_consume(
				queue_name,
				CONSUMER_TAG,
				BasicConsumeOptions::default(),
				FieldTable::default(),
			)
			.await?;

		info!(queue = queue_name, prefetch, "rabbitmq queue ready");

		Ok(Self {
			queue_name: queue_name.to_string(),
			publish_channel: Mutex::new(publish_channel),
			consumer: Mutex::new(consumer),
			ack_serial: Mutex::new(()),
			publish_conn,
			consume_conn,
			closed: CancellationToken::new(),
		})
	}
}

#[async_trait]
impl Queue for RabbitMqQueue {
	async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
		if self.closed.is_cancelled() {
			return Err(QueueError::Closed);
		}
		let payload = serde_json::to_vec(job)?;

		let channel = self.publish_channel.lock().await;
		let confirm = channel
			.basic_publish(
				"",
				&self.queue_name,
				BasicPublishOptions::default(),
				&payload,
				BasicProperties::default()
					.with_delivery_mode(PERSISTENT_DELIVERY_MODE)
					.with_content_type("application/json".into()),
			)
			.await
			.map_err(|e| QueueError::Unavailable(e.to_string()))?;
		confirm
			.await
			.map_err(|e| QueueError::Unavailable(e.to_string()))?;

		Ok(())
	}

	async fn dequeue(&self, cancel: &CancellationToken) -> Result<Delivery, QueueError> {
		let next = tokio::select! {
			_ = cancel.cancelled() => return Err(QueueError::Closed),
			_ = self.closed.cancelled() => return Err(QueueError::Closed),
			next = async {
				let mut consumer = self.consumer.lock().await;
				consumer.next().await
			} => next,
		};

		match next {
			// The stream ends when the broker drops the consumer channel.
			None => Err(QueueError::Closed),
			Some(Err(e)) => Err(QueueError::Broker(e)),
			Some(Ok(delivery)) => match serde_json::from_slice::<Job>(&delivery.data) {
				Ok(job) => Ok(Delivery {
					job,
					handle: DeliveryHandle::Amqp(delivery.acker),
				}),
				Err(e) => {
					// Poison message: no job id is knowable, reject without requeue.
					warn!(error = %e, "rejecting unparseable message");
					delivery
						.acker
						.nack(BasicNackOptions {
							requeue: false,
							..BasicNackOptions::default()
						})
						.await?;
					Err(QueueError::Poison(e.to_string()))
				}
			},
		}
	}

	async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
		if let DeliveryHandle::Amqp(acker) = handle {
			let _serialised = self.ack_serial.lock().await;
			acker.ack(BasicAckOptions::default()).await?;
		}
		Ok(())
	}

	async fn nack(&self, handle: DeliveryHandle, requeue: bool) -> Result<(), QueueError> {
		if let DeliveryHandle::Amqp(acker) = handle {
			let _serialised = self.ack_serial.lock().await;
			acker
				.nack(BasicNackOptions {
					requeue,
					..BasicNackOptions::default()
				})
				.await?;
		}
		Ok(())
	}

	async fn close(&self) -> Result<(), QueueError> {
		if self.closed.is_cancelled() {
			return Ok(());
		}
		self.closed.cancel();

		if let Err(e) = self.consume_conn.close(200, "shutdown").await {
			warn!(error = %e, "closing consumer connection failed");
		}
		if let Err(e) = self.publish_conn.close(200, "shutdown").await {
			warn!(error = %e, "closing publisher connection failed");
		}

		info!(queue = %self.queue_name, "rabbitmq queue closed");
		Ok(())
	}
}
