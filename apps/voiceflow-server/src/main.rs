mod config;
mod error;
mod handlers;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use voiceflow_queue::{MemoryQueue, Queue, RabbitMqQueue};
use voiceflow_storage::{
	HybridStore, MemoryStore, PostgresConfig, PostgresStore, RedisStore, Store,
};
use voiceflow_transcriber::{EngineConfig, FfmpegSplitter, TranscriptionEngine, WhisperClient};
use voiceflow_worker::{WorkerConfig, WorkerPool};

use config::{Config, QueueKind, StoreKind};
use handlers::AppState;

#[tokio::main]
async fn main() -> Result<()> {
	dotenvy::dotenv().ok();
	let config = Config::parse();
	config.validate().map_err(anyhow::Error::msg)?;
	init_tracing(&config);

	tokio::fs::create_dir_all(&config.upload_dir)
		.await
		.with_context(|| format!("creating upload directory {}", config.upload_dir))?;

	let store = build_store(&config).await?;
	let queue = build_queue(&config).await?;
	let engine = build_engine(&config)?;

	let pool = WorkerPool::start(
		config.worker_pool_size,
		Arc::clone(&queue),
		Arc::clone(&store),
		engine,
		WorkerConfig {
			job_timeout: Duration::from_secs(config.job_timeout_minutes * 60),
			..WorkerConfig::default()
		},
	);

	let state = AppState {
		store: Arc::clone(&store),
		queue: Arc::clone(&queue),
		config: Arc::new(config.clone()),
	};
	let app = handlers::router(state);

	let listener = TcpListener::bind((config.host.as_str(), config.port))
		.await
		.with_context(|| format!("binding {}:{}", config.host, config.port))?;
	info!(host = %config.host, port = config.port, workers = config.worker_pool_size, "voiceflow server listening");

	axum::serve(listener, app)
		.with_graceful_shutdown(wait_for_shutdown_signal())
		.await?;

	// HTTP has stopped accepting work. Tear the processing side down in
	// order: workers first so every in-flight job settles its delivery,
	// then the queue to release anything still parked in dequeue, then the
	// store so the hybrid sync queue drains.
	info!("shutting down: draining workers");
	pool.shutdown(Duration::from_secs(config.shutdown_grace_seconds)).await;
	if let Err(e) = queue.close().await {
		warn!(error = %e, "queue close failed");
	}
	if let Err(e) = store.close().await {
		warn!(error = %e, "store close failed");
	}
	info!("shutdown complete");
	Ok(())
}

fn init_tracing(config: &Config) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	if config.log_json {
		tracing_subscriber::fmt().with_env_filter(filter).json().init();
	} else {
		tracing_subscriber::fmt().with_env_filter(filter).init();
	}
}

async fn build_store(config: &Config) -> Result<Arc<dyn Store>> {
	let store: Arc<dyn Store> = match config.store_type {
		StoreKind::Memory => {
			info!("using in-memory store");
			Arc::new(MemoryStore::new())
		}
		StoreKind::Redis => {
			info!(addr = %config.redis_addr, "using redis store");
			Arc::new(connect_redis(config).await?)
		}
		StoreKind::Postgres => {
			info!(host = %config.postgres_host, "using postgres store");
			Arc::new(connect_postgres(config).await?)
		}
		StoreKind::Hybrid => {
			info!(
				redis = %config.redis_addr,
				postgres = %config.postgres_host,
				"using hybrid store (redis + postgres)"
			);
			let hot: Arc<dyn Store> = Arc::new(connect_redis(config).await?);
			let cold: Arc<dyn Store> = Arc::new(connect_postgres(config).await?);
			Arc::new(HybridStore::new(hot, cold))
		}
	};
	Ok(store)
}

async fn connect_redis(config: &Config) -> Result<RedisStore> {
	RedisStore::connect(
		&config.redis_addr,
		&config.redis_password,
		config.redis_db,
		Duration::from_secs(config.redis_ttl_hours * 3600),
	)
	.await
	.context("connecting to redis")
}

async fn connect_postgres(config: &Config) -> Result<PostgresStore> {
	PostgresStore::connect(&PostgresConfig {
		host: config.postgres_host.clone(),
		port: config.postgres_port,
		user: config.postgres_user.clone(),
		password: config.postgres_password.clone(),
		database: config.postgres_database.clone(),
		ssl_mode: config.postgres_ssl_mode.clone(),
	})
	.await
	.context("connecting to postgres")
}

async fn build_queue(config: &Config) -> Result<Arc<dyn Queue>> {
	let queue: Arc<dyn Queue> = match config.queue_type {
		QueueKind::Memory => {
			info!(buffer = config.queue_buffer_size, "using in-memory queue");
			Arc::new(MemoryQueue::new(config.queue_buffer_size))
		}
		QueueKind::Rabbitmq => {
			info!(queue = %config.rabbitmq_queue, "using rabbitmq queue");
			// Prefetch matches the pool size so the broker hands this
			// process exactly one unacked message per worker.
			let prefetch = config.worker_pool_size.min(u16::MAX as usize) as u16;
			Arc::new(
				RabbitMqQueue::connect(&config.rabbitmq_url, &config.rabbitmq_queue, prefetch)
					.await
					.context("connecting to rabbitmq")?,
			)
		}
	};
	Ok(queue)
}

fn build_engine(config: &Config) -> Result<Arc<TranscriptionEngine>> {
	let stt = Arc::new(
		WhisperClient::new(config.openai_api_key.as_str()).context("building whisper client")?,
	);
	let splitter = Arc::new(FfmpegSplitter::new(config.segment_duration));
	Ok(Arc::new(TranscriptionEngine::new(
		stt,
		splitter,
		EngineConfig {
			segment_concurrency: config.segment_concurrency,
			max_retries: config.max_retries,
			..EngineConfig::default()
		},
	)))
}

async fn wait_for_shutdown_signal() {
	let ctrl_c = async {
		signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
	};

	#[cfg(unix)]
	let terminate = async {
		signal::unix::signal(signal::unix::SignalKind::terminate())
			.expect("failed to install SIGTERM handler")
			.recv()
			.await;
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
	info!("shutdown signal received");
}
