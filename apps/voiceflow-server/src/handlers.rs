use axum::extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use voiceflow_models::Job;
use voiceflow_queue::Queue;
use voiceflow_storage::Store;

use crate::config::Config;
use crate::error::AppError;

/// Formats the Whisper service accepts; mp4/webm are video containers whose
/// audio track the splitter extracts.
const ACCEPTED_EXTENSIONS: &[&str] = &[
	".mp3", ".mp4", ".mpeg", ".mpga", ".m4a", ".wav", ".webm", ".flac", ".aac",
];

#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn Store>,
	pub queue: Arc<dyn Queue>,
	pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
	let max_upload = state.config.max_upload_size;
	Router::new()
		.route("/api/ping", get(ping))
		.route(
			"/api/upload",
			post(upload).layer(DefaultBodyLimit::max(max_upload)),
		)
		.route("/api/jobs", get(list_jobs))
		.route("/api/jobs/:job_id", get(get_job).delete(delete_job))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

fn is_accepted_extension(ext: &str) -> bool {
	let ext = ext.to_ascii_lowercase();
	ACCEPTED_EXTENSIONS.contains(&ext.as_str())
}

async fn ping() -> Json<serde_json::Value> {
	Json(json!({ "message": "pong", "version": env!("CARGO_PKG_VERSION") }))
}

/// Accepts one media file, persists the pending job and hands it to the
/// queue. The worker pool picks it up from there; this handler never blocks
/// on processing.
async fn upload(
	State(state): State<AppState>,
	mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
	let mut payload: Option<(String, Vec<u8>)> = None;
	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
	{
		if field.name() == Some("audio") {
			let file_name = field
				.file_name()
				.map(str::to_string)
				.ok_or_else(|| AppError::BadRequest("missing file name".to_string()))?;
			let bytes = field
				.bytes()
				.await
				.map_err(|e| AppError::BadRequest(format!("reading upload failed: {e}")))?;
			payload = Some((file_name, bytes.to_vec()));
			break;
		}
	}
	let (file_name, bytes) = payload
		.ok_or_else(|| AppError::BadRequest("missing 'audio' form field".to_string()))?;

	let extension = Path::new(&file_name)
		.extension()
		.map(|e| format!(".{}", e.to_string_lossy()))
		.unwrap_or_default();
	if !is_accepted_extension(&extension) {
		return Err(AppError::BadRequest(format!(
			"unsupported media format {extension:?}, accepted: {}",
			ACCEPTED_EXTENSIONS.join(", ")
		)));
	}

	let mut job = Job::new(file_name.as_str(), String::new());
	let stored_name = format!("{}{}", job.id, extension.to_ascii_lowercase());
	let save_path = Path::new(&state.config.upload_dir).join(&stored_name);
	job.source_path = save_path.to_string_lossy().into_owned();

	tokio::fs::write(&save_path, &bytes)
		.await
		.map_err(|e| AppError::Internal(anyhow::anyhow!("saving upload failed: {e}")))?;
	info!(job_id = %job.id, file = %file_name, bytes = bytes.len(), "upload stored");

	state.store.save(&job).await?;
	state.queue.enqueue(&job).await?;
	info!(job_id = %job.id, "job enqueued");

	Ok(Json(json!({
		"job_id": job.id,
		"source_name": job.source_name,
		"size": bytes.len(),
		"status": job.status,
		"message": "upload accepted, transcription in progress",
	})))
}

async fn get_job(
	State(state): State<AppState>,
	UrlPath(job_id): UrlPath<String>,
) -> Result<Json<Job>, AppError> {
	let job = state.store.get(&job_id).await?;
	Ok(Json(job))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
	let jobs = state.store.list().await?;
	Ok(Json(json!({ "total": jobs.len(), "jobs": jobs })))
}

async fn delete_job(
	State(state): State<AppState>,
	UrlPath(job_id): UrlPath<String>,
) -> Result<StatusCode, AppError> {
	state.store.delete(&job_id).await?;
	Ok(StatusCode::NO_CONTENT)
}
