use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use voiceflow_queue::QueueError;
use voiceflow_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
	#[error("{0}")]
	BadRequest(String),

	#[error("job not found")]
	NotFound,

	#[error("queue is full, try again later")]
	Busy,

	#[error("storage error: {0}")]
	Store(StoreError),

	#[error("queue error: {0}")]
	Queue(QueueError),

	#[error("an internal server error occurred")]
	Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::NotFound(_) => Self::NotFound,
			other => Self::Store(other),
		}
	}
}

impl From<QueueError> for AppError {
	fn from(e: QueueError) -> Self {
		match e {
			QueueError::Full => Self::Busy,
			other => Self::Queue(other),
		}
	}
}

impl AppError {
	const fn status_code(&self) -> StatusCode {
		match self {
			Self::BadRequest(_) => StatusCode::BAD_REQUEST,
			Self::NotFound => StatusCode::NOT_FOUND,
			Self::Busy => StatusCode::SERVICE_UNAVAILABLE,
			Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
			Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for AppError {
	fn into_response(self) -> Response {
		if let Self::Internal(ref e) = self {
			tracing::error!(error = ?e, "internal error");
		}
		(self.status_code(), Json(json!({ "error": self.to_string() }))).into_response()
	}
}
