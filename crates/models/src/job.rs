use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of a transcription job.
///
/// Transitions are `pending -> processing -> {completed, failed}`;
/// `processing` may repeat when a broker redelivers an unacknowledged job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Pending => "pending",
			Self::Processing => "processing",
			Self::Completed => "completed",
			Self::Failed => "failed",
		}
	}

	/// Completed and failed jobs never leave their state again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}
}

impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for JobStatus {
	type Err = InvalidStatus;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"pending" => Ok(Self::Pending),
			"processing" => Ok(Self::Processing),
			"completed" => Ok(Self::Completed),
			"failed" => Ok(Self::Failed),
			other => Err(InvalidStatus(other.to_string())),
		}
	}
}

/// A vocabulary entry attached to a finished job by the external extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordDetail {
	pub word: String,
	pub definition: String,
	pub example: String,
}

/// The canonical unit of work: one uploaded media file, from submission to
/// terminal state.
///
/// This record is what travels over the queue (as JSON) and what every store
/// implementation persists. Broker acknowledgement state deliberately does
/// not live here; it is handed out beside the job at dequeue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
	pub id: String,
	pub source_name: String,
	pub source_path: String,
	pub status: JobStatus,
	pub progress: u8,
	#[serde(default)]
	pub result_text: String,
	#[serde(default)]
	pub subtitle_paths: Vec<String>,
	#[serde(default)]
	pub language: Option<String>,
	#[serde(default)]
	pub duration_seconds: Option<f64>,
	#[serde(default)]
	pub error_message: Option<String>,
	#[serde(default)]
	pub vocabulary: Vec<String>,
	#[serde(default)]
	pub vocabulary_detail: Vec<WordDetail>,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
	/// Creates a fresh pending job with a new unique id.
	pub fn new(source_name: impl Into<String>, source_path: impl Into<String>) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			source_name: source_name.into(),
			source_path: source_path.into(),
			status: JobStatus::Pending,
			progress: 0,
			result_text: String::new(),
			subtitle_paths: Vec::new(),
			language: None,
			duration_seconds: None,
			error_message: None,
			vocabulary: Vec::new(),
			vocabulary_detail: Vec::new(),
			created_at: Utc::now(),
			completed_at: None,
		}
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}
}
