use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use voiceflow_models::{Cue, SegmentTranscript};

use crate::error::SttError;

const WHISPER_API_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// The remote speech-to-text collaborator. Transient failures are expected;
/// retrying is the engine's job, not the client's.
#[async_trait]
pub trait SpeechToText: Send + Sync {
	async fn transcribe(
		&self,
		media: &Path,
		language_hint: Option<&str>,
	) -> Result<SegmentTranscript, SttError>;
}

/// OpenAI Whisper API client. Requests `verbose_json` so responses carry the
/// timed segments subtitle emission needs.
pub struct WhisperClient {
	api_key: String,
	endpoint: String,
	http: reqwest::Client,
}

impl WhisperClient {
	pub fn new(api_key: impl Into<String>) -> Result<Self, SttError> {
		let http = reqwest::Client::builder()
			.timeout(REQUEST_TIMEOUT)
			.build()?;
		Ok(Self {
			api_key: api_key.into(),
			endpoint: WHISPER_API_URL.to_string(),
			http,
		})
	}
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
	text: String,
	#[serde(default)]
	language: Option<String>,
	#[serde(default)]
	segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
	start: f64,
	end: f64,
	text: String,
}

impl From<WhisperResponse> for SegmentTranscript {
	fn from(response: WhisperResponse) -> Self {
		SegmentTranscript {
			text: response.text,
			language: response.language,
			cues: response
				.segments
				.into_iter()
				.map(|s| Cue {
					start: s.start,
					end: s.end,
					text: s.text,
				})
				.collect(),
		}
	}
}

#[async_trait]
impl SpeechToText for WhisperClient {
	async fn transcribe(
		&self,
		media: &Path,
		language_hint: Option<&str>,
	) -> Result<SegmentTranscript, SttError> {
		let bytes = tokio::fs::read(media).await?;
		let file_name = media
			.file_name()
			.and_then(|n| n.to_str())
			.unwrap_or("audio.mp3")
			.to_string();

		let mut form = Form::new()
			.part("file", Part::bytes(bytes).file_name(file_name))
			.text("model", "whisper-1")
			.text("response_format", "verbose_json");
		if let Some(language) = language_hint {
			form = form.text("language", language.to_string());
		}

		debug!(media = %media.display(), "sending segment to whisper");
		let response = self
			.http
			.post(&self.endpoint)
			.bearer_auth(&self.api_key)
			.multipart(form)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(SttError::Service {
				status: status.as_u16(),
				body,
			});
		}

		let parsed: WhisperResponse = response.json().await?;
		Ok(parsed.into())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_verbose_json_response_maps_to_transcript() {
		let raw = r#"{
			"task": "transcribe",
			"language": "english",
			"duration": 12.4,
			"text": "Hello there. General Kenobi.",
			"segments": [
				{"id": 0, "start": 0.0, "end": 4.2, "text": " Hello there."},
				{"id": 1, "start": 4.2, "end": 9.8, "text": " General Kenobi."}
			]
		}"#;
		let response: WhisperResponse = serde_json::from_str(raw).unwrap();
		let transcript: SegmentTranscript = response.into();

		assert_eq!(transcript.text, "Hello there. General Kenobi.");
		assert_eq!(transcript.language.as_deref(), Some("english"));
		assert_eq!(transcript.cues.len(), 2);
		assert_eq!(transcript.cues[1].start, 4.2);
		assert_eq!(transcript.cues[1].text, " General Kenobi.");
	}

	#[test]
	fn test_plain_json_response_still_parses() {
		// The plain format has no segments; the text projection must survive.
		let raw = r#"{"text": "short clip"}"#;
		let response: WhisperResponse = serde_json::from_str(raw).unwrap();
		let transcript: SegmentTranscript = response.into();

		assert_eq!(transcript.text, "short clip");
		assert!(transcript.cues.is_empty());
		assert!(transcript.language.is_none());
	}
}
