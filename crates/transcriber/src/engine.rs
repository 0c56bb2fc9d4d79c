use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voiceflow_models::{Segment, SegmentTranscript};

use crate::error::{EngineError, SttError};
use crate::splitter::MediaSplitter;
use crate::subtitle;
use crate::whisper::SpeechToText;

const DEFAULT_SEGMENT_CONCURRENCY: usize = 3;
const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct EngineConfig {
	/// Concurrent segment processors per job.
	pub segment_concurrency: usize,
	/// Transcription attempts per segment.
	pub max_retries: u32,
	/// Base of the exponential retry backoff (base, 2·base, 4·base, …).
	pub retry_backoff_base: Duration,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			segment_concurrency: DEFAULT_SEGMENT_CONCURRENCY,
			max_retries: DEFAULT_MAX_RETRIES,
			retry_backoff_base: Duration::from_secs(1),
		}
	}
}

/// What a finished job carries back to the worker.
#[derive(Debug, Clone)]
pub struct TranscriptionOutcome {
	pub text: String,
	pub subtitle_paths: Vec<String>,
	pub language: Option<String>,
	pub duration_seconds: Option<f64>,
}

struct SegmentOutcome {
	index: usize,
	result: Result<SegmentTranscript, SttError>,
}

/// Per-job transcription pipeline: split the source, fan segments out over a
/// bounded processor pool, retry transient failures, then merge text and
/// emit subtitles in segment order.
pub struct TranscriptionEngine {
	stt: Arc<dyn SpeechToText>,
	splitter: Arc<dyn MediaSplitter>,
	config: EngineConfig,
}

impl TranscriptionEngine {
	pub fn new(stt: Arc<dyn SpeechToText>, splitter: Arc<dyn MediaSplitter>, config: EngineConfig) -> Self {
		let config = EngineConfig {
			segment_concurrency: config.segment_concurrency.max(1),
			max_retries: config.max_retries.max(1),
			retry_backoff_base: config.retry_backoff_base,
		};
		Self { stt, splitter, config }
	}

	/// Transcribes one media file. Progress percentages are sent on
	/// `progress` after each completed segment; the channel closes when the
	/// engine returns. Cancellation propagates into every in-flight RPC and
	/// retry sleep.
	pub async fn transcribe(
		&self,
		cancel: &CancellationToken,
		source: &Path,
		language_hint: Option<&str>,
		progress: mpsc::Sender<u8>,
	) -> Result<TranscriptionOutcome, EngineError> {
		// The plan owns the segment directory; dropping it on any exit path
		// below removes the temporary files.
		let plan = self.splitter.split(source).await?;
		let total = plan.segments.len();
		info!(source = %source.display(), segments = total, "media split into {} segment(s)", total);

		let (task_tx, task_rx) = mpsc::channel::<Segment>(total.max(1));
		let (result_tx, mut result_rx) = mpsc::channel::<SegmentOutcome>(total.max(1));
		let task_rx = Arc::new(Mutex::new(task_rx));

		for segment in &plan.segments {
			// Capacity equals the segment count, so this never waits.
			let _ = task_tx.send(segment.clone()).await;
		}
		drop(task_tx);

		let processors: Vec<_> = (0..self.config.segment_concurrency)
			.map(|processor_id| {
				tokio::spawn(segment_processor(
					processor_id,
					Arc::clone(&self.stt),
					Arc::clone(&task_rx),
					result_tx.clone(),
					cancel.clone(),
					language_hint.map(str::to_string),
					self.config.max_retries,
					self.config.retry_backoff_base,
				))
			})
			.collect();
		drop(result_tx);

		// Collect exactly |S| results; arrival order is irrelevant, the
		// index is what places a result.
		let mut transcripts: Vec<Option<SegmentTranscript>> = Vec::with_capacity(total);
		transcripts.resize_with(total, || None);
		let mut first_error: Option<(usize, SttError)> = None;
		let mut completed = 0usize;

		for _ in 0..total {
			let Some(outcome) = result_rx.recv().await else {
				// All processors gone without delivering |S| results; only
				// cancellation can cause this.
				break;
			};
			completed += 1;
			debug_assert!(completed <= total, "more results than segments");
			let pct = ((completed.min(total) * 100) / total.max(1)) as u8;
			let _ = progress.send(pct).await;

			match outcome.result {
				Ok(transcript) => {
					if outcome.index >= total || transcripts[outcome.index].is_some() {
						debug_assert!(false, "segment index {} out of range or duplicated", outcome.index);
						continue;
					}
					debug!(index = outcome.index, completed, total, "segment transcribed");
					transcripts[outcome.index] = Some(transcript);
				}
				Err(error) => {
					if first_error
						.as_ref()
						.map(|(index, _)| outcome.index < *index)
						.unwrap_or(true)
					{
						first_error = Some((outcome.index, error));
					}
				}
			}
		}

		for processor in processors {
			let _ = processor.await;
		}

		if let Some((index, error)) = first_error {
			if matches!(error, SttError::Cancelled) {
				return Err(EngineError::Cancelled);
			}
			return Err(EngineError::Segment { index, source: error });
		}
		if transcripts.iter().any(Option::is_none) {
			// Fewer than |S| successes without a recorded error only happens
			// when the run was torn down mid-flight.
			return Err(EngineError::Cancelled);
		}

		let text = transcripts
			.iter()
			.flatten()
			.map(|t| t.text.as_str())
			.collect::<Vec<_>>()
			.join(" ");
		let language = transcripts.iter().flatten().find_map(|t| t.language.clone());
		info!(chars = text.len(), "all segments transcribed");

		// Subtitle trouble never fails the job; the text result stands.
		let subtitle_paths = match subtitle::write_subtitles(&plan.segments, &transcripts, source) {
			Ok(paths) => paths,
			Err(e) => {
				warn!(error = %e, "subtitle generation failed");
				Vec::new()
			}
		};

		Ok(TranscriptionOutcome {
			text,
			subtitle_paths,
			language,
			duration_seconds: Some(plan.total_duration),
		})
	}
}

/// One unit of the processor pool: pulls segments off the shared task
/// channel until it drains. After cancellation it keeps draining, emitting a
/// cancelled result per remaining segment so the collector always sees |S|
/// results.
#[allow(clippy::too_many_arguments)]
async fn segment_processor(
	processor_id: usize,
	stt: Arc<dyn SpeechToText>,
	tasks: Arc<Mutex<mpsc::Receiver<Segment>>>,
	results: mpsc::Sender<SegmentOutcome>,
	cancel: CancellationToken,
	language_hint: Option<String>,
	max_retries: u32,
	backoff_base: Duration,
) {
	loop {
		let segment = {
			let mut rx = tasks.lock().await;
			match rx.recv().await {
				Some(segment) => segment,
				None => break,
			}
		};

		if cancel.is_cancelled() {
			let _ = results
				.send(SegmentOutcome {
					index: segment.index,
					result: Err(SttError::Cancelled),
				})
				.await;
			continue;
		}

		debug!(
			processor = processor_id,
			index = segment.index,
			start = segment.start_seconds,
			end = segment.end_seconds,
			"processing segment"
		);
		let result = transcribe_with_retry(
			stt.as_ref(),
			&cancel,
			&segment,
			language_hint.as_deref(),
			max_retries,
			backoff_base,
		)
		.await;

		let _ = results
			.send(SegmentOutcome {
				index: segment.index,
				result,
			})
			.await;
	}
}

/// Retries the remote call with exponential backoff (base, 2·base, 4·base…).
/// Cancellation aborts both the in-flight RPC and the backoff sleep.
/// Exhaustion surfaces the last attempt's error.
async fn transcribe_with_retry(
	stt: &dyn SpeechToText,
	cancel: &CancellationToken,
	segment: &Segment,
	language_hint: Option<&str>,
	max_retries: u32,
	backoff_base: Duration,
) -> Result<SegmentTranscript, SttError> {
	let mut last_error: Option<SttError> = None;

	for attempt in 0..max_retries {
		let result = tokio::select! {
			_ = cancel.cancelled() => return Err(SttError::Cancelled),
			result = stt.transcribe(&segment.path, language_hint) => result,
		};

		match result {
			Ok(transcript) => return Ok(transcript),
			Err(SttError::Cancelled) => return Err(SttError::Cancelled),
			Err(error) => {
				warn!(
					index = segment.index,
					attempt = attempt + 1,
					max_retries,
					error = %error,
					"segment transcription attempt failed"
				);
				last_error = Some(error);
			}
		}

		if attempt + 1 < max_retries {
			let backoff = backoff_base * 2u32.pow(attempt);
			tokio::select! {
				_ = cancel.cancelled() => return Err(SttError::Cancelled),
				_ = tokio::time::sleep(backoff) => {}
			}
		}
	}

	Err(last_error.unwrap_or(SttError::Cancelled))
}
