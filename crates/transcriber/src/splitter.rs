use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};
use voiceflow_models::Segment;

use crate::error::SplitError;

const DEFAULT_SEGMENT_DURATION_SECS: u64 = 600;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "avi", "mov"];

/// Splits a media file into time-bounded segments for parallel
/// transcription. Implementations own segment extraction and cleanup; the
/// engine only sees the ordered descriptor list.
#[async_trait]
pub trait MediaSplitter: Send + Sync {
	async fn split(&self, source: &Path) -> Result<SplitPlan, SplitError>;
}

/// The ordered segment list plus ownership of the temporary directory the
/// segment files live in. Dropping the plan removes that directory, so
/// cleanup happens on every engine exit path.
pub struct SplitPlan {
	pub segments: Vec<Segment>,
	pub total_duration: f64,
	cleanup: Option<SegmentDirGuard>,
}

impl SplitPlan {
	pub fn new(segments: Vec<Segment>, total_duration: f64) -> Self {
		Self {
			segments,
			total_duration,
			cleanup: None,
		}
	}

	pub fn with_cleanup_dir(mut self, dir: PathBuf) -> Self {
		self.cleanup = Some(SegmentDirGuard { dir });
		self
	}
}

struct SegmentDirGuard {
	dir: PathBuf,
}

impl Drop for SegmentDirGuard {
	fn drop(&mut self) {
		debug!(dir = %self.dir.display(), "removing segment directory");
		if let Err(e) = std::fs::remove_dir_all(&self.dir) {
			warn!(dir = %self.dir.display(), error = %e, "failed to remove segment directory");
		}
	}
}

/// ffmpeg/ffprobe-backed splitter. Audio sources are sliced with a stream
/// copy; video containers get their audio track transcoded to mp3.
pub struct FfmpegSplitter {
	segment_duration_secs: u64,
}

impl FfmpegSplitter {
	pub fn new(segment_duration_secs: u64) -> Self {
		let segment_duration_secs = if segment_duration_secs == 0 {
			DEFAULT_SEGMENT_DURATION_SECS
		} else {
			segment_duration_secs
		};
		Self { segment_duration_secs }
	}

	async fn probe_duration(&self, source: &Path) -> Result<f64, SplitError> {
		let output = Command::new("ffprobe")
			.args([
				"-v",
				"error",
				"-show_entries",
				"format=duration",
				"-of",
				"default=noprint_wrappers=1:nokey=1",
			])
			.arg(source)
			.output()
			.await?;

		if !output.status.success() {
			return Err(SplitError::Probe(
				String::from_utf8_lossy(&output.stderr).trim().to_string(),
			));
		}

		let raw = String::from_utf8_lossy(&output.stdout);
		let raw = raw.trim();
		raw.parse::<f64>()
			.map_err(|e| SplitError::Probe(format!("unparseable duration {raw:?}: {e}")))
	}

	async fn extract_segment(
		&self,
		source: &Path,
		output_path: &Path,
		index: usize,
		start: f64,
	) -> Result<(), SplitError> {
		let is_video = source
			.extension()
			.and_then(|e| e.to_str())
			.map(|e| VIDEO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
			.unwrap_or(false);

		let mut command = Command::new("ffmpeg");
		command
			.arg("-i")
			.arg(source)
			.args(["-ss", &format!("{start:.2}")])
			.args(["-t", &format!("{:.2}", self.segment_duration_secs as f64)]);

		if is_video {
			// Strip the video stream and transcode the audio track.
			command.args(["-vn", "-acodec", "libmp3lame", "-ab", "128k"]);
		} else {
			// Pure audio slices without re-encoding.
			command.args(["-acodec", "copy"]);
		}

		let output = command.arg("-y").arg(output_path).output().await?;
		if !output.status.success() {
			return Err(SplitError::Extract {
				index,
				detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
			});
		}
		Ok(())
	}
}

/// Computes the `(start, end)` pairs covering `duration`. An exact multiple
/// of the segment length produces no zero-length tail.
fn segment_bounds(duration: f64, segment_len: u64) -> Vec<(f64, f64)> {
	let segment_len = segment_len as f64;
	let count = (duration / segment_len).ceil().max(1.0) as usize;
	(0..count)
		.map(|i| {
			let start = i as f64 * segment_len;
			let end = (start + segment_len).min(duration);
			(start, end)
		})
		.collect()
}

#[async_trait]
impl MediaSplitter for FfmpegSplitter {
	async fn split(&self, source: &Path) -> Result<SplitPlan, SplitError> {
		let duration = self.probe_duration(source).await?;
		debug!(source = %source.display(), duration, "probed media duration");

		if duration <= self.segment_duration_secs as f64 {
			// Short media: the whole file is the single segment, no
			// directory to create or clean.
			return Ok(SplitPlan::new(
				vec![Segment {
					index: 0,
					path: source.to_path_buf(),
					start_seconds: 0.0,
					end_seconds: duration,
				}],
				duration,
			));
		}

		let parent = source.parent().unwrap_or_else(|| Path::new("."));
		let stem = source
			.file_stem()
			.and_then(|s| s.to_str())
			.unwrap_or("media");
		let segments_dir = parent.join(format!("segments_{stem}"));
		tokio::fs::create_dir_all(&segments_dir).await?;

		let bounds = segment_bounds(duration, self.segment_duration_secs);
		info!(
			source = %source.display(),
			count = bounds.len(),
			segment_secs = self.segment_duration_secs,
			"splitting media into {} segments",
			bounds.len()
		);

		// Guard created up front: a failed extraction below must still
		// remove whatever was already written.
		let mut plan = SplitPlan::new(Vec::with_capacity(bounds.len()), duration)
			.with_cleanup_dir(segments_dir.clone());

		for (index, (start, end)) in bounds.into_iter().enumerate() {
			let segment_path = segments_dir.join(format!("segment_{index:03}.mp3"));
			self.extract_segment(source, &segment_path, index, start).await?;
			plan.segments.push(Segment {
				index,
				path: segment_path,
				start_seconds: start,
				end_seconds: end,
			});
		}

		Ok(plan)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_exact_multiple_has_no_zero_length_tail() {
		let bounds = segment_bounds(1800.0, 600);
		assert_eq!(bounds.len(), 3);
		assert_eq!(bounds[2], (1200.0, 1800.0));
	}

	#[test]
	fn test_remainder_gets_short_tail() {
		let bounds = segment_bounds(1850.0, 600);
		assert_eq!(bounds.len(), 4);
		assert_eq!(bounds[3], (1800.0, 1850.0));
	}

	#[test]
	fn test_short_media_is_single_bound() {
		let bounds = segment_bounds(480.0, 600);
		assert_eq!(bounds, vec![(0.0, 480.0)]);
	}

	#[test]
	fn test_bounds_are_contiguous() {
		let bounds = segment_bounds(2503.7, 600);
		for pair in bounds.windows(2) {
			assert_eq!(pair[0].1, pair[1].0);
		}
		assert_eq!(bounds.last().unwrap().1, 2503.7);
	}

	#[test]
	fn test_drop_guard_removes_directory() {
		let tmp = tempfile::tempdir().unwrap();
		let dir = tmp.path().join("segments_x");
		std::fs::create_dir_all(&dir).unwrap();
		std::fs::write(dir.join("segment_000.mp3"), b"stub").unwrap();

		let plan = SplitPlan::new(Vec::new(), 0.0).with_cleanup_dir(dir.clone());
		assert!(dir.exists());
		drop(plan);
		assert!(!dir.exists());
	}
}
