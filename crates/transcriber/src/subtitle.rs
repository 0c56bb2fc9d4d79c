use std::path::{Path, PathBuf};
use voiceflow_models::{Cue, Segment, SegmentTranscript};

/// Translates segment-local cues into global time by adding each segment's
/// start offset, preserving segment-index order. Blank cue texts are
/// dropped here so both renderers see the same list.
pub fn globalise_cues(segments: &[Segment], transcripts: &[Option<SegmentTranscript>]) -> Vec<Cue> {
	let mut cues = Vec::new();
	for segment in segments {
		let Some(Some(transcript)) = transcripts.get(segment.index) else {
			continue;
		};
		for cue in &transcript.cues {
			let text = cue.text.trim();
			if text.is_empty() {
				continue;
			}
			cues.push(Cue {
				start: segment.start_seconds + cue.start,
				end: segment.start_seconds + cue.end,
				text: text.to_string(),
			});
		}
	}
	cues
}

/// SRT: numbered cues with `HH:MM:SS,mmm` timestamps.
pub fn render_srt(cues: &[Cue]) -> String {
	let mut out = String::new();
	for (i, cue) in cues.iter().enumerate() {
		out.push_str(&format!(
			"{}\n{} --> {}\n{}\n\n",
			i + 1,
			format_timestamp(cue.start, ','),
			format_timestamp(cue.end, ','),
			cue.text
		));
	}
	out
}

/// WebVTT: the same cue list with a `WEBVTT` header and dot separators.
pub fn render_vtt(cues: &[Cue]) -> String {
	let mut out = String::from("WEBVTT\n\n");
	for (i, cue) in cues.iter().enumerate() {
		out.push_str(&format!(
			"{}\n{} --> {}\n{}\n\n",
			i + 1,
			format_timestamp(cue.start, '.'),
			format_timestamp(cue.end, '.'),
			cue.text
		));
	}
	out
}

fn format_timestamp(seconds: f64, millis_sep: char) -> String {
	let whole = seconds as u64;
	let hours = whole / 3600;
	let minutes = (whole % 3600) / 60;
	let secs = whole % 60;
	let millis = ((seconds - whole as f64) * 1000.0) as u64;
	format!("{hours:02}:{minutes:02}:{secs:02}{millis_sep}{millis:03}")
}

/// Writes both subtitle files adjacent to the source and returns their
/// paths, plain format first.
pub(crate) fn write_subtitles(
	segments: &[Segment],
	transcripts: &[Option<SegmentTranscript>],
	source: &Path,
) -> std::io::Result<Vec<String>> {
	let cues = globalise_cues(segments, transcripts);

	let srt_path: PathBuf = source.with_extension("srt");
	let vtt_path: PathBuf = source.with_extension("vtt");
	std::fs::write(&srt_path, render_srt(&cues))?;
	std::fs::write(&vtt_path, render_vtt(&cues))?;

	Ok(vec![
		srt_path.to_string_lossy().into_owned(),
		vtt_path.to_string_lossy().into_owned(),
	])
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	fn segment(index: usize, start: f64, end: f64) -> Segment {
		Segment {
			index,
			path: PathBuf::from(format!("seg-{index}.mp3")),
			start_seconds: start,
			end_seconds: end,
		}
	}

	#[test]
	fn test_timestamp_formatting() {
		assert_eq!(format_timestamp(65.5, ','), "00:01:05,500");
		assert_eq!(format_timestamp(65.5, '.'), "00:01:05.500");
		assert_eq!(format_timestamp(3661.25, ','), "01:01:01,250");
		assert_eq!(format_timestamp(0.0, '.'), "00:00:00.000");
	}

	#[test]
	fn test_cues_are_globalised_by_segment_offset() {
		let segments = vec![segment(0, 0.0, 600.0), segment(1, 600.0, 1200.0)];
		let transcripts = vec![
			Some(SegmentTranscript {
				text: "a".to_string(),
				language: None,
				cues: vec![Cue { start: 1.0, end: 4.0, text: "first".to_string() }],
			}),
			Some(SegmentTranscript {
				text: "b".to_string(),
				language: None,
				cues: vec![Cue { start: 2.5, end: 6.0, text: "second".to_string() }],
			}),
		];

		let cues = globalise_cues(&segments, &transcripts);
		assert_eq!(cues.len(), 2);
		assert_eq!(cues[0].start, 1.0);
		assert_eq!(cues[1].start, 602.5);
		// File order must have non-decreasing start times.
		assert!(cues.windows(2).all(|w| w[0].start <= w[1].start));
	}

	#[test]
	fn test_blank_cues_are_skipped() {
		let segments = vec![segment(0, 0.0, 600.0)];
		let transcripts = vec![Some(SegmentTranscript {
			text: "x".to_string(),
			language: None,
			cues: vec![
				Cue { start: 0.0, end: 1.0, text: "  ".to_string() },
				Cue { start: 1.0, end: 2.0, text: " kept ".to_string() },
			],
		})];

		let cues = globalise_cues(&segments, &transcripts);
		assert_eq!(cues.len(), 1);
		assert_eq!(cues[0].text, "kept");
	}

	#[test]
	fn test_srt_rendering() {
		let cues = vec![Cue { start: 0.0, end: 5.2, text: "Hello".to_string() }];
		let srt = render_srt(&cues);
		assert_eq!(srt, "1\n00:00:00,000 --> 00:00:05,200\nHello\n\n");
	}

	#[test]
	fn test_vtt_rendering_starts_with_header() {
		let cues = vec![
			Cue { start: 0.0, end: 2.0, text: "One".to_string() },
			Cue { start: 2.0, end: 4.0, text: "Two".to_string() },
		];
		let vtt = render_vtt(&cues);
		assert!(vtt.starts_with("WEBVTT\n\n"));
		assert!(vtt.contains("1\n00:00:00.000 --> 00:00:02.000\nOne\n\n"));
		assert!(vtt.contains("2\n00:00:02.000 --> 00:00:04.000\nTwo\n\n"));
	}

	#[test]
	fn test_write_subtitles_adjacent_to_source() {
		let tmp = tempfile::tempdir().unwrap();
		let source = tmp.path().join("talk.mp3");
		std::fs::write(&source, b"stub").unwrap();

		let segments = vec![segment(0, 0.0, 10.0)];
		let transcripts = vec![Some(SegmentTranscript {
			text: "hi".to_string(),
			language: None,
			cues: vec![Cue { start: 0.0, end: 2.0, text: "hi".to_string() }],
		})];

		let paths = write_subtitles(&segments, &transcripts, &source).unwrap();
		assert_eq!(paths.len(), 2);
		assert!(paths[0].ends_with("talk.srt"));
		assert!(paths[1].ends_with("talk.vtt"));
		assert!(tmp.path().join("talk.srt").exists());
		assert!(tmp.path().join("talk.vtt").exists());
	}
}
