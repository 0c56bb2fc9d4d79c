#[derive(Debug, thiserror::Error)]
pub enum EngineError {
	#[error("media split failed: {0}")]
	Split(#[from] SplitError),
	#[error("segment {index} failed: {source}")]
	Segment {
		index: usize,
		#[source]
		source: SttError,
	},
	#[error("transcription cancelled")]
	Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
	#[error("ffprobe failed: {0}")]
	Probe(String),
	#[error("extracting segment {index} failed: {detail}")]
	Extract { index: usize, detail: String },
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
	#[error("request failed: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("service returned status {status}: {body}")]
	Service { status: u16, body: String },
	#[error("reading segment failed: {0}")]
	Io(#[from] std::io::Error),
	#[error("cancelled")]
	Cancelled,
}
