mod engine;
mod error;
mod splitter;
mod subtitle;
mod whisper;

pub use engine::{EngineConfig, TranscriptionEngine, TranscriptionOutcome};
pub use error::{EngineError, SplitError, SttError};
pub use splitter::{FfmpegSplitter, MediaSplitter, SplitPlan};
pub use subtitle::{globalise_cues, render_srt, render_vtt};
pub use whisper::{SpeechToText, WhisperClient};
