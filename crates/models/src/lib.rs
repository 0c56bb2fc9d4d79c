mod job;
mod segment;

pub use job::{InvalidStatus, Job, JobStatus, WordDetail};
pub use segment::{Cue, Segment, SegmentTranscript};
