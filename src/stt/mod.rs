//! Speech-to-text: utterance segmentation, the transcription capability and
//! the session that ties them to the capture stream.

pub mod segmenter;
pub mod session;
pub mod transcriber;

pub use segmenter::{SegmentEvent, SegmenterConfig, Utterance, UtteranceSegmenter};
pub use session::{
    ActivityDetector, SessionConfig, TranscriptEvent, TranscriptObserver, TranscriptionSession,
    clean_transcription,
};
#[cfg(feature = "http")]
pub use transcriber::HttpTranscriber;
pub use transcriber::{MockTranscriber, Transcriber};
