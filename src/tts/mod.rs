//! Speech output: synthesis capability and the interruptible player.

pub mod player;
pub mod synthesizer;

pub use player::{PlaybackOutcome, PlaybackStopper, SpeechPlayer, chunk_samples};
#[cfg(feature = "http")]
pub use synthesizer::HttpSynthesizer;
pub use synthesizer::{MockSynthesizer, Synthesizer};
