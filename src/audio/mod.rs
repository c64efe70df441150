//! Audio in and out: device capture, chunked capture stream, VAD, output
//! streams and WAV/PCM conversion.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod output;
pub mod recorder;
pub mod stream;
pub mod vad;
pub mod wav;
