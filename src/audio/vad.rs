//! Voice Activity Detection (VAD) module.
//!
//! Detects speech activity in audio streams using RMS-based thresholding
//! and a state machine that debounces onsets and waits out short pauses.
//! Durations are measured in samples, so results depend only on the audio
//! and not on how fast it is delivered.

use crate::config;

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Duration of silence before speech is considered ended (milliseconds).
    pub silence_duration_ms: u32,
    /// Minimum duration of speech before an onset is reported (milliseconds).
    pub min_speech_ms: u32,
    pub sample_rate: u32,
}

impl VadConfig {
    pub fn from_config(vad: &config::VadConfig, sample_rate: u32) -> Self {
        Self {
            speech_threshold: vad.speech_threshold,
            silence_duration_ms: vad.silence_duration_ms,
            min_speech_ms: vad.min_speech_ms,
            sample_rate,
        }
    }

    fn samples_for(&self, ms: u32) -> u64 {
        self.sample_rate as u64 * ms as u64 / 1000
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from_config(&config::VadConfig::default(), crate::defaults::SAMPLE_RATE)
    }
}

/// Current state of voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No speech detected.
    Idle,
    /// Loud audio seen, but not yet for `min_speech_ms`.
    Onset,
    /// Speech is being detected.
    Speaking,
    /// Silence detected, waiting to confirm speech end.
    MaybeSilence,
}

/// Events emitted by the VAD processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Speech lasted `min_speech_ms`; an utterance has begun.
    SpeechStart,
    /// Ongoing speech, or a pause within it.
    Speech,
    /// Nothing of interest.
    Silence,
    /// Speech has ended after `silence_duration_ms` of quiet.
    SpeechEnd,
}

/// Detailed VAD processing result with level information.
#[derive(Debug, Clone, Copy)]
pub struct VadResult {
    pub event: VadEvent,
    /// Current RMS level (0.0 to 1.0)
    pub level: f32,
    /// Milliseconds of trailing silence (when in MaybeSilence state)
    pub silence_ms: u32,
}

/// Voice Activity Detector state machine.
#[derive(Debug, Clone)]
pub struct Vad {
    config: VadConfig,
    state: VadState,
    speech_samples: u64,
    silence_samples: u64,
}

impl Vad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Idle,
            speech_samples: 0,
            silence_samples: 0,
        }
    }

    /// Processes audio samples and returns the corresponding VAD event.
    pub fn process(&mut self, samples: &[i16]) -> VadEvent {
        self.process_with_info(samples).event
    }

    /// Processes audio samples and returns detailed VAD result with level info.
    pub fn process_with_info(&mut self, samples: &[i16]) -> VadResult {
        let rms = calculate_rms(samples);
        let is_speech = rms > self.config.speech_threshold;
        let len = samples.len() as u64;
        let min_speech = self.config.samples_for(self.config.min_speech_ms);
        let silence_needed = self.config.samples_for(self.config.silence_duration_ms);

        let event = match self.state {
            VadState::Idle => {
                if is_speech {
                    self.speech_samples = len;
                    self.silence_samples = 0;
                    self.onset_or_start(min_speech)
                } else {
                    VadEvent::Silence
                }
            }
            VadState::Onset => {
                if is_speech {
                    self.speech_samples += len;
                    self.onset_or_start(min_speech)
                } else {
                    // Too short to count: a click or a cough.
                    self.reset();
                    VadEvent::Silence
                }
            }
            VadState::Speaking => {
                if is_speech {
                    self.speech_samples += len;
                } else {
                    self.state = VadState::MaybeSilence;
                    self.silence_samples = len;
                }
                self.end_or_continue(silence_needed)
            }
            VadState::MaybeSilence => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.speech_samples += len;
                    self.silence_samples = 0;
                } else {
                    self.silence_samples += len;
                }
                self.end_or_continue(silence_needed)
            }
        };

        VadResult {
            event,
            level: rms,
            silence_ms: (self.silence_samples * 1000 / self.config.sample_rate.max(1) as u64)
                as u32,
        }
    }

    fn onset_or_start(&mut self, min_speech: u64) -> VadEvent {
        if self.speech_samples >= min_speech {
            self.state = VadState::Speaking;
            VadEvent::SpeechStart
        } else {
            self.state = VadState::Onset;
            VadEvent::Silence
        }
    }

    fn end_or_continue(&mut self, silence_needed: u64) -> VadEvent {
        if self.state == VadState::MaybeSilence && self.silence_samples >= silence_needed {
            self.reset();
            VadEvent::SpeechEnd
        } else {
            VadEvent::Speech
        }
    }

    /// Returns the current VAD state.
    pub fn state(&self) -> VadState {
        self.state
    }

    /// True once an utterance has started and not yet ended.
    pub fn in_speech(&self) -> bool {
        matches!(self.state, VadState::Speaking | VadState::MaybeSilence)
    }

    /// Resets the VAD to idle state.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.speech_samples = 0;
        self.silence_samples = 0;
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
