//! Cuts the capture stream into utterances.
//!
//! A VAD decides where speech starts and ends. Audio heard just before the
//! onset is kept in a short pre-roll so the first syllable is not clipped,
//! and long monologues are cut at `max_utterance_ms`.

use crate::audio::stream::AudioChunk;
use crate::audio::vad::{Vad, VadConfig, VadEvent};
use crate::config;
use std::collections::VecDeque;
use tracing::debug;

/// Segmenter tuning, in samples of the capture rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmenterConfig {
    pub vad: VadConfig,
    /// Audio kept from before the onset.
    pub pre_speech_ms: u32,
    /// Utterances are cut at this length even if speech continues.
    pub max_utterance_ms: u32,
}

impl SegmenterConfig {
    pub fn from_config(vad: &config::VadConfig, sample_rate: u32) -> Self {
        Self {
            vad: VadConfig::from_config(vad, sample_rate),
            pre_speech_ms: vad.pre_speech_ms,
            max_utterance_ms: vad.max_utterance_ms,
        }
    }

    fn samples_for(&self, ms: u32) -> usize {
        (self.vad.sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self::from_config(&config::VadConfig::default(), crate::defaults::SAMPLE_RATE)
    }
}

/// One segment of speech, ready for transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub samples: Vec<i16>,
    /// Sequence number of the chunk that confirmed the onset.
    pub first_sequence: u64,
    /// True if cut at the maximum length rather than at a pause.
    pub truncated: bool,
}

impl Utterance {
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        self.samples.len() as u64 * 1000 / sample_rate.max(1) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// Debounced speech onset.
    SpeechStarted { sequence: u64 },
    Utterance(Utterance),
}

/// Turns audio chunks into speech onsets and finished utterances.
#[derive(Debug)]
pub struct UtteranceSegmenter {
    config: SegmenterConfig,
    vad: Vad,
    pre_roll: VecDeque<i16>,
    pre_roll_capacity: usize,
    current: Vec<i16>,
    first_sequence: u64,
    max_samples: usize,
}

impl UtteranceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        // The pre-roll also has to hold the debounced onset itself.
        let pre_roll_capacity =
            config.samples_for(config.pre_speech_ms + config.vad.min_speech_ms);
        Self {
            vad: Vad::new(config.vad),
            pre_roll: VecDeque::with_capacity(pre_roll_capacity),
            pre_roll_capacity,
            current: Vec::new(),
            first_sequence: 0,
            max_samples: config.samples_for(config.max_utterance_ms).max(1),
            config,
        }
    }

    /// Feeds one chunk, returning what it completed (at most an onset and
    /// an utterance).
    pub fn push(&mut self, chunk: &AudioChunk) -> Vec<SegmentEvent> {
        let samples = chunk.samples();
        let mut events = Vec::new();

        match self.vad.process(samples) {
            VadEvent::Silence => self.remember(samples),
            VadEvent::SpeechStart => {
                self.current.clear();
                self.current.extend(self.pre_roll.drain(..));
                self.current.extend_from_slice(samples);
                self.first_sequence = chunk.sequence;
                debug!(sequence = chunk.sequence, "speech onset");
                events.push(SegmentEvent::SpeechStarted {
                    sequence: chunk.sequence,
                });
                if self.current.len() >= self.max_samples {
                    events.push(SegmentEvent::Utterance(self.cut(true)));
                }
            }
            VadEvent::Speech => {
                self.current.extend_from_slice(samples);
                if self.current.len() >= self.max_samples {
                    events.push(SegmentEvent::Utterance(self.cut(true)));
                }
            }
            VadEvent::SpeechEnd => {
                self.current.extend_from_slice(samples);
                events.push(SegmentEvent::Utterance(self.cut(false)));
            }
        }

        events
    }

    /// Returns the utterance in progress, if any. Used at end of input.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.vad.in_speech() && !self.current.is_empty() {
            Some(self.cut(false))
        } else {
            self.reset();
            None
        }
    }

    pub fn in_speech(&self) -> bool {
        self.vad.in_speech()
    }

    pub fn reset(&mut self) {
        self.vad.reset();
        self.pre_roll.clear();
        self.current.clear();
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    fn remember(&mut self, samples: &[i16]) {
        self.pre_roll.extend(samples.iter().copied());
        let excess = self.pre_roll.len().saturating_sub(self.pre_roll_capacity);
        self.pre_roll.drain(..excess);
    }

    fn cut(&mut self, truncated: bool) -> Utterance {
        let utterance = Utterance {
            samples: std::mem::take(&mut self.current),
            first_sequence: self.first_sequence,
            truncated,
        };
        debug!(
            samples = utterance.samples.len(),
            truncated, "utterance complete"
        );
        self.vad.reset();
        self.pre_roll.clear();
        utterance
    }
}
