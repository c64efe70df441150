use crate::error::{Result, TalkbackError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trait for audio source devices.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Read the samples captured since the last call.
    ///
    /// An empty vector means nothing is available yet. An
    /// `AudioCapture` error is a recoverable device hiccup (overflow, xrun);
    /// the caller pauses briefly and keeps reading.
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Mock audio source for testing
///
/// Serves queued chunks first, then repeats the fallback samples (or
/// nothing, after [`MockAudioSource::with_end`]).
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    queued: VecDeque<Vec<i16>>,
    exhausted_after_queue: bool,
    transient_failures: usize,
    should_fail_start: bool,
    should_fail_read: bool,
    fatal_read_after: Option<usize>,
    error_message: String,
    reads: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            queued: VecDeque::new(),
            exhausted_after_queue: false,
            transient_failures: 0,
            should_fail_start: false,
            should_fail_read: false,
            fatal_read_after: None,
            error_message: "mock audio error".to_string(),
            reads: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the samples returned once the queue is empty
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Queue chunks to be returned in order before the fallback samples
    pub fn with_chunks(mut self, chunks: impl IntoIterator<Item = Vec<i16>>) -> Self {
        self.queued.extend(chunks);
        self
    }

    /// Return nothing once the queued chunks are used up
    pub fn with_end(mut self) -> Self {
        self.exhausted_after_queue = true;
        self
    }

    /// Fail the first `count` reads with a recoverable error
    pub fn with_transient_failures(mut self, count: usize) -> Self {
        self.transient_failures = count;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on every read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Lose the device for good after `reads` successful reads
    pub fn with_fatal_read_failure_after(mut self, reads: usize) -> Self {
        self.fatal_read_after = Some(reads);
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    /// Shared count of `read_samples` calls, readable after the source has
    /// been moved into a capture thread.
    pub fn read_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// Shared count of `stop` calls.
    pub fn stop_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }

    fn error(&self) -> TalkbackError {
        TalkbackError::AudioCapture {
            message: self.error_message.clone(),
        }
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(self.error())
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let previous_reads = self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fatal_read_after.is_some_and(|after| previous_reads >= after) {
            return Err(TalkbackError::AudioDeviceNotFound {
                device: self.error_message.clone(),
            });
        }
        if self.should_fail_read {
            return Err(self.error());
        }
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(self.error());
        }
        if let Some(chunk) = self.queued.pop_front() {
            return Ok(chunk);
        }
        if self.exhausted_after_queue {
            Ok(Vec::new())
        } else {
            Ok(self.samples.clone())
        }
    }
}
