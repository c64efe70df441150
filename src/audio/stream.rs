//! Continuous capture into fixed-size, sequenced chunks.
//!
//! The device is read on a dedicated OS thread; chunks are handed to the
//! async side over a bounded tokio channel.

use crate::audio::recorder::AudioSource;
use crate::config::AudioConfig;
use crate::defaults;
use crate::error::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A fixed-size block of captured 16-bit PCM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    /// Position in the capture, starting at 0 and increasing by one.
    pub sequence: u64,
    samples: Vec<i16>,
}

impl AudioChunk {
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self { sequence, samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Configuration for the capture stream.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per emitted chunk.
    pub chunk_samples: usize,
    /// Pause after a device read error before reading again.
    pub recovery_pause: Duration,
    /// Polling interval when no samples are available.
    pub poll_interval: Duration,
    /// Chunks buffered between the capture thread and the consumer.
    pub channel_capacity: usize,
}

impl CaptureConfig {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            chunk_samples: audio.chunk_samples.max(1),
            recovery_pause: Duration::from_millis(audio.capture_recovery_ms),
            ..Self::default()
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_samples: defaults::CAPTURE_CHUNK_SAMPLES,
            recovery_pause: Duration::from_millis(defaults::CAPTURE_RECOVERY_MS),
            poll_interval: Duration::from_millis(10),
            channel_capacity: 256,
        }
    }
}

/// Continuous microphone capture producing [`AudioChunk`]s.
pub struct AudioCaptureStream<A: AudioSource> {
    source: A,
    config: CaptureConfig,
}

impl<A: AudioSource + 'static> AudioCaptureStream<A> {
    pub fn new(source: A, config: CaptureConfig) -> Self {
        Self { source, config }
    }

    /// Starts the device and the capture thread.
    ///
    /// Chunks flow until [`CaptureHandle::close`] is called (or the handle
    /// dropped) or the receiver is dropped. Transient device read errors are
    /// logged and followed by a short recovery pause. Any other read error
    /// stops capture and closes the channel.
    ///
    /// # Errors
    /// Returns an error if the device fails to start.
    pub fn start(mut self) -> Result<(mpsc::Receiver<AudioChunk>, CaptureHandle)> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let running = Arc::new(AtomicBool::new(true));
        let recoveries = Arc::new(AtomicU64::new(0));

        self.source.start()?;

        let thread = thread::Builder::new().name("audio-capture".to_string()).spawn({
            let running = Arc::clone(&running);
            let recoveries = Arc::clone(&recoveries);
            move || self.capture_loop(tx, running, recoveries)
        })?;

        Ok((
            rx,
            CaptureHandle {
                running,
                recoveries,
                thread: Some(thread),
            },
        ))
    }

    fn capture_loop(
        mut self,
        tx: mpsc::Sender<AudioChunk>,
        running: Arc<AtomicBool>,
        recoveries: Arc<AtomicU64>,
    ) {
        let chunk_samples = self.config.chunk_samples;
        let mut pending: Vec<i16> = Vec::with_capacity(chunk_samples * 2);
        let mut sequence = 0u64;

        'capture: while running.load(Ordering::SeqCst) {
            match self.source.read_samples() {
                Ok(samples) if !samples.is_empty() => {
                    pending.extend_from_slice(&samples);
                    while pending.len() >= chunk_samples {
                        let rest = pending.split_off(chunk_samples);
                        let chunk = AudioChunk::new(sequence, std::mem::replace(&mut pending, rest));
                        sequence += 1;
                        if !self.deliver(&tx, chunk, &running) {
                            break 'capture;
                        }
                    }
                }
                Ok(_) => thread::sleep(self.config.poll_interval),
                Err(e) if e.is_transient_device_error() => {
                    recoveries.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "audio capture error, recovering");
                    thread::sleep(self.config.recovery_pause);
                }
                Err(e) => {
                    error!(error = %e, "audio capture failed, stopping");
                    break 'capture;
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        if let Err(e) = self.source.stop() {
            warn!(error = %e, "failed to stop audio source");
        }
        debug!(chunks = sequence, "capture stopped");
    }

    /// Sends `chunk`, waiting while the channel is full. Returns false once
    /// the receiver is gone or capture was closed.
    fn deliver(
        &self,
        tx: &mpsc::Sender<AudioChunk>,
        mut chunk: AudioChunk,
        running: &AtomicBool,
    ) -> bool {
        loop {
            match tx.try_send(chunk) {
                Ok(()) => return true,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("capture receiver dropped");
                    return false;
                }
                Err(mpsc::error::TrySendError::Full(returned)) => {
                    if !running.load(Ordering::SeqCst) {
                        return false;
                    }
                    chunk = returned;
                    thread::sleep(self.config.poll_interval);
                }
            }
        }
    }
}

/// Owner handle for a running capture. Dropping it closes the capture.
pub struct CaptureHandle {
    running: Arc<AtomicBool>,
    recoveries: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Stops capture and waits for the device to be released. Idempotent.
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("audio capture thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of device errors recovered from so far.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::Relaxed)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::recorder::MockAudioSource;

    fn config(chunk_samples: usize) -> CaptureConfig {
        CaptureConfig {
            chunk_samples,
            recovery_pause: Duration::from_millis(5),
            poll_interval: Duration::from_millis(1),
            channel_capacity: 16,
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<AudioChunk>) -> AudioChunk {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a chunk")
            .expect("capture channel closed")
    }

    #[test]
    fn test_config_from_audio_section() {
        let audio = AudioConfig {
            chunk_samples: 512,
            capture_recovery_ms: 40,
            ..AudioConfig::default()
        };
        let config = CaptureConfig::from_config(&audio);
        assert_eq!(config.chunk_samples, 512);
        assert_eq!(config.recovery_pause, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_rechunks_into_fixed_size_with_sequence() {
        let source = MockAudioSource::new()
            .with_chunks([vec![1i16; 3], vec![2i16; 3], vec![3i16; 2]])
            .with_end();
        let (mut rx, mut handle) = AudioCaptureStream::new(source, config(4)).start().unwrap();

        let first = recv(&mut rx).await;
        let second = recv(&mut rx).await;
        handle.close();

        assert_eq!(first.sequence, 0);
        assert_eq!(first.samples(), &[1, 1, 1, 2]);
        assert_eq!(second.sequence, 1);
        assert_eq!(second.samples(), &[2, 2, 3, 3]);
    }

    #[tokio::test]
    async fn test_read_errors_are_recovered() {
        let source = MockAudioSource::new()
            .with_transient_failures(2)
            .with_chunks([vec![5i16; 4]])
            .with_end();
        let (mut rx, mut handle) = AudioCaptureStream::new(source, config(4)).start().unwrap();

        let chunk = recv(&mut rx).await;
        assert_eq!(chunk.samples(), &[5, 5, 5, 5]);
        assert_eq!(handle.recoveries(), 2);
        assert!(handle.is_running());
        handle.close();
    }

    #[tokio::test]
    async fn test_unrecoverable_read_error_ends_the_stream() {
        let source = MockAudioSource::new()
            .with_chunks([vec![7i16; 4]])
            .with_fatal_read_failure_after(1);
        let stops = source.stop_counter();
        let (mut rx, mut handle) = AudioCaptureStream::new(source, config(4)).start().unwrap();

        assert_eq!(recv(&mut rx).await.samples(), &[7, 7, 7, 7]);
        let end = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("capture should stop on its own");
        assert!(end.is_none());
        assert!(!handle.is_running());
        assert_eq!(handle.recoveries(), 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        handle.close();
    }

    #[tokio::test]
    async fn test_close_stops_the_device() {
        let source = MockAudioSource::new().with_samples(vec![0i16; 8]);
        let stops = source.stop_counter();
        let (mut rx, mut handle) = AudioCaptureStream::new(source, config(8)).start().unwrap();

        recv(&mut rx).await;
        handle.close();
        handle.close();

        assert!(!handle.is_running());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_capture() {
        let source = MockAudioSource::new().with_samples(vec![0i16; 8]);
        let stops = source.stop_counter();
        let (_rx, handle) = AudioCaptureStream::new(source, config(8)).start().unwrap();

        drop(handle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let source = MockAudioSource::new().with_start_failure();
        assert!(AudioCaptureStream::new(source, config(8)).start().is_err());
    }
}
