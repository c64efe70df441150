//! Audio output: the sink the speech player writes chunks into.

use crate::error::{Result, TalkbackError};
use crate::turn::signal::SpeechActivitySignal;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// An open output stream. Owned by exactly one playback at a time.
#[async_trait]
pub trait OutputStream: Send {
    /// Queue `samples` for playback. May wait for the device to make room,
    /// so successive writes are paced at roughly real time.
    async fn write(&mut self, samples: &[i16]) -> Result<()>;

    /// Wait until everything written has been played.
    async fn drain(&mut self) -> Result<()>;

    /// Stop playback immediately, discarding queued audio, and release the
    /// device. Idempotent.
    fn close(&mut self);
}

/// Factory for output streams.
pub trait AudioSink: Send + Sync {
    /// Opens a mono 16-bit stream at `sample_rate`.
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>>;
}

impl<T: AudioSink + ?Sized> AudioSink for Arc<T> {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        (**self).open(sample_rate)
    }
}

#[cfg(feature = "cpal-audio")]
pub use self::cpal_sink::CpalAudioSink;

#[cfg(feature = "cpal-audio")]
mod cpal_sink {
    use super::{AudioSink, OutputStream};
    use crate::audio::capture::{DeviceKind, SendableStream, find_device, with_suppressed_stderr};
    use crate::audio::wav::{f32_to_i16, i16_to_f32, resample};
    use crate::error::{Result, TalkbackError};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, StreamTrait};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tracing::{debug, info, warn};

    /// How long a write may wait for the device before playback counts as
    /// stalled.
    const STALL_TIMEOUT: Duration = Duration::from_secs(2);

    /// Queue shared with the CPAL output callback.
    #[derive(Default)]
    struct PlaybackQueue {
        samples: Mutex<VecDeque<f32>>,
        consumed: Notify,
    }

    impl PlaybackQueue {
        fn len(&self) -> usize {
            self.samples.lock().map(|q| q.len()).unwrap_or(0)
        }

        fn fill(&self, out: &mut [f32], channels: usize) {
            let mut queue = match self.samples.lock() {
                Ok(queue) => queue,
                Err(_) => {
                    out.fill(0.0);
                    return;
                }
            };
            for frame in out.chunks_mut(channels.max(1)) {
                let sample = queue.pop_front().unwrap_or(0.0);
                frame.fill(sample);
            }
            drop(queue);
            self.consumed.notify_one();
        }
    }

    /// Speaker output through CPAL.
    pub struct CpalAudioSink {
        device_name: Option<String>,
    }

    impl CpalAudioSink {
        /// Resolves the device lazily on each `open`, so a missing device is
        /// reported per playback.
        pub fn new(device_name: Option<&str>) -> Self {
            Self {
                device_name: device_name.map(str::to_string),
            }
        }
    }

    impl AudioSink for CpalAudioSink {
        fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
            let device = find_device(DeviceKind::Output, self.device_name.as_deref())?;
            let queue = Arc::new(PlaybackQueue::default());

            let preferred = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let (stream, device_rate) =
                match build(&device, &preferred, cpal::SampleFormat::F32, &queue) {
                    Ok(stream) => (stream, sample_rate),
                    Err(_) => {
                        let native = device
                            .default_output_config()
                            .map_err(|e| playback_error("Failed to query output config", e))?;
                        let format = native.sample_format();
                        let config: cpal::StreamConfig = native.into();
                        info!(
                            channels = config.channels,
                            sample_rate = config.sample_rate.0,
                            format = ?format,
                            "using native output format, converting in software"
                        );
                        (build(&device, &config, format, &queue)?, config.sample_rate.0)
                    }
                };

            stream
                .play()
                .map_err(|e| playback_error("Failed to start output stream", e))?;
            debug!(sample_rate, device_rate, "output stream opened");

            Ok(Box::new(CpalOutputStream {
                stream: Some(SendableStream(stream)),
                queue,
                source_rate: sample_rate,
                device_rate,
            }))
        }
    }

    fn build(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        format: cpal::SampleFormat,
        queue: &Arc<PlaybackQueue>,
    ) -> Result<cpal::Stream> {
        let channels = config.channels as usize;
        let queue = Arc::clone(queue);
        with_suppressed_stderr(|| match format {
            cpal::SampleFormat::I16 => device.build_output_stream(
                config,
                move |out: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut buffer = vec![0.0f32; out.len()];
                    queue.fill(&mut buffer, channels);
                    for (dst, src) in out.iter_mut().zip(buffer) {
                        *dst = f32_to_i16(src);
                    }
                },
                |err| warn!(error = %err, "output stream error"),
                None,
            ),
            _ => device.build_output_stream(
                config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| queue.fill(out, channels),
                |err| warn!(error = %err, "output stream error"),
                None,
            ),
        })
        .map_err(|e| playback_error("Failed to build output stream", e))
    }

    fn playback_error(context: &str, e: impl std::fmt::Display) -> TalkbackError {
        TalkbackError::Playback {
            message: format!("{}: {}", context, e),
        }
    }

    struct CpalOutputStream {
        stream: Option<SendableStream>,
        queue: Arc<PlaybackQueue>,
        source_rate: u32,
        device_rate: u32,
    }

    /// Waits until at most `limit` samples are queued.
    async fn wait_until_queued(queue: &PlaybackQueue, limit: usize) -> Result<()> {
        while queue.len() > limit {
            if tokio::time::timeout(STALL_TIMEOUT, queue.consumed.notified())
                .await
                .is_err()
            {
                return Err(TalkbackError::Playback {
                    message: "output device stopped consuming audio".to_string(),
                });
            }
        }
        Ok(())
    }

    #[async_trait]
    impl OutputStream for CpalOutputStream {
        async fn write(&mut self, samples: &[i16]) -> Result<()> {
            if self.stream.is_none() {
                return Err(TalkbackError::Playback {
                    message: "output stream is closed".to_string(),
                });
            }
            let converted = resample(samples, self.source_rate, self.device_rate);
            let chunk_len = converted.len();
            if let Ok(mut queue) = self.queue.samples.lock() {
                queue.extend(converted.into_iter().map(i16_to_f32));
            }
            // Keep at most one chunk queued ahead of the device.
            wait_until_queued(&self.queue, chunk_len).await
        }

        async fn drain(&mut self) -> Result<()> {
            wait_until_queued(&self.queue, 0).await
        }

        fn close(&mut self) {
            if let Ok(mut queue) = self.queue.samples.lock() {
                queue.clear();
            }
            if let Some(stream) = self.stream.take()
                && let Err(e) = stream.0.pause()
            {
                debug!(error = %e, "failed to pause output stream");
            }
        }
    }

    impl Drop for CpalOutputStream {
        fn drop(&mut self) {
            self.close();
        }
    }
}

/// Mock audio sink for testing.
///
/// Records every write and counts opens and closes. Clones share all
/// records.
#[derive(Clone, Default)]
pub struct MockAudioSink {
    writes: Arc<Mutex<Vec<Vec<i16>>>>,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    drains: Arc<AtomicUsize>,
    raise_after: Option<(usize, SpeechActivitySignal)>,
    fail_write_at: Option<usize>,
    fail_open: bool,
    write_delay: Duration,
    last_sample_rate: Arc<Mutex<Option<u32>>>,
}

impl MockAudioSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise `signal` right after the `writes`-th write completes.
    pub fn with_raise_after(mut self, writes: usize, signal: &SpeechActivitySignal) -> Self {
        self.raise_after = Some((writes, signal.clone()));
        self
    }

    /// Fail the write with this 1-based index.
    pub fn with_write_failure_at(mut self, write: usize) -> Self {
        self.fail_write_at = Some(write);
        self
    }

    pub fn with_open_failure(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Simulate device pacing.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// All writes so far, in order, across every stream.
    pub fn writes(&self) -> Vec<Vec<i16>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn drains(&self) -> usize {
        self.drains.load(Ordering::SeqCst)
    }

    /// Streams opened but not yet closed.
    pub fn open_streams(&self) -> usize {
        self.opens() - self.closes()
    }

    pub fn last_sample_rate(&self) -> Option<u32> {
        self.last_sample_rate.lock().ok().and_then(|rate| *rate)
    }
}

impl AudioSink for MockAudioSink {
    fn open(&self, sample_rate: u32) -> Result<Box<dyn OutputStream>> {
        if self.fail_open {
            return Err(TalkbackError::Playback {
                message: "mock output device unavailable".to_string(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut rate) = self.last_sample_rate.lock() {
            *rate = Some(sample_rate);
        }
        Ok(Box::new(MockOutputStream {
            sink: self.clone(),
            written: 0,
            closed: false,
        }))
    }
}

struct MockOutputStream {
    sink: MockAudioSink,
    written: usize,
    closed: bool,
}

#[async_trait]
impl OutputStream for MockOutputStream {
    async fn write(&mut self, samples: &[i16]) -> Result<()> {
        if self.closed {
            return Err(TalkbackError::Playback {
                message: "write after close".to_string(),
            });
        }
        if !self.sink.write_delay.is_zero() {
            tokio::time::sleep(self.sink.write_delay).await;
        }
        if self.sink.fail_write_at == Some(self.written + 1) {
            return Err(TalkbackError::Playback {
                message: "mock device write failed".to_string(),
            });
        }
        if let Ok(mut writes) = self.sink.writes.lock() {
            writes.push(samples.to_vec());
        }
        self.written += 1;
        if let Some((after, signal)) = &self.sink.raise_after
            && *after == self.written
        {
            signal.raise();
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        self.sink.drains.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.sink.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockOutputStream {
    fn drop(&mut self) {
        self.close();
    }
}
