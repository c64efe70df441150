//! Real audio capture using CPAL (Cross-Platform Audio Library).

use crate::audio::recorder::AudioSource;
use crate::audio::wav::{downmix, f32_to_i16, resample};
use crate::error::{Result, TalkbackError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never a microphone or a speaker.
const FILTERED_PATTERNS: &[&str] = &["surround", "front:", "rear:", "center:", "side:", "S/PDIF"];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Direction of an audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// List audio devices of one kind, preferred ones marked "\[recommended\]".
///
/// # Errors
/// Returns `TalkbackError::AudioCapture` if device enumeration fails.
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match kind {
            DeviceKind::Input => host.input_devices().map(|d| d.collect::<Vec<_>>()),
            DeviceKind::Output => host.output_devices().map(|d| d.collect::<Vec<_>>()),
        }
    })
    .map_err(|e| TalkbackError::AudioCapture {
        message: format!("Failed to enumerate {:?} devices: {}", kind, e),
    })?;

    Ok(devices
        .iter()
        .filter_map(|device| device.name().ok())
        .filter(|name| !should_filter_device(name))
        .map(|name| {
            if is_preferred_device(&name) {
                format!("{} [recommended]", name)
            } else {
                name
            }
        })
        .collect())
}

/// Finds a device by exact name, or the best default when `name` is None.
///
/// The default prefers PipeWire, then PulseAudio, then the system default.
///
/// # Errors
/// Returns `TalkbackError::AudioDeviceNotFound` if no matching device exists.
pub(crate) fn find_device(kind: DeviceKind, name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices: Vec<cpal::Device> = match kind {
            DeviceKind::Input => host.input_devices().map(|d| d.collect()),
            DeviceKind::Output => host.output_devices().map(|d| d.collect()),
        }
        .unwrap_or_default();

        if let Some(wanted) = name {
            return devices
                .into_iter()
                .find(|device| device.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
                    device: wanted.to_string(),
                });
        }

        if let Some(device) = devices
            .into_iter()
            .find(|device| device.name().is_ok_and(|n| is_preferred_device(&n)))
        {
            return Ok(device);
        }

        match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        }
        .ok_or_else(|| TalkbackError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: The stream is only touched through the owning Mutex, one thread
/// at a time, and never from inside its own callbacks.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Samples and stream errors shared with the CPAL callback.
#[derive(Default)]
struct CaptureShared {
    buffer: Mutex<Vec<i16>>,
    last_error: Mutex<Option<String>>,
    callbacks: AtomicU64,
}

impl CaptureShared {
    fn push(&self, samples: &[i16]) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut buf) = self.buffer.lock() {
            buf.extend_from_slice(samples);
        }
    }

    fn record_error(&self, message: String) {
        if let Ok(mut slot) = self.last_error.lock() {
            *slot = Some(message);
        }
    }
}

/// Real microphone capture: 16-bit mono at the configured rate.
///
/// Tries the preferred format first (i16 mono at the target rate), then f32,
/// then falls back to the device's native config with software conversion.
/// Stream errors reported by CPAL (overflows, xruns) surface as a
/// recoverable `AudioCapture` error from the next `read_samples` call.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Mutex<Option<SendableStream>>,
    shared: Arc<CaptureShared>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// # Errors
    /// Returns `TalkbackError::AudioDeviceNotFound` if the named device (or
    /// any default input) does not exist.
    pub fn new(device_name: Option<&str>, sample_rate: u32) -> Result<Self> {
        let device = find_device(DeviceKind::Input, device_name)?;
        if let Ok(name) = device.name() {
            info!(device = %name, sample_rate, "using input device");
        }
        Ok(Self {
            device,
            stream: Mutex::new(None),
            shared: Arc::new(CaptureShared::default()),
            sample_rate,
        })
    }

    fn error_callback(&self) -> impl FnMut(cpal::StreamError) + Send + 'static {
        let shared = Arc::clone(&self.shared);
        move |err| shared.record_error(err.to_string())
    }

    /// Build the audio stream with the configured format.
    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let shared = Arc::clone(&self.shared);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| shared.push(data),
            self.error_callback(),
            None,
        ) {
            return Ok(stream);
        }

        let shared = Arc::clone(&self.shared);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let converted: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                shared.push(&converted);
            },
            self.error_callback(),
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Build a stream using the device's default config, with software
    /// downmixing and resampling to the target rate.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        info!(
            channels = native_channels,
            sample_rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let convert = move |samples: &[i16]| {
            resample(&downmix(samples, native_channels), native_rate, target_rate)
        };
        let shared = Arc::clone(&self.shared);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        shared.push(&convert(data));
                    },
                    self.error_callback(),
                    None,
                )
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let i16_data: Vec<i16> = data.iter().map(|&s| f32_to_i16(s)).collect();
                        shared.push(&convert(&i16_data));
                    },
                    self.error_callback(),
                    None,
                )
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(TalkbackError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --input-device.",
                    fmt
                ),
            }),
        }
    }

    fn lock_stream(&self) -> Result<std::sync::MutexGuard<'_, Option<SendableStream>>> {
        self.stream.lock().map_err(|e| TalkbackError::AudioCapture {
            message: format!("Failed to lock stream: {}", e),
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.lock_stream()?.is_some() {
            return Ok(());
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| TalkbackError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never
        // fire the data callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.shared.callbacks.load(Ordering::Relaxed) == 0 {
            debug!("preferred input format delivered no data, retrying native");
            drop(stream);
            if let Ok(mut buf) = self.shared.buffer.lock() {
                buf.clear();
            }
            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| TalkbackError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
            native_stream
        } else {
            stream
        };

        *self.lock_stream()? = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(sendable_stream) = self.lock_stream()?.take()
            && let Err(e) = sendable_stream.0.pause()
        {
            warn!(error = %e, "failed to pause input stream");
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if let Ok(mut slot) = self.shared.last_error.lock()
            && let Some(message) = slot.take()
        {
            return Err(TalkbackError::AudioCapture { message });
        }

        let mut buffer = self
            .shared
            .buffer
            .lock()
            .map_err(|e| TalkbackError::Other(format!("Audio buffer unusable: {}", e)))?;
        Ok(std::mem::take(&mut *buffer))
    }
}
