use crate::audio::wav::PcmAudio;
use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for the speech synthesis capability.
///
/// Produces the whole utterance as one buffer of 16-bit mono PCM.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<PcmAudio>;

    /// Voice name, for logs.
    fn voice(&self) -> &str;
}

#[async_trait]
impl<T: Synthesizer + ?Sized> Synthesizer for Arc<T> {
    async fn synthesize(&self, text: &str) -> Result<PcmAudio> {
        (**self).synthesize(text).await
    }

    fn voice(&self) -> &str {
        (**self).voice()
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpSynthesizer;

#[cfg(feature = "http")]
mod http {
    use super::Synthesizer;
    use crate::audio::wav::{PcmAudio, decode_pcm16le, decode_wav};
    use crate::config::{SpeechFormat, TtsConfig};
    use crate::error::Result;
    use crate::http::{Service, ServiceClient};
    use async_trait::async_trait;
    use serde_json::json;
    use tracing::debug;

    /// Synthesizer backed by an OpenAI-compatible `/audio/speech` endpoint.
    #[derive(Debug, Clone)]
    pub struct HttpSynthesizer {
        client: ServiceClient,
        model: String,
        voice: String,
        speed: f32,
        format: SpeechFormat,
        pcm_sample_rate: u32,
    }

    impl HttpSynthesizer {
        pub fn new(config: &TtsConfig) -> Result<Self> {
            Ok(Self {
                client: ServiceClient::new(&config.endpoint(), Service::Synthesis)?,
                model: config.model.clone(),
                voice: config.voice.clone(),
                speed: config.speed,
                format: config.response_format,
                pcm_sample_rate: config.sample_rate,
            })
        }
    }

    #[async_trait]
    impl Synthesizer for HttpSynthesizer {
        async fn synthesize(&self, text: &str) -> Result<PcmAudio> {
            let body = json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
                "speed": self.speed,
                "response_format": self.format.as_str(),
            });

            let response = self
                .client
                .send(self.client.post("audio/speech").json(&body))
                .await?;
            let bytes = response.bytes().await.map_err(|e| {
                Service::Synthesis.error(format!("Failed to read speech response: {}", e))
            })?;

            let audio = match self.format {
                SpeechFormat::Pcm => decode_pcm16le(&bytes, self.pcm_sample_rate),
                SpeechFormat::Wav => decode_wav(&bytes)?,
            };
            if audio.samples.is_empty() {
                return Err(Service::Synthesis.error("Speech response contained no audio"));
            }

            debug!(
                chars = text.chars().count(),
                duration_ms = audio.duration_ms(),
                sample_rate = audio.sample_rate,
                "speech synthesized"
            );
            Ok(audio)
        }

        fn voice(&self) -> &str {
            &self.voice
        }
    }
}

/// Mock synthesizer for testing.
///
/// Returns the same buffer for every text. Clones share counters.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    audio: PcmAudio,
    delay: Duration,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
    last_text: Arc<Mutex<Option<String>>>,
}

impl MockSynthesizer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            audio: PcmAudio {
                samples,
                sample_rate,
            },
            delay: Duration::ZERO,
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            last_text: Arc::new(Mutex::new(None)),
        }
    }

    /// A ramp of `duration_ms` of audio, so chunk order is visible in writes.
    pub fn with_duration_ms(duration_ms: u32, sample_rate: u32) -> Self {
        let count = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        let samples = (0..count).map(|i| (i % i16::MAX as usize) as i16).collect();
        Self::new(samples, sample_rate)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_text(&self) -> Option<String> {
        self.last_text.lock().ok().and_then(|text| text.clone())
    }

    /// The buffer every call returns.
    pub fn audio(&self) -> &PcmAudio {
        &self.audio
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<PcmAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_text.lock() {
            *last = Some(text.to_string());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.should_fail {
            return Err(TalkbackError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }
        Ok(self.audio.clone())
    }

    fn voice(&self) -> &str {
        "mock-voice"
    }
}
