use crate::error::{Result, TalkbackError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (HTTP service vs mock).
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance of 16-bit mono PCM.
    async fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String>;

    /// Get the name of the model
    fn model_name(&self) -> &str;

    /// Check if the transcriber can accept requests
    fn is_ready(&self) -> bool;
}

/// Implement Transcriber for Arc<T> to allow sharing across sessions.
#[async_trait]
impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    async fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
        (**self).transcribe(audio, sample_rate).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpTranscriber;

#[cfg(feature = "http")]
mod http {
    use super::Transcriber;
    use crate::audio::wav::encode_wav;
    use crate::config::SttConfig;
    use crate::error::Result;
    use crate::http::{Service, ServiceClient};
    use async_trait::async_trait;
    use serde::Deserialize;
    use tracing::debug;

    #[derive(Debug, Deserialize)]
    struct TranscriptionResponse {
        text: String,
    }

    /// Transcriber backed by an OpenAI-compatible `/audio/transcriptions`
    /// endpoint. Each utterance is uploaded as a WAV file.
    #[derive(Debug, Clone)]
    pub struct HttpTranscriber {
        client: ServiceClient,
        model: String,
        language: String,
    }

    impl HttpTranscriber {
        pub fn new(config: &SttConfig) -> Result<Self> {
            Ok(Self {
                client: ServiceClient::new(&config.endpoint(), Service::Transcription)?,
                model: config.model.clone(),
                language: config.language.clone(),
            })
        }
    }

    #[async_trait]
    impl Transcriber for HttpTranscriber {
        async fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
            let wav = encode_wav(audio, sample_rate)?;
            let file = reqwest::multipart::Part::bytes(wav)
                .file_name("utterance.wav")
                .mime_str("audio/wav")
                .map_err(|e| Service::Transcription.error(format!("Invalid upload: {}", e)))?;

            let mut form = reqwest::multipart::Form::new()
                .part("file", file)
                .text("model", self.model.clone())
                .text("response_format", "json");
            if !self.language.is_empty() {
                form = form.text("language", self.language.clone());
            }

            let response = self
                .client
                .send(self.client.post("audio/transcriptions").multipart(form))
                .await?;
            let body: TranscriptionResponse = response.json().await.map_err(|e| {
                Service::Transcription.error(format!("Malformed transcription response: {}", e))
            })?;

            debug!(
                samples = audio.len(),
                chars = body.text.chars().count(),
                "utterance transcribed"
            );
            Ok(body.text.trim().to_string())
        }

        fn model_name(&self) -> &str {
            &self.model
        }

        fn is_ready(&self) -> bool {
            true
        }
    }
}

/// Mock transcriber for testing
///
/// Queued responses are returned in order; after that the default
/// response repeats. Clones share the queue and counters.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    queued: Arc<Mutex<VecDeque<Result<String>>>>,
    should_fail: bool,
    ready: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            queued: Arc::new(Mutex::new(VecDeque::new())),
            should_fail: false,
            ready: true,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue responses returned before the default one
    pub fn with_responses(self, responses: &[&str]) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.extend(responses.iter().map(|r| Ok(r.to_string())));
        }
        self
    }

    /// Queue one failed request
    pub fn with_queued_failure(self) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(Err(TalkbackError::Transcription {
                message: "mock request failure".to_string(),
            }));
        }
        self
    }

    /// Configure the mock to fail on every transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Configure the mock to report itself as not ready
    pub fn with_unavailable(mut self) -> Self {
        self.ready = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &[i16], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.should_fail {
            return Err(TalkbackError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        match queued {
            Some(result) => result,
            None => Ok(self.response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transcriber_returns_response() {
        let transcriber = MockTranscriber::new("test-model").with_response("今天天氣如何");

        let result = transcriber.transcribe(&[0i16; 1000], 16000).await;

        assert_eq!(result.unwrap(), "今天天氣如何");
        assert_eq!(transcriber.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_transcriber_returns_error_when_configured() {
        let transcriber = MockTranscriber::new("test-model").with_failure();

        match transcriber.transcribe(&[0i16; 1000], 16000).await {
            Err(TalkbackError::Transcription { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            _ => panic!("Expected Transcription error"),
        }
    }

    #[tokio::test]
    async fn test_queued_responses_then_default() {
        let transcriber = MockTranscriber::new("m")
            .with_responses(&["你好"])
            .with_queued_failure()
            .with_response("default");

        assert_eq!(transcriber.transcribe(&[], 16000).await.unwrap(), "你好");
        assert!(transcriber.transcribe(&[], 16000).await.is_err());
        assert_eq!(transcriber.transcribe(&[], 16000).await.unwrap(), "default");
    }

    #[test]
    fn test_mock_transcriber_is_ready() {
        assert!(MockTranscriber::new("test-model").is_ready());
        assert!(!MockTranscriber::new("test-model").with_unavailable().is_ready());
    }

    #[tokio::test]
    async fn test_transcriber_trait_is_object_safe() {
        let transcriber: Box<dyn Transcriber> =
            Box::new(MockTranscriber::new("test-model").with_response("boxed test"));

        assert_eq!(transcriber.model_name(), "test-model");
        assert_eq!(
            transcriber.transcribe(&[0i16; 100], 16000).await.unwrap(),
            "boxed test"
        );
    }
}
