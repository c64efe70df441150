use crate::error::{Result, TalkbackError};
use crate::llm::memory::ChatMessage;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything the generation capability needs for one reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_prompt: String,
    /// Prior exchanges, oldest first.
    pub history: Vec<ChatMessage>,
    /// The new user utterance.
    pub input: String,
}

impl GenerationRequest {
    /// Full message list: system prompt, history, then the new input.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(ChatMessage::system(&self.system_prompt));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(&self.input));
        messages
    }
}

/// Trait for the text-generation capability.
///
/// Request/response, not streamed. Implementations must be cancel-safe:
/// an interrupted turn drops the future mid-request.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce the assistant's reply to `request`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Name of the backing model, for logs.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        (**self).generate(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Removes a leading `<think>…</think>` block that reasoning models put in
/// front of the answer, and trims whitespace.
pub fn strip_reasoning(reply: &str) -> &str {
    let trimmed = reply.trim();
    if trimmed.starts_with("<think>")
        && let Some(end) = trimmed.find("</think>")
    {
        return trimmed[end + "</think>".len()..].trim();
    }
    trimmed
}

#[cfg(feature = "http")]
pub use self::http::HttpGenerator;

#[cfg(feature = "http")]
mod http {
    use super::{GenerationRequest, Generator, strip_reasoning};
    use crate::config::LlmConfig;
    use crate::error::Result;
    use crate::http::{Service, ServiceClient};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct ChatCompletion {
        choices: Vec<Choice>,
    }

    #[derive(Debug, Deserialize)]
    struct Choice {
        message: ChoiceMessage,
    }

    #[derive(Debug, Deserialize)]
    struct ChoiceMessage {
        #[serde(default)]
        content: Option<String>,
    }

    /// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
    #[derive(Debug, Clone)]
    pub struct HttpGenerator {
        client: ServiceClient,
        model: String,
        temperature: f32,
    }

    impl HttpGenerator {
        pub fn new(config: &LlmConfig) -> Result<Self> {
            Ok(Self {
                client: ServiceClient::new(&config.endpoint(), Service::Generation)?,
                model: config.model.clone(),
                temperature: config.temperature,
            })
        }
    }

    #[async_trait]
    impl Generator for HttpGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            let body = json!({
                "model": self.model,
                "messages": request.messages(),
                "temperature": self.temperature,
            });

            let response = self
                .client
                .send(self.client.post("chat/completions").json(&body))
                .await?;

            let completion: ChatCompletion = response.json().await.map_err(|e| {
                Service::Generation.error(format!("Malformed completion response: {}", e))
            })?;

            let content = completion
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| Service::Generation.error("Completion contained no message"))?;

            let reply = strip_reasoning(&content);
            if reply.is_empty() {
                return Err(Service::Generation.error("Completion was empty"));
            }
            Ok(reply.to_string())
        }

        fn model_name(&self) -> &str {
            &self.model
        }
    }
}

/// Mock generator for testing.
///
/// Clones share counters, so a test can keep one clone for assertions
/// while the component under test owns another.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    response: String,
    delay: Duration,
    should_fail: bool,
    calls: Arc<AtomicUsize>,
    finished: Arc<AtomicUsize>,
    abandoned: Arc<AtomicUsize>,
    last_request: Arc<Mutex<Option<GenerationRequest>>>,
}

impl MockGenerator {
    /// Create a mock that answers immediately with `response`.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            delay: Duration::ZERO,
            should_fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
            abandoned: Arc::new(AtomicUsize::new(0)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Configure how long each request takes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Configure the mock to fail after its delay.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of requests started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of requests that ran to the end (success or failure).
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    /// Number of requests dropped mid-flight.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.calls() - self.finished() - self.abandoned()
    }

    /// The most recent request received.
    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request
            .lock()
            .ok()
            .and_then(|request| request.clone())
    }
}

/// Counts a request as abandoned unless it was disarmed on completion.
struct AbandonGuard {
    abandoned: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(request.clone());
        }

        let mut guard = AbandonGuard {
            abandoned: Arc::clone(&self.abandoned),
            armed: true,
        };
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        guard.armed = false;
        self.finished.fetch_add(1, Ordering::SeqCst);

        if self.should_fail {
            Err(TalkbackError::Generation {
                message: "mock generation failure".to_string(),
            })
        } else {
            Ok(self.response.clone())
        }
    }

    fn model_name(&self) -> &str {
        "mock-llm"
    }
}
