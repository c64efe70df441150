//! Transcription session: capture chunks in, ordered transcripts out.
//!
//! Segmentation runs on every chunk as it arrives, so speech onsets are seen
//! even while an earlier utterance is still being transcribed. Utterances are
//! transcribed one at a time, in order, by a worker polled alongside the
//! segmentation loop.

use crate::audio::stream::AudioChunk;
use crate::config::Config;
use crate::error::{Result, TalkbackError};
use crate::stt::segmenter::{SegmentEvent, SegmenterConfig, Utterance, UtteranceSegmenter};
use crate::stt::transcriber::Transcriber;
use crate::turn::TurnState;
use crate::turn::signal::SpeechActivitySignal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Something the session heard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    /// Empty for partial events.
    pub text: String,
    /// A partial event marks a speech onset; a final one carries the text.
    pub is_partial: bool,
    pub sequence: u64,
}

impl TranscriptEvent {
    fn partial(sequence: u64) -> Self {
        Self {
            text: String::new(),
            is_partial: true,
            sequence,
        }
    }

    fn final_text(text: String, sequence: u64) -> Self {
        Self {
            text,
            is_partial: false,
            sequence,
        }
    }
}

/// Callback invoked for every event. Errors are logged and ignored.
pub type TranscriptObserver = Arc<dyn Fn(&TranscriptEvent) -> Result<()> + Send + Sync>;

/// Raises the speech-activity signal for events heard while the assistant
/// is busy.
///
/// Speech heard while idle or listening is just the next turn's input.
#[derive(Debug, Clone)]
pub struct ActivityDetector {
    signal: SpeechActivitySignal,
    state: watch::Receiver<TurnState>,
}

impl ActivityDetector {
    pub fn new(signal: SpeechActivitySignal, state: watch::Receiver<TurnState>) -> Self {
        Self { signal, state }
    }

    /// Returns true if the event raised the signal.
    pub fn observe(&self, event: &TranscriptEvent) -> bool {
        let state = *self.state.borrow();
        if state.is_busy() {
            self.signal.raise();
            debug!(?state, partial = event.is_partial, "speech activity raised");
            true
        } else {
            false
        }
    }
}

/// Session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub segmenter: SegmenterConfig,
    pub sample_rate: u32,
    /// Consecutive failed requests before the session gives up.
    pub max_consecutive_failures: u32,
}

impl SessionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            segmenter: SegmenterConfig::from_config(&config.vad, config.audio.sample_rate),
            sample_rate: config.audio.sample_rate,
            max_consecutive_failures: config.stt.max_consecutive_failures.max(1),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Turns the capture stream into finalized transcripts.
pub struct TranscriptionSession {
    transcriber: Arc<dyn Transcriber>,
    config: SessionConfig,
    detector: ActivityDetector,
    observer: Option<TranscriptObserver>,
}

impl TranscriptionSession {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        config: SessionConfig,
        detector: ActivityDetector,
    ) -> Self {
        Self {
            transcriber,
            config,
            detector,
            observer: None,
        }
    }

    /// Registers a callback for every partial and final event.
    pub fn with_observer(mut self, observer: TranscriptObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs until the audio stream ends or the transcript receiver is
    /// dropped. Non-blank final transcripts are sent in the order their
    /// utterances were spoken.
    ///
    /// # Errors
    /// Returns `TalkbackError::Transcription` if the transcriber is not
    /// ready at start, or after `max_consecutive_failures` failed requests
    /// in a row. A single failed request only drops that utterance.
    pub async fn run(
        self,
        mut audio: mpsc::Receiver<AudioChunk>,
        transcripts: mpsc::Sender<String>,
    ) -> Result<()> {
        if !self.transcriber.is_ready() {
            return Err(TalkbackError::Transcription {
                message: format!(
                    "transcriber '{}' is not ready",
                    self.transcriber.model_name()
                ),
            });
        }
        info!(model = self.transcriber.model_name(), "transcription session started");

        let (utterance_tx, utterance_rx) = mpsc::unbounded_channel();
        let worker = TranscriptionWorker {
            transcriber: Arc::clone(&self.transcriber),
            detector: self.detector.clone(),
            observer: self.observer.clone(),
            sample_rate: self.config.sample_rate,
            max_consecutive_failures: self.config.max_consecutive_failures,
        }
        .run(utterance_rx, transcripts);
        tokio::pin!(worker);

        let mut segmenter = UtteranceSegmenter::new(self.config.segmenter);
        loop {
            tokio::select! {
                result = &mut worker => return result,
                chunk = audio.recv() => {
                    let Some(chunk) = chunk else { break };
                    for event in segmenter.push(&chunk) {
                        match event {
                            SegmentEvent::SpeechStarted { sequence } => {
                                self.emit(&TranscriptEvent::partial(sequence));
                            }
                            SegmentEvent::Utterance(utterance) => {
                                // The worker only stops on a fatal error, which the
                                // next poll of `worker` returns.
                                utterance_tx.send(utterance).ok();
                            }
                        }
                    }
                }
            }
        }

        debug!("audio stream ended");
        if let Some(utterance) = segmenter.flush() {
            utterance_tx.send(utterance).ok();
        }
        drop(utterance_tx);
        worker.await
    }

    fn emit(&self, event: &TranscriptEvent) {
        self.detector.observe(event);
        notify(self.observer.as_ref(), event);
    }
}

struct TranscriptionWorker {
    transcriber: Arc<dyn Transcriber>,
    detector: ActivityDetector,
    observer: Option<TranscriptObserver>,
    sample_rate: u32,
    max_consecutive_failures: u32,
}

impl TranscriptionWorker {
    async fn run(
        self,
        mut utterances: mpsc::UnboundedReceiver<Utterance>,
        transcripts: mpsc::Sender<String>,
    ) -> Result<()> {
        let mut failures = 0u32;

        while let Some(utterance) = utterances.recv().await {
            let started = Instant::now();
            let text = match self
                .transcriber
                .transcribe(&utterance.samples, self.sample_rate)
                .await
            {
                Ok(text) => {
                    failures = 0;
                    text
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        error = %e,
                        failures,
                        limit = self.max_consecutive_failures,
                        "transcription request failed"
                    );
                    if failures >= self.max_consecutive_failures {
                        return Err(TalkbackError::Transcription {
                            message: format!("{} consecutive failures, last: {}", failures, e),
                        });
                    }
                    continue;
                }
            };

            let text = clean_transcription(&text);
            debug!(
                duration_ms = utterance.duration_ms(self.sample_rate),
                elapsed_ms = started.elapsed().as_millis() as u64,
                blank = text.is_empty(),
                "utterance transcribed"
            );
            if text.is_empty() {
                continue;
            }

            let event = TranscriptEvent::final_text(text, utterance.first_sequence);
            self.detector.observe(&event);
            notify(self.observer.as_ref(), &event);
            if transcripts.send(event.text).await.is_err() {
                debug!("transcript receiver dropped, stopping session");
                return Ok(());
            }
        }

        Ok(())
    }
}

fn notify(observer: Option<&TranscriptObserver>, event: &TranscriptEvent) {
    if let Some(observer) = observer
        && let Err(e) = observer(event)
    {
        warn!(error = %e, "transcript observer failed");
    }
}

/// Strips non-speech annotations such as `[music]` or `(laughs)` and
/// collapses whitespace.
///
/// Unmatched opening brackets are kept.
pub fn clean_transcription(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(ch) = chars.next() {
        let close = match ch {
            '[' => ']',
            '(' => ')',
            '（' => '）',
            '【' => '】',
            _ => {
                result.push(ch);
                continue;
            }
        };
        let rest = chars.as_str();
        match rest.find(close) {
            Some(end) => {
                chars = rest[end + close.len_utf8()..].chars();
            }
            None => result.push(ch),
        }
    }

    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::VadConfig;
    use crate::stt::transcriber::MockTranscriber;
    use std::sync::Mutex;
    use std::time::Duration;

    const CHUNK: usize = 1600;

    fn config() -> SessionConfig {
        SessionConfig {
            segmenter: SegmenterConfig {
                vad: VadConfig {
                    speech_threshold: 0.02,
                    silence_duration_ms: 200,
                    min_speech_ms: 100,
                    sample_rate: 16000,
                },
                pre_speech_ms: 100,
                max_utterance_ms: 5000,
            },
            sample_rate: 16000,
            max_consecutive_failures: 2,
        }
    }

    /// Sends `utterances` spoken phrases separated by pauses, then closes.
    fn spoken_audio(utterances: usize) -> mpsc::Receiver<AudioChunk> {
        let (tx, rx) = mpsc::channel(1024);
        let mut seq = 0;
        for _ in 0..utterances {
            for amplitude in [3000, 3000, 3000, 0, 0, 0] {
                tx.try_send(AudioChunk::new(seq, vec![amplitude; CHUNK]))
                    .unwrap();
                seq += 1;
            }
        }
        rx
    }

    fn detector(state: TurnState) -> (ActivityDetector, SpeechActivitySignal, watch::Sender<TurnState>) {
        let signal = SpeechActivitySignal::new();
        let (tx, rx) = watch::channel(state);
        (ActivityDetector::new(signal.clone(), rx), signal, tx)
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(text) = rx.recv().await {
            out.push(text);
        }
        out
    }

    #[tokio::test]
    async fn test_transcripts_are_forwarded_in_order() {
        let transcriber = MockTranscriber::new("m").with_responses(&["今天天氣如何", "你好"]);
        let (detector, signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(Arc::new(transcriber.clone()), config(), detector);
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(2), tx).await.unwrap();

        assert_eq!(collect(rx).await, vec!["今天天氣如何", "你好"]);
        assert_eq!(transcriber.calls(), 2);
        assert!(!signal.is_raised(), "idle speech must not raise the signal");
    }

    #[tokio::test]
    async fn test_speech_while_speaking_raises_signal() {
        let (detector, signal, _state) = detector(TurnState::Speaking);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m").with_response("等一下")),
            config(),
            detector,
        );
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(1), tx).await.unwrap();

        assert!(signal.is_raised());
        assert_eq!(collect(rx).await, vec!["等一下"]);
    }

    #[tokio::test]
    async fn test_speech_while_generating_raises_signal() {
        let (detector, signal, _state) = detector(TurnState::Generating);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m").with_response("等一下")),
            config(),
            detector,
        );
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(1), tx).await.unwrap();

        assert!(signal.is_raised());
        assert_eq!(collect(rx).await, vec!["等一下"]);
    }

    #[tokio::test]
    async fn test_speech_while_listening_does_not_raise_signal() {
        let (detector, signal, _state) = detector(TurnState::Listening);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m").with_response("我想問")),
            config(),
            detector,
        );
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(1), tx).await.unwrap();

        assert!(!signal.is_raised());
        assert_eq!(collect(rx).await, vec!["我想問"]);
    }

    #[test]
    fn test_detector_quiet_after_interrupted_generation() {
        let (detector, signal, state) = detector(TurnState::Generating);

        assert!(detector.observe(&TranscriptEvent::partial(1)));
        assert!(signal.is_raised());

        // Interrupted generation: the coordinator listens, and the next
        // turn starts from a cleared signal.
        state.send_replace(TurnState::Listening);
        signal.reset();
        assert!(!detector.observe(&TranscriptEvent::partial(2)));
        assert!(!detector.observe(&TranscriptEvent::final_text("繼續說".to_string(), 3)));
        assert!(!signal.is_raised());

        for quiet in [TurnState::Idle, TurnState::ShuttingDown] {
            state.send_replace(quiet);
            assert!(!detector.observe(&TranscriptEvent::partial(4)));
        }
        assert!(!signal.is_raised());
    }

    #[tokio::test]
    async fn test_blank_transcripts_are_dropped() {
        let transcriber = MockTranscriber::new("m").with_responses(&["  ", "[music]", "好"]);
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(Arc::new(transcriber), config(), detector);
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(3), tx).await.unwrap();

        assert_eq!(collect(rx).await, vec!["好"]);
    }

    #[tokio::test]
    async fn test_isolated_failure_is_skipped() {
        let transcriber = MockTranscriber::new("m")
            .with_queued_failure()
            .with_responses(&["第二句"]);
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(Arc::new(transcriber), config(), detector);
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(2), tx).await.unwrap();

        assert_eq!(collect(rx).await, vec!["第二句"]);
    }

    #[tokio::test]
    async fn test_consecutive_failures_are_fatal() {
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m").with_failure()),
            config(),
            detector,
        );
        let (tx, _rx) = mpsc::channel(8);

        let result = session.run(spoken_audio(3), tx).await;

        assert!(matches!(result, Err(TalkbackError::Transcription { .. })));
    }

    #[tokio::test]
    async fn test_unready_transcriber_fails_at_start() {
        let transcriber = MockTranscriber::new("m").with_unavailable();
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(Arc::new(transcriber.clone()), config(), detector);
        let (tx, _rx) = mpsc::channel(8);

        let result = session.run(spoken_audio(1), tx).await;

        assert!(matches!(result, Err(TalkbackError::Transcription { .. })));
        assert_eq!(transcriber.calls(), 0);
    }

    #[tokio::test]
    async fn test_observer_failure_does_not_stop_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let observer: TranscriptObserver = Arc::new(move |event: &TranscriptEvent| {
            seen_clone.lock().unwrap().push(event.is_partial);
            Err(TalkbackError::Other("observer broke".to_string()))
        });
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m").with_response("還在")),
            config(),
            detector,
        )
        .with_observer(observer);
        let (tx, rx) = mpsc::channel(8);

        session.run(spoken_audio(2), tx).await.unwrap();

        assert_eq!(collect(rx).await, vec!["還在", "還在"]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|partial| **partial).count(), 2);
        assert_eq!(seen.iter().filter(|partial| !**partial).count(), 2);
    }

    #[tokio::test]
    async fn test_onset_is_seen_while_transcription_is_slow() {
        let transcriber = MockTranscriber::new("m")
            .with_response("慢")
            .with_delay(Duration::from_millis(200));
        let (detector, signal, state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(Arc::new(transcriber), config(), detector);
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (tx, _rx) = mpsc::channel(8);
        let handle = tokio::spawn(session.run(audio_rx, tx));

        for seq in 0..6 {
            let amplitude = if seq < 3 { 3000 } else { 0 };
            audio_tx.send(AudioChunk::new(seq, vec![amplitude; CHUNK])).await.unwrap();
        }
        // First utterance is now being transcribed; the assistant starts talking.
        tokio::time::sleep(Duration::from_millis(20)).await;
        state.send_replace(TurnState::Speaking);
        for seq in 6..9 {
            audio_tx.send(AudioChunk::new(seq, vec![3000; CHUNK])).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(signal.is_raised());
        drop(audio_tx);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_session_stops_when_receiver_dropped() {
        let (detector, _signal, _state) = detector(TurnState::Idle);
        let session = TranscriptionSession::new(
            Arc::new(MockTranscriber::new("m")),
            config(),
            detector,
        );
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let (audio_tx, audio_rx) = mpsc::channel(8);
        for seq in 0..6 {
            let amplitude = if seq < 3 { 3000 } else { 0 };
            audio_tx
                .try_send(AudioChunk::new(seq, vec![amplitude; CHUNK]))
                .unwrap();
        }

        // `audio_tx` stays alive, so the session has to stop on its own.
        let result = tokio::time::timeout(Duration::from_secs(1), session.run(audio_rx, tx)).await;
        assert!(matches!(result, Ok(Ok(()))));
        drop(audio_tx);
    }

    #[test]
    fn test_clean_transcription() {
        assert_eq!(clean_transcription("[music] 你好 (laughs) 世界"), "你好 世界");
        assert_eq!(clean_transcription("（笑）好的"), "好的");
        assert_eq!(clean_transcription("  今天   天氣 "), "今天 天氣");
        assert_eq!(clean_transcription("a [unclosed"), "a [unclosed");
        assert_eq!(clean_transcription("[BLANK_AUDIO]"), "");
    }
}
