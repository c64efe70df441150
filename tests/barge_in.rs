//! End-to-end barge-in behaviour, driven entirely by mocks.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use talkback::audio::output::MockAudioSink;
use talkback::audio::recorder::AudioSource;
use talkback::config::{Config, ConversationConfig, LlmConfig, PlaybackConfig};
use talkback::conversation::{ConversationOptions, Services, run_conversation};
use talkback::llm::client::MockGenerator;
use talkback::llm::generator::TurnGenerator;
use talkback::sink::{CollectorSink, SinkRecord};
use talkback::stt::transcriber::MockTranscriber;
use talkback::tts::player::{PlaybackOutcome, SpeechPlayer};
use talkback::tts::synthesizer::MockSynthesizer;
use talkback::{Result, SpeechActivitySignal, TurnCoordinator, TurnState, TurnStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const FALLBACK: &str = "我明白您想插話。請繼續說。";

fn turn_generator(mock: &MockGenerator) -> TurnGenerator {
    TurnGenerator::new(
        Arc::new(mock.clone()),
        &LlmConfig::default(),
        &ConversationConfig::default(),
    )
    .with_cancel_grace(Duration::from_millis(50))
}

fn player(synthesizer: &MockSynthesizer, sink: &MockAudioSink) -> SpeechPlayer {
    SpeechPlayer::new(
        Arc::new(synthesizer.clone()),
        Arc::new(sink.clone()),
        &PlaybackConfig { chunk_ms: 100 },
    )
}

#[tokio::test]
async fn weather_question_completes_and_returns_to_idle() {
    let generator = MockGenerator::new("今天天氣晴朗");
    let synthesizer = MockSynthesizer::with_duration_ms(400, 24000);
    let sink = MockAudioSink::new();
    let collector = Arc::new(CollectorSink::new());
    let mut coordinator = TurnCoordinator::new(
        turn_generator(&generator),
        player(&synthesizer, &sink),
        SpeechActivitySignal::new(),
        collector.clone(),
    );

    let turn = coordinator.handle_transcript("今天天氣如何").await;

    assert_eq!(turn.status, TurnStatus::Completed);
    assert_eq!(turn.response, "今天天氣晴朗");
    assert_eq!(coordinator.state(), TurnState::Idle);
    assert_eq!(synthesizer.last_text().as_deref(), Some("今天天氣晴朗"));
    assert_eq!(sink.open_streams(), 0);
    assert_eq!(
        collector.records()[..2].to_vec(),
        vec![
            SinkRecord::User(1, "今天天氣如何".to_string()),
            SinkRecord::Assistant(1, "今天天氣晴朗".to_string()),
        ]
    );
}

#[tokio::test]
async fn speech_during_generation_returns_fallback_and_listens() {
    let generator = MockGenerator::new("很長的回答").with_delay(Duration::from_secs(5));
    let synthesizer = MockSynthesizer::with_duration_ms(400, 24000);
    let sink = MockAudioSink::new();
    let signal = SpeechActivitySignal::new();
    let mut coordinator = TurnCoordinator::new(
        turn_generator(&generator).with_interrupted_reply(FALLBACK),
        player(&synthesizer, &sink),
        signal.clone(),
        Arc::new(CollectorSink::new()),
    );

    let raiser = {
        let signal = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            signal.raise();
        })
    };
    let turn = coordinator.handle_transcript("你好").await;
    raiser.await.unwrap();

    assert_eq!(turn.status, TurnStatus::Interrupted);
    assert_eq!(turn.response, FALLBACK);
    assert_eq!(coordinator.state(), TurnState::Listening);
    assert!(signal.is_raised(), "the interrupting speech is still pending");
    assert_eq!(generator.in_flight(), 0, "no generation may outlive its turn");
    assert_eq!(synthesizer.calls(), 0);
    assert_eq!(sink.opens(), 0);
    assert!(coordinator.generator().memory().is_empty());
}

#[tokio::test]
async fn turns_never_overlap() {
    let generator = MockGenerator::new("好的").with_delay(Duration::from_millis(30));
    let synthesizer = MockSynthesizer::with_duration_ms(300, 24000);
    let sink = MockAudioSink::new().with_write_delay(Duration::from_millis(5));
    let collector = Arc::new(CollectorSink::new());
    let mut coordinator = TurnCoordinator::new(
        turn_generator(&generator),
        player(&synthesizer, &sink),
        SpeechActivitySignal::new(),
        collector.clone(),
    );

    let (tx, rx) = mpsc::channel(8);
    for text in ["一", "二", "三"] {
        tx.send(text.to_string()).await.unwrap();
    }
    drop(tx);

    let stats = coordinator.run(rx, CancellationToken::new()).await;

    assert_eq!(stats.completed, 3);
    assert_eq!(coordinator.state(), TurnState::ShuttingDown);
    // Each turn is reported finished before the next one's input arrives.
    let mut open: Option<u64> = None;
    for record in collector.records() {
        match record {
            SinkRecord::User(index, _) => {
                assert!(open.is_none(), "turn {} started while {:?} open", index, open);
                open = Some(index);
            }
            SinkRecord::Finished(turn) => {
                assert_eq!(open, Some(turn.index));
                open = None;
            }
            _ => {}
        }
    }
    assert!(open.is_none());
    assert_eq!(generator.calls(), 3);
    assert_eq!(sink.open_streams(), 0);
}

#[tokio::test]
async fn uninterrupted_playback_writes_every_chunk_in_order() {
    let synthesizer = MockSynthesizer::with_duration_ms(1050, 24000);
    let sink = MockAudioSink::new();
    let player = player(&synthesizer, &sink);

    let outcome = player.speak("嗨您好", &SpeechActivitySignal::new()).await;

    assert!(matches!(outcome, PlaybackOutcome::Completed { chunks: 11 }));
    let written: Vec<i16> = sink.writes().concat();
    assert_eq!(written, synthesizer.audio().samples);
    assert_eq!(sink.last_sample_rate(), Some(24000));
    assert_eq!(sink.drains(), 1);
    assert_eq!(sink.open_streams(), 0);
}

#[tokio::test]
async fn interrupt_after_any_chunk_stops_there_and_releases_stream() {
    for k in 1..=5 {
        let signal = SpeechActivitySignal::new();
        let synthesizer = MockSynthesizer::with_duration_ms(1000, 24000);
        let sink = MockAudioSink::new().with_raise_after(k, &signal);
        let player = player(&synthesizer, &sink);

        let outcome = player.speak("嗨您好", &signal).await;

        match outcome {
            PlaybackOutcome::Interrupted { chunks_written } => assert_eq!(chunks_written, k),
            other => panic!("expected interruption after {}, got {:?}", k, other),
        }
        assert!(sink.write_count() <= k);
        assert_eq!(sink.open_streams(), 0);
    }
}

#[test]
fn reset_after_raise_clears_the_signal() {
    let signal = SpeechActivitySignal::new();
    signal.reset();
    signal.raise();
    signal.raise();
    assert!(signal.is_raised());
    signal.reset();
    assert!(!signal.is_raised());
}

/// Microphone stand-in that plays a script in real time: 100 ms of audio
/// per read.
struct ScriptedMicrophone {
    script: Vec<(i16, usize)>,
    position: usize,
}

const READ_SAMPLES: usize = 1600;

impl ScriptedMicrophone {
    /// `(amplitude, milliseconds)` segments.
    fn new(segments: &[(i16, usize)]) -> Self {
        let script = segments
            .iter()
            .flat_map(|&(amplitude, ms)| std::iter::repeat_n((amplitude, READ_SAMPLES), ms / 100))
            .collect();
        Self {
            script,
            position: 0,
        }
    }
}

impl AudioSource for ScriptedMicrophone {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let Some(&(amplitude, len)) = self.script.get(self.position) else {
            return Ok(Vec::new());
        };
        self.position += 1;
        thread::sleep(Duration::from_millis(100));
        Ok((0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect())
    }
}

#[tokio::test]
async fn talking_over_a_reply_interrupts_it_and_starts_a_new_turn() {
    let loud = 8000;
    let microphone = ScriptedMicrophone::new(&[
        (loud, 1000),
        (0, 1000),
        // Starts while the first reply is being spoken.
        (loud, 1000),
        (0, 1500),
    ]);

    let transcriber = MockTranscriber::new("mock").with_responses(&["今天天氣如何", "等一下"]);
    let generator = MockGenerator::new("今天天氣晴朗");
    let synthesizer = MockSynthesizer::with_duration_ms(3000, 24000);
    let output = MockAudioSink::new().with_write_delay(Duration::from_millis(100));
    let collector = Arc::new(CollectorSink::new());

    let services = Services {
        transcriber: Arc::new(transcriber.clone()),
        generator: Arc::new(generator.clone()),
        synthesizer: Arc::new(synthesizer.clone()),
        output: Arc::new(output.clone()),
        sink: collector.clone(),
    };
    let config = Config::default();
    let shutdown = CancellationToken::new();

    let watcher = {
        let collector = collector.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            for _ in 0..300 {
                if collector.turns().len() >= 2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            shutdown.cancel();
        })
    };

    let stats = run_conversation(
        &config,
        microphone,
        services,
        &ConversationOptions::default(),
        shutdown,
    )
    .await
    .unwrap();
    watcher.await.unwrap();

    let turns = collector.turns();
    assert_eq!(turns.len(), 2, "records: {:?}", collector.records());
    assert_eq!(turns[0].input, "今天天氣如何");
    assert_eq!(turns[0].status, TurnStatus::Interrupted);
    assert_eq!(turns[1].input, "等一下");
    assert_eq!(turns[1].status, TurnStatus::Completed);
    assert_eq!(stats.interrupted, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(transcriber.calls(), 2);
    assert!(collector.records().contains(&SinkRecord::Interrupted(1)));
    // Each reply is 30 chunks; only the second one played in full.
    assert!(output.write_count() < 2 * 30);
    assert_eq!(output.open_streams(), 0);
}

#[tokio::test]
async fn shutdown_with_no_speech_ends_cleanly() {
    let microphone = ScriptedMicrophone::new(&[(0, 500)]);
    let transcriber = MockTranscriber::new("mock");
    let services = Services {
        transcriber: Arc::new(transcriber.clone()),
        generator: Arc::new(MockGenerator::new("unused")),
        synthesizer: Arc::new(MockSynthesizer::with_duration_ms(100, 24000)),
        output: Arc::new(MockAudioSink::new()),
        sink: Arc::new(CollectorSink::new()),
    };
    let shutdown = CancellationToken::new();
    let canceller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.cancel();
        })
    };

    let stats = run_conversation(
        &Config::default(),
        microphone,
        services,
        &ConversationOptions::default(),
        shutdown,
    )
    .await
    .unwrap();
    canceller.await.unwrap();

    assert_eq!(stats.total(), 0);
    assert_eq!(transcriber.calls(), 0);
}

#[tokio::test]
async fn unavailable_transcriber_ends_the_run_with_an_error() {
    let microphone = ScriptedMicrophone::new(&[(0, 300)]);
    let services = Services {
        transcriber: Arc::new(MockTranscriber::new("mock").with_unavailable()),
        generator: Arc::new(MockGenerator::new("unused")),
        synthesizer: Arc::new(MockSynthesizer::with_duration_ms(100, 24000)),
        output: Arc::new(MockAudioSink::new()),
        sink: Arc::new(CollectorSink::new()),
    };

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        run_conversation(
            &Config::default(),
            microphone,
            services,
            &ConversationOptions::default(),
            CancellationToken::new(),
        ),
    )
    .await
    .expect("run should end on its own");

    assert!(matches!(
        result,
        Err(talkback::TalkbackError::Transcription { .. })
    ));
}
