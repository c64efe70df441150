//! Default configuration constants for talkback.
//!
//! Shared by the config structs and by components constructed without a
//! config file (tests, the `say` and `chat` subcommands).

/// Capture sample rate in Hz.
///
/// 16kHz mono 16-bit PCM is what the transcription path expects.
pub const SAMPLE_RATE: u32 = 16000;

/// Samples per captured audio chunk (64ms at 16kHz).
pub const CAPTURE_CHUNK_SAMPLES: usize = 1024;

/// Pause before retrying after an input device read error.
///
/// Gives an overflowed device buffer time to recover.
pub const CAPTURE_RECOVERY_MS: u64 = 100;

/// RMS threshold (0.0 to 1.0) above which a chunk counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Silence after speech before an utterance is considered finished.
pub const SILENCE_DURATION_MS: u32 = 800;

/// Speech must last this long before it counts as an onset.
///
/// Debounces coughs, clicks and speaker bleed from raising the
/// speech-activity signal.
pub const MIN_SPEECH_MS: u32 = 200;

/// Audio kept from before the onset and prepended to the utterance.
pub const PRE_SPEECH_MS: u32 = 300;

/// Utterances longer than this are cut and transcribed immediately.
pub const MAX_UTTERANCE_MS: u32 = 15_000;

/// Consecutive transcription request failures tolerated before the
/// session gives up.
pub const MAX_CONSECUTIVE_TRANSCRIPTION_FAILURES: u32 = 3;

/// Playback chunk duration.
///
/// Upper bound on how long a detected interruption can go unnoticed
/// during playback. Smaller chunks react faster but cost more device
/// writes per second of audio.
pub const PLAYBACK_CHUNK_MS: u32 = 100;

/// How long an interrupted generation may take to wind down before it is
/// detached.
pub const CANCEL_GRACE_MS: u64 = 250;

/// OpenAI-compatible API root used by all three services by default.
pub const API_BASE_URL: &str = "https://api.openai.com/v1";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Transcription model.
pub const STT_MODEL: &str = "whisper-1";

/// Transcription language (ISO-639-1).
pub const LANGUAGE: &str = "zh";

/// Chat model.
pub const LLM_MODEL: &str = "gpt-4o-mini";

/// Sampling temperature for replies.
pub const LLM_TEMPERATURE: f32 = 0.5;

/// Completed exchanges kept as context for the next request.
pub const MAX_HISTORY_TURNS: usize = 20;

/// System prompt for the assistant.
pub const SYSTEM_PROMPT: &str = "你是一個友善的助手，請用簡潔明瞭的方式回答問題。";

/// Reply returned in place of a generation abandoned because the user
/// started talking.
pub const INTERRUPTED_REPLY: &str = "我明白您想插話。請繼續說。";

/// Spoken once at startup.
pub const GREETING: &str = "嗨您好";

/// Speech synthesis model and voice.
pub const TTS_MODEL: &str = "tts-1";
pub const TTS_VOICE: &str = "alloy";

/// Speaking rate multiplier (1.0 = normal).
pub const TTS_SPEED: f32 = 1.3;

/// Sample rate of raw `pcm` synthesis responses.
pub const TTS_SAMPLE_RATE: u32 = 24000;

/// Request timeout for service calls.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
