use crate::defaults;
use crate::error::{Result, TalkbackError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub vad: VadConfig,
    pub stt: SttConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub playback: PlaybackConfig,
    pub conversation: ConversationConfig,
}

/// Audio device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub chunk_samples: usize,
    pub capture_recovery_ms: u64,
}

/// Voice activity detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VadConfig {
    pub speech_threshold: f32,
    pub silence_duration_ms: u32,
    pub min_speech_ms: u32,
    pub pre_speech_ms: u32,
    pub max_utterance_ms: u32,
}

/// Speech-to-text service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub language: String,
    pub max_consecutive_failures: u32,
    pub timeout_secs: u64,
}

/// Language model service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_history_turns: usize,
    pub timeout_secs: u64,
    pub interrupted_reply: String,
}

/// Speech synthesis service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TtsConfig {
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub voice: String,
    pub speed: f32,
    pub response_format: SpeechFormat,
    /// Sample rate of `pcm` responses; `wav` responses carry their own.
    pub sample_rate: u32,
    pub timeout_secs: u64,
}

/// Audio encoding requested from the synthesis service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeechFormat {
    /// Headerless 16-bit little-endian mono PCM.
    Pcm,
    Wav,
}

impl SpeechFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SpeechFormat::Pcm => "pcm",
            SpeechFormat::Wav => "wav",
        }
    }
}

/// Playback configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Duration of each device write. Bounds interruption latency.
    pub chunk_ms: u32,
}

/// Turn-taking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationConfig {
    /// Spoken at startup; empty disables the greeting.
    pub greeting: String,
    pub cancel_grace_ms: u64,
}

/// Connection settings shared by the three service clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            chunk_samples: defaults::CAPTURE_CHUNK_SAMPLES,
            capture_recovery_ms: defaults::CAPTURE_RECOVERY_MS,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::VAD_THRESHOLD,
            silence_duration_ms: defaults::SILENCE_DURATION_MS,
            min_speech_ms: defaults::MIN_SPEECH_MS,
            pre_speech_ms: defaults::PRE_SPEECH_MS,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            api_key_env: defaults::API_KEY_ENV.to_string(),
            model: defaults::STT_MODEL.to_string(),
            language: defaults::LANGUAGE.to_string(),
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_TRANSCRIPTION_FAILURES,
            timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            api_key_env: defaults::API_KEY_ENV.to_string(),
            model: defaults::LLM_MODEL.to_string(),
            system_prompt: defaults::SYSTEM_PROMPT.to_string(),
            temperature: defaults::LLM_TEMPERATURE,
            max_history_turns: defaults::MAX_HISTORY_TURNS,
            timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            interrupted_reply: defaults::INTERRUPTED_REPLY.to_string(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            api_key_env: defaults::API_KEY_ENV.to_string(),
            model: defaults::TTS_MODEL.to_string(),
            voice: defaults::TTS_VOICE.to_string(),
            speed: defaults::TTS_SPEED,
            response_format: SpeechFormat::Pcm,
            sample_rate: defaults::TTS_SAMPLE_RATE,
            timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            chunk_ms: defaults::PLAYBACK_CHUNK_MS,
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            greeting: defaults::GREETING.to_string(),
            cancel_grace_ms: defaults::CANCEL_GRACE_MS,
        }
    }
}

impl SttConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            base_url: self.base_url.clone(),
            api_key_env: self.api_key_env.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl LlmConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            base_url: self.base_url.clone(),
            api_key_env: self.api_key_env.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl TtsConfig {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            base_url: self.base_url.clone(),
            api_key_env: self.api_key_env.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(TalkbackError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TALKBACK_LLM_MODEL → llm.model
    /// - TALKBACK_LANGUAGE → stt.language
    /// - TALKBACK_INPUT_DEVICE → audio.input_device
    /// - TALKBACK_OUTPUT_DEVICE → audio.output_device
    /// - TALKBACK_API_BASE → base_url of stt, llm and tts
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(model) = non_empty_env("TALKBACK_LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(language) = non_empty_env("TALKBACK_LANGUAGE") {
            self.stt.language = language;
        }

        if let Some(device) = non_empty_env("TALKBACK_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }

        if let Some(device) = non_empty_env("TALKBACK_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }

        if let Some(base_url) = non_empty_env("TALKBACK_API_BASE") {
            self.stt.base_url = base_url.clone();
            self.llm.base_url = base_url.clone();
            self.tts.base_url = base_url;
        }

        self
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> TalkbackError {
            TalkbackError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.chunk_samples == 0 {
            return Err(invalid("audio.chunk_samples", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.vad.speech_threshold) {
            return Err(invalid("vad.speech_threshold", "must be between 0.0 and 1.0"));
        }
        if self.vad.silence_duration_ms == 0 {
            return Err(invalid("vad.silence_duration_ms", "must be positive"));
        }
        if self.vad.max_utterance_ms <= self.vad.min_speech_ms {
            return Err(invalid(
                "vad.max_utterance_ms",
                "must be greater than vad.min_speech_ms",
            ));
        }
        if self.stt.max_consecutive_failures == 0 {
            return Err(invalid("stt.max_consecutive_failures", "must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(invalid("llm.temperature", "must be between 0.0 and 2.0"));
        }
        if !(0.25..=4.0).contains(&self.tts.speed) {
            return Err(invalid("tts.speed", "must be between 0.25 and 4.0"));
        }
        if self.tts.sample_rate == 0 {
            return Err(invalid("tts.sample_rate", "must be positive"));
        }
        if self.playback.chunk_ms == 0 {
            return Err(invalid("playback.chunk_ms", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/talkback/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("talkback")
            .join("config.toml")
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_talkback_env() {
        remove_env("TALKBACK_LLM_MODEL");
        remove_env("TALKBACK_LANGUAGE");
        remove_env("TALKBACK_INPUT_DEVICE");
        remove_env("TALKBACK_OUTPUT_DEVICE");
        remove_env("TALKBACK_API_BASE");
    }

    fn write_config(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.chunk_samples, 1024);
        assert_eq!(config.audio.capture_recovery_ms, 100);

        assert_eq!(config.stt.language, "zh");
        assert_eq!(config.stt.max_consecutive_failures, 3);

        assert_eq!(config.llm.interrupted_reply, "我明白您想插話。請繼續說。");
        assert_eq!(config.llm.temperature, 0.5);

        assert_eq!(config.tts.response_format, SpeechFormat::Pcm);
        assert_eq!(config.tts.speed, 1.3);

        assert_eq!(config.playback.chunk_ms, 100);
        assert_eq!(config.conversation.greeting, "嗨您好");

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_config(
            r#"
            [audio]
            input_device = "hw:0,0"
            output_device = "pulse"
            sample_rate = 16000

            [vad]
            speech_threshold = 0.05
            silence_duration_ms = 600

            [stt]
            base_url = "http://localhost:8000/v1"
            language = "en"

            [llm]
            model = "llama3.1"
            system_prompt = "Answer in one sentence."

            [tts]
            voice = "nova"
            response_format = "wav"

            [playback]
            chunk_ms = 40

            [conversation]
            greeting = ""
            cancel_grace_ms = 500
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));
        assert_eq!(config.vad.speech_threshold, 0.05);
        assert_eq!(config.vad.silence_duration_ms, 600);
        assert_eq!(config.stt.base_url, "http://localhost:8000/v1");
        assert_eq!(config.stt.language, "en");
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.llm.system_prompt, "Answer in one sentence.");
        assert_eq!(config.tts.voice, "nova");
        assert_eq!(config.tts.response_format, SpeechFormat::Wav);
        assert_eq!(config.playback.chunk_ms, 40);
        assert!(config.conversation.greeting.is_empty());
        assert_eq!(config.conversation.cancel_grace_ms, 500);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_config(
            r#"
            [llm]
            model = "gpt-4o"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.base_url, defaults::API_BASE_URL);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.tts, TtsConfig::default());
    }

    #[test]
    fn test_unknown_response_format_is_rejected() {
        let temp_file = write_config(
            r#"
            [tts]
            response_format = "mp3"
        "#,
        );
        assert!(matches!(
            Config::load(temp_file.path()),
            Err(TalkbackError::Config(_))
        ));
    }

    #[test]
    fn test_endpoints_follow_sections() {
        let mut config = Config::default();
        config.llm.base_url = "http://localhost:11434/v1".to_string();
        config.llm.timeout_secs = 90;

        let endpoint = config.llm.endpoint();
        assert_eq!(endpoint.base_url, "http://localhost:11434/v1");
        assert_eq!(endpoint.api_key_env, "OPENAI_API_KEY");
        assert_eq!(endpoint.timeout_secs, 90);
        assert_eq!(config.stt.endpoint().base_url, defaults::API_BASE_URL);
    }

    #[test]
    fn test_env_override_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_LLM_MODEL", "gpt-4o");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.stt.language, "zh"); // Not overridden

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_INPUT_DEVICE", "hw:1,0");
        set_env("TALKBACK_OUTPUT_DEVICE", "hw:2,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("hw:2,0".to_string()));

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_api_base_applies_to_all_services() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_API_BASE", "http://localhost:8080/v1");
        set_env("TALKBACK_LANGUAGE", "en");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.stt.base_url, "http://localhost:8080/v1");
        assert_eq!(config.llm.base_url, "http://localhost:8080/v1");
        assert_eq!(config.tts.base_url, "http://localhost:8080/v1");
        assert_eq!(config.stt.language, "en");

        clear_talkback_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_talkback_env();

        set_env("TALKBACK_LLM_MODEL", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.llm.model, defaults::LLM_MODEL);

        clear_talkback_env();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.vad.speech_threshold = 1.5;
        match config.validate() {
            Err(TalkbackError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "vad.speech_threshold")
            }
            other => panic!("Expected ConfigInvalidValue, got {:?}", other),
        }

        let mut config = Config::default();
        config.audio.sample_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.playback.chunk_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stt.max_consecutive_failures = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_config(
            r#"
            [audio
            input_device = "broken
        "#,
        );

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(TalkbackError::Config(_))));
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("talkback"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_talkback_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_config("[audio\n");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_config_round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
