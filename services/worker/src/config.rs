use interviewer_core::orchestrator::{OrchestratorConfig, RetryPolicy};
use interviewer_core::providers::ProviderSelection;
use interviewer_core::runtime::{RoomInputOptions, SessionOptions};
use interviewer_core::vad::{DEFAULT_ENERGY_THRESHOLD, VadOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub llm_model: String,
    pub tts_voice: String,
    pub tts_style: String,
    pub stt_language: String,
    pub min_endpointing_delay: Duration,
    pub max_endpointing_delay: Duration,
    pub participant_timeout: Duration,
    pub connect_attempts: u32,
    pub audio_input_device: Option<usize>,
    pub vad_energy_threshold: f32,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let openai_base_url = var_or("OPENAI_BASE_URL", "https://api.openai.com/v1");
        let llm_model = var_or("LLM_MODEL", "gpt-4o-mini");
        let tts_voice = var_or("TTS_VOICE", "Matthew");
        let tts_style = var_or("TTS_STYLE", "Conversation");
        let stt_language = var_or("STT_LANGUAGE", "en");

        let min_endpointing_delay = seconds_var("MIN_ENDPOINTING_DELAY", 0.5)?;
        let max_endpointing_delay = seconds_var("MAX_ENDPOINTING_DELAY", 5.0)?;
        if max_endpointing_delay < min_endpointing_delay {
            return Err(ConfigError::InvalidValue(
                "MAX_ENDPOINTING_DELAY".to_string(),
                format!(
                    "{:?} is shorter than MIN_ENDPOINTING_DELAY ({:?})",
                    max_endpointing_delay, min_endpointing_delay
                ),
            ));
        }

        let participant_timeout =
            Duration::from_secs(parse_var("PARTICIPANT_TIMEOUT_SECS", 120u64)?);

        let connect_attempts = parse_var("CONNECT_ATTEMPTS", 3u32)?;
        if connect_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "CONNECT_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let audio_input_device = match std::env::var("AUDIO_INPUT_DEVICE") {
            Ok(raw) => Some(raw.trim().parse::<usize>().map_err(|e| {
                ConfigError::InvalidValue("AUDIO_INPUT_DEVICE".to_string(), e.to_string())
            })?),
            Err(_) => None,
        };

        let vad_energy_threshold = parse_var("VAD_ENERGY_THRESHOLD", DEFAULT_ENERGY_THRESHOLD)?;
        if !(0.0..=1.0).contains(&vad_energy_threshold) {
            return Err(ConfigError::InvalidValue(
                "VAD_ENERGY_THRESHOLD".to_string(),
                format!("{} is outside 0.0..=1.0", vad_energy_threshold),
            ));
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            openai_base_url,
            llm_model,
            tts_voice,
            tts_style,
            stt_language,
            min_endpointing_delay,
            max_endpointing_delay,
            participant_timeout,
            connect_attempts,
            audio_input_device,
            vad_energy_threshold,
            log_level,
        })
    }

    /// The API key, for runs that talk to a real model.
    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key.as_deref().ok_or_else(|| {
            ConfigError::MissingVar("OPENAI_API_KEY must be set unless --scripted".to_string())
        })
    }

    pub fn vad_options(&self) -> VadOptions {
        VadOptions {
            energy_threshold: self.vad_energy_threshold,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut providers = ProviderSelection::default();
        providers.llm.model = self.llm_model.clone();
        providers.tts.voice = self.tts_voice.clone();
        providers.tts.style = self.tts_style.clone();
        providers.stt.language = self.stt_language.clone();

        OrchestratorConfig {
            session: SessionOptions {
                min_endpointing_delay: self.min_endpointing_delay,
                max_endpointing_delay: self.max_endpointing_delay,
            },
            providers,
            room_input: RoomInputOptions {
                audio_input_device: self.audio_input_device,
                ..RoomInputOptions::default()
            },
            participant_timeout: self.participant_timeout,
            connect_retry: RetryPolicy {
                max_attempts: self.connect_attempts,
                ..RetryPolicy::default()
            },
            ..OrchestratorConfig::default()
        }
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn seconds_var(name: &str, default: f64) -> Result<Duration, ConfigError> {
    let seconds = parse_var(name, default)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "OPENAI_API_KEY",
        "OPENAI_BASE_URL",
        "LLM_MODEL",
        "TTS_VOICE",
        "TTS_STYLE",
        "STT_LANGUAGE",
        "MIN_ENDPOINTING_DELAY",
        "MAX_ENDPOINTING_DELAY",
        "PARTICIPANT_TIMEOUT_SECS",
        "CONNECT_ATTEMPTS",
        "AUDIO_INPUT_DEVICE",
        "VAD_ENERGY_THRESHOLD",
        "RUST_LOG",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    fn expect_invalid(var: &str) {
        match Config::from_env().unwrap_err() {
            ConfigError::InvalidValue(name, _) => assert_eq!(name, var),
            other => panic!("Expected InvalidValue for {var}, got {other:?}"),
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.openai_api_key, None);
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.tts_voice, "Matthew");
        assert_eq!(config.tts_style, "Conversation");
        assert_eq!(config.stt_language, "en");
        assert_eq!(config.min_endpointing_delay, Duration::from_millis(500));
        assert_eq!(config.max_endpointing_delay, Duration::from_secs(5));
        assert_eq!(config.participant_timeout, Duration::from_secs(120));
        assert_eq!(config.connect_attempts, 3);
        assert_eq!(config.audio_input_device, None);
        assert_eq!(config.vad_energy_threshold, DEFAULT_ENERGY_THRESHOLD);
        assert_eq!(config.log_level, Level::INFO);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.session, SessionOptions::default());
        assert_eq!(orchestrator.providers, ProviderSelection::default());
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "custom-openai-key");
            env::set_var("OPENAI_BASE_URL", "http://localhost:8080/v1");
            env::set_var("LLM_MODEL", "gpt-4o");
            env::set_var("TTS_VOICE", "Joanna");
            env::set_var("TTS_STYLE", "Newscaster");
            env::set_var("STT_LANGUAGE", "de");
            env::set_var("MIN_ENDPOINTING_DELAY", "0.2");
            env::set_var("MAX_ENDPOINTING_DELAY", "1.3");
            env::set_var("PARTICIPANT_TIMEOUT_SECS", "30");
            env::set_var("CONNECT_ATTEMPTS", "5");
            env::set_var("AUDIO_INPUT_DEVICE", "2");
            env::set_var("VAD_ENERGY_THRESHOLD", "0.05");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");
        assert_eq!(config.require_openai_key().unwrap(), "custom-openai-key");
        assert_eq!(config.log_level, Level::DEBUG);

        let orchestrator = config.orchestrator_config();
        assert_eq!(
            orchestrator.session.min_endpointing_delay,
            Duration::from_secs_f64(0.2)
        );
        assert_eq!(
            orchestrator.session.max_endpointing_delay,
            Duration::from_secs_f64(1.3)
        );
        assert_eq!(orchestrator.participant_timeout, Duration::from_secs(30));
        assert_eq!(orchestrator.connect_retry.max_attempts, 5);
        assert_eq!(orchestrator.room_input.audio_input_device, Some(2));
        assert_eq!(orchestrator.providers.llm.model, "gpt-4o");
        assert_eq!(orchestrator.providers.tts.voice, "Joanna");
        assert_eq!(orchestrator.providers.tts.style, "Newscaster");
        assert_eq!(orchestrator.providers.stt.language, "de");
        assert_eq!(config.vad_options().energy_threshold, 0.05);
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();
        unsafe {
            env::set_var("OPENAI_API_KEY", "  ");
        }

        let config = Config::from_env().expect("Config should load without a key");
        match config.require_openai_key().unwrap_err() {
            ConfigError::MissingVar(msg) => assert!(msg.contains("OPENAI_API_KEY")),
            other => panic!("Expected MissingVar for OPENAI_API_KEY, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_config_rejects_inverted_endpointing_delays() {
        clear_env_vars();
        unsafe {
            env::set_var("MIN_ENDPOINTING_DELAY", "2.0");
            env::set_var("MAX_ENDPOINTING_DELAY", "1.0");
        }
        expect_invalid("MAX_ENDPOINTING_DELAY");
    }

    #[test]
    #[serial]
    fn test_config_rejects_negative_delay() {
        clear_env_vars();
        unsafe {
            env::set_var("MIN_ENDPOINTING_DELAY", "-0.5");
        }
        expect_invalid("MIN_ENDPOINTING_DELAY");
    }

    #[test]
    #[serial]
    fn test_config_rejects_zero_connect_attempts() {
        clear_env_vars();
        unsafe {
            env::set_var("CONNECT_ATTEMPTS", "0");
        }
        expect_invalid("CONNECT_ATTEMPTS");
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers() {
        for (var, value) in [
            ("AUDIO_INPUT_DEVICE", "mic"),
            ("PARTICIPANT_TIMEOUT_SECS", "soon"),
            ("VAD_ENERGY_THRESHOLD", "2.5"),
        ] {
            clear_env_vars();
            unsafe {
                env::set_var(var, value);
            }
            expect_invalid(var);
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }
        expect_invalid("RUST_LOG");
    }
}
