//! Provider selections for the speech pipeline.
//!
//! These types describe *which* STT, LLM, TTS and turn-detection services a
//! session uses and how they are tuned. The services themselves live in the
//! session runtime; the orchestrator only hands it these selections.

use std::time::Duration;

/// Accuracy/latency trade-off of the realtime transcription engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperatingPoint {
    Standard,
    #[default]
    Enhanced,
}

/// Speech-to-text selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SttOptions {
    pub language: String,
    pub operating_point: OperatingPoint,
    /// Emit partial (non-final) transcripts while the user is still talking.
    pub enable_partials: bool,
    pub max_delay: Duration,
    pub end_of_utterance_silence_trigger: Duration,
    pub enable_diarization: bool,
    /// Template for text from the speaker the agent is talking to.
    pub speaker_active_format: String,
    /// Template for text from any other speaker.
    pub speaker_passive_format: String,
}

impl Default for SttOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            operating_point: OperatingPoint::Enhanced,
            enable_partials: true,
            max_delay: Duration::from_millis(700),
            end_of_utterance_silence_trigger: Duration::from_millis(500),
            enable_diarization: true,
            speaker_active_format: "<speaker_{speaker_id}>{text}</speaker_{speaker_id}>"
                .to_string(),
            speaker_passive_format: "{text}".to_string(),
        }
    }
}

impl SttOptions {
    /// Renders a transcript segment with its speaker attribution.
    ///
    /// Both templates understand the `{speaker_id}` and `{text}` placeholders.
    pub fn format_speaker(&self, speaker_id: &str, text: &str, active: bool) -> String {
        let template = if active {
            &self.speaker_active_format
        } else {
            &self.speaker_passive_format
        };
        // Substitute the id first so a transcript containing "{speaker_id}"
        // is left untouched.
        template
            .replace("{speaker_id}", speaker_id)
            .replace("{text}", text)
    }
}

/// Language-model selection.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmOptions {
    pub model: String,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Text-to-speech selection.
#[derive(Debug, Clone, PartialEq)]
pub struct TtsOptions {
    pub voice: String,
    pub style: String,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            voice: "Matthew".to_string(),
            style: "Conversation".to_string(),
        }
    }
}

/// How the end of a user turn is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnDetection {
    /// Model that scores utterance completion over multilingual text.
    #[default]
    Multilingual,
    /// Silence from the voice-activity detector alone.
    Vad,
}

/// The full set of provider selections for one agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSelection {
    pub stt: SttOptions,
    pub llm: LlmOptions,
    pub tts: TtsOptions,
    pub turn_detection: TurnDetection,
}
