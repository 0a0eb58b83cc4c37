//! Pipeline metrics and usage accounting.
//!
//! The session runtime reports one [`AgentMetrics`] record per pipeline step.
//! Durations arrive in seconds, the way media runtimes report them, and are
//! converted to [`Duration`] on collection so totals are exact integers and
//! do not depend on the order events are delivered in.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MetricsError {
    #[error("invalid duration for `{field}`: {value}")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("usage total `{field}` would overflow")]
    Overflow { field: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmMetrics {
    pub request_id: String,
    pub duration: f64,
    pub ttft: f64,
    pub prompt_tokens: u64,
    pub prompt_cached_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SttMetrics {
    pub request_id: String,
    pub duration: f64,
    pub audio_duration: f64,
    pub streamed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TtsMetrics {
    pub request_id: String,
    pub ttfb: f64,
    pub duration: f64,
    pub audio_duration: f64,
    pub characters_count: u64,
    pub streamed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VadMetrics {
    pub idle_time: f64,
    pub inference_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EouMetrics {
    pub end_of_utterance_delay: f64,
    pub transcription_delay: f64,
}

/// One metrics record reported by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMetrics {
    Llm(LlmMetrics),
    Stt(SttMetrics),
    Tts(TtsMetrics),
    Vad(VadMetrics),
    Eou(EouMetrics),
}

/// Aggregated usage for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub llm_prompt_tokens: u64,
    pub llm_prompt_cached_tokens: u64,
    pub llm_completion_tokens: u64,
    pub tts_characters_count: u64,
    pub tts_audio_duration: Duration,
    pub stt_audio_duration: Duration,
}

/// Accumulates usage totals from metrics records.
#[derive(Debug, Default)]
pub struct UsageCollector {
    summary: UsageSummary,
    collected: u64,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the usage carried by `metrics`.
    ///
    /// A record with an invalid duration is rejected as a whole and leaves the
    /// totals untouched.
    pub fn collect(&mut self, metrics: &AgentMetrics) -> Result<(), MetricsError> {
        let mut next = self.summary;
        match metrics {
            AgentMetrics::Llm(m) => {
                next.llm_prompt_tokens =
                    add_count("llm_prompt_tokens", next.llm_prompt_tokens, m.prompt_tokens)?;
                next.llm_prompt_cached_tokens = add_count(
                    "llm_prompt_cached_tokens",
                    next.llm_prompt_cached_tokens,
                    m.prompt_cached_tokens,
                )?;
                next.llm_completion_tokens = add_count(
                    "llm_completion_tokens",
                    next.llm_completion_tokens,
                    m.completion_tokens,
                )?;
            }
            AgentMetrics::Stt(m) => {
                let audio = to_duration("stt.audio_duration", m.audio_duration)?;
                next.stt_audio_duration =
                    add_duration("stt_audio_duration", next.stt_audio_duration, audio)?;
            }
            AgentMetrics::Tts(m) => {
                let audio = to_duration("tts.audio_duration", m.audio_duration)?;
                next.tts_characters_count = add_count(
                    "tts_characters_count",
                    next.tts_characters_count,
                    m.characters_count,
                )?;
                next.tts_audio_duration =
                    add_duration("tts_audio_duration", next.tts_audio_duration, audio)?;
            }
            AgentMetrics::Vad(_) | AgentMetrics::Eou(_) => {}
        }
        self.summary = next;
        self.collected += 1;
        Ok(())
    }

    pub fn summary(&self) -> UsageSummary {
        self.summary
    }

    /// Number of records accepted so far.
    pub fn collected(&self) -> u64 {
        self.collected
    }
}

fn add_count(field: &'static str, total: u64, value: u64) -> Result<u64, MetricsError> {
    total
        .checked_add(value)
        .ok_or(MetricsError::Overflow { field })
}

fn add_duration(
    field: &'static str,
    total: Duration,
    value: Duration,
) -> Result<Duration, MetricsError> {
    total
        .checked_add(value)
        .ok_or(MetricsError::Overflow { field })
}

fn to_duration(field: &'static str, seconds: f64) -> Result<Duration, MetricsError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| MetricsError::InvalidDuration {
        field,
        value: seconds,
    })
}

/// Writes one structured log line for a metrics record.
pub fn log_metrics(metrics: &AgentMetrics) {
    match metrics {
        AgentMetrics::Llm(m) => info!(
            request_id = %m.request_id,
            duration = m.duration,
            ttft = m.ttft,
            prompt_tokens = m.prompt_tokens,
            prompt_cached_tokens = m.prompt_cached_tokens,
            completion_tokens = m.completion_tokens,
            "LLM metrics"
        ),
        AgentMetrics::Stt(m) => info!(
            request_id = %m.request_id,
            duration = m.duration,
            audio_duration = m.audio_duration,
            streamed = m.streamed,
            "STT metrics"
        ),
        AgentMetrics::Tts(m) => info!(
            request_id = %m.request_id,
            ttfb = m.ttfb,
            duration = m.duration,
            audio_duration = m.audio_duration,
            characters_count = m.characters_count,
            "TTS metrics"
        ),
        AgentMetrics::Vad(m) => info!(
            idle_time = m.idle_time,
            inference_count = m.inference_count,
            "VAD metrics"
        ),
        AgentMetrics::Eou(m) => info!(
            end_of_utterance_delay = m.end_of_utterance_delay,
            transcription_delay = m.transcription_delay,
            "EOU metrics"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(prompt: u64, cached: u64, completion: u64) -> AgentMetrics {
        AgentMetrics::Llm(LlmMetrics {
            prompt_tokens: prompt,
            prompt_cached_tokens: cached,
            completion_tokens: completion,
            ..Default::default()
        })
    }

    fn tts(chars: u64, audio: f64) -> AgentMetrics {
        AgentMetrics::Tts(TtsMetrics {
            characters_count: chars,
            audio_duration: audio,
            ..Default::default()
        })
    }

    fn stt(audio: f64) -> AgentMetrics {
        AgentMetrics::Stt(SttMetrics {
            audio_duration: audio,
            ..Default::default()
        })
    }

    #[test]
    fn test_collect_sums_every_kind() {
        let events = vec![
            llm(120, 20, 30),
            stt(1.25),
            tts(64, 2.5),
            AgentMetrics::Eou(EouMetrics::default()),
            llm(80, 0, 12),
            stt(0.75),
            tts(10, 0.5),
        ];

        let mut collector = UsageCollector::new();
        for event in &events {
            collector.collect(event).unwrap();
        }

        let summary = collector.summary();
        assert_eq!(summary.llm_prompt_tokens, 200);
        assert_eq!(summary.llm_prompt_cached_tokens, 20);
        assert_eq!(summary.llm_completion_tokens, 42);
        assert_eq!(summary.tts_characters_count, 74);
        assert_eq!(summary.tts_audio_duration, Duration::from_secs(3));
        assert_eq!(summary.stt_audio_duration, Duration::from_secs(2));
        assert_eq!(collector.collected(), 7);
    }

    #[test]
    fn test_collect_is_order_independent() {
        let events = vec![stt(0.1), stt(0.2), stt(0.3), tts(3, 0.7), llm(1, 0, 2), tts(5, 0.013)];

        let mut forward = UsageCollector::new();
        events.iter().for_each(|e| forward.collect(e).unwrap());
        let mut backward = UsageCollector::new();
        events.iter().rev().for_each(|e| backward.collect(e).unwrap());

        assert_eq!(forward.summary(), backward.summary());
    }

    #[test]
    fn test_invalid_duration_is_rejected_without_side_effects() {
        let mut collector = UsageCollector::new();
        collector.collect(&tts(10, 1.0)).unwrap();

        let err = collector.collect(&tts(99, -1.0)).unwrap_err();
        assert_eq!(
            err,
            MetricsError::InvalidDuration {
                field: "tts.audio_duration",
                value: -1.0
            }
        );
        assert!(collector.collect(&stt(f64::NAN)).is_err());

        let summary = collector.summary();
        assert_eq!(summary.tts_characters_count, 10);
        assert_eq!(summary.tts_audio_duration, Duration::from_secs(1));
        assert_eq!(collector.collected(), 1);
    }

    #[test]
    fn test_overflowing_record_leaves_totals_untouched() {
        let mut collector = UsageCollector::new();
        collector.collect(&llm(1, 0, u64::MAX)).unwrap();
        collector.collect(&tts(5, 1e19)).unwrap();

        assert_eq!(
            collector.collect(&llm(1, 0, 1)).unwrap_err(),
            MetricsError::Overflow {
                field: "llm_completion_tokens"
            }
        );
        assert_eq!(
            collector.collect(&tts(5, 1e19)).unwrap_err(),
            MetricsError::Overflow {
                field: "tts_audio_duration"
            }
        );

        let summary = collector.summary();
        assert_eq!(summary.llm_prompt_tokens, 1);
        assert_eq!(summary.llm_completion_tokens, u64::MAX);
        assert_eq!(summary.tts_characters_count, 5);
        assert_eq!(summary.tts_audio_duration, Duration::from_secs_f64(1e19));
        assert_eq!(collector.collected(), 2);

        collector.collect(&stt(2.0)).unwrap();
        assert_eq!(collector.summary().stt_audio_duration, Duration::from_secs(2));
    }

    #[test]
    fn test_metrics_serialize_with_type_tag() {
        let value = serde_json::to_value(llm(1, 0, 2)).unwrap();
        assert_eq!(value["type"], "llm");
        assert_eq!(value["completion_tokens"], 2);
    }
}
