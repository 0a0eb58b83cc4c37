//! Voice Activity Detection
//!
//! The detector is the expensive, process-wide resource that is loaded at
//! prewarm time and shared read-only by every session in the process.

use std::fmt;

/// Default RMS energy above which a frame counts as speech.
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.01;

/// Classification of a single audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

/// Contract of a voice-activity detector.
///
/// Implementations must be cheap to call per frame and safe to share between
/// sessions; any per-stream state belongs to the caller.
pub trait VoiceActivityDetector: Send + Sync + fmt::Debug {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Classifies a frame of mono PCM samples normalised to `[-1.0, 1.0]`.
    fn classify(&self, frame: &[f32]) -> VadDecision;
}

/// Tuning for [`EnergyVad`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadOptions {
    pub energy_threshold: f32,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            energy_threshold: DEFAULT_ENERGY_THRESHOLD,
        }
    }
}

/// Root-mean-square energy detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    pub fn load(options: VadOptions) -> anyhow::Result<Self> {
        let threshold = options.energy_threshold;
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("energy threshold must be within 0.0..=1.0, got {threshold}");
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn name(&self) -> &str {
        "energy"
    }

    fn classify(&self, frame: &[f32]) -> VadDecision {
        if rms(frame) > self.threshold {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
