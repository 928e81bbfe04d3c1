use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Instrument {
    Keyboard,
    Guitar,
    Bass,
}

impl FromStr for Instrument {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyboard" | "piano" => Ok(Instrument::Keyboard),
            "guitar" => Ok(Instrument::Guitar),
            "bass" => Ok(Instrument::Bass),
            _ => Err(EngineError::UnknownInstrument(s.to_string())),
        }
    }
}

/// Which frequency estimator drives the pipeline.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EstimatorStrategy {
    YinOnly,
    /// Use the neural model once it is loaded, YIN until then (or forever if loading fails).
    NeuralWithFallback,
}

impl FromStr for EstimatorStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "yin" | "yinOnly" | "yin_only" => Ok(EstimatorStrategy::YinOnly),
            "neural" | "neuralWithFallback" | "neural_with_fallback" => {
                Ok(EstimatorStrategy::NeuralWithFallback)
            }
            _ => Err(EngineError::UnknownStrategy(s.to_string())),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct FrequencyRange {
    pub min: f32,
    pub max: f32,
}

impl FrequencyRange {
    pub fn contains(&self, hz: f32) -> bool {
        hz >= self.min && hz <= self.max
    }
}

/// Per-instrument tuning of the detection pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentPreset {
    pub min_volume_rms: f32,
    /// Frame-to-frame RMS rise that counts as a re-attack of the held note.
    pub onset_volume_jump: f32,
    pub min_confidence: f32,
    pub stability_window_ms: f64,
    pub pitch_stability_cents: f32,
    pub onset_cooldown_ms: f64,
    pub frequency_range: FrequencyRange,
    pub poll_interval_ms: u32,
    pub frame_size: usize,
}

impl InstrumentPreset {
    pub fn for_instrument(instrument: Instrument) -> Self {
        match instrument {
            // Sharp attacks, fast decay: react quickly.
            Instrument::Keyboard => InstrumentPreset {
                min_volume_rms: 0.010,
                onset_volume_jump: 0.020,
                min_confidence: 0.85,
                stability_window_ms: 60.0,
                pitch_stability_cents: 30.0,
                onset_cooldown_ms: 120.0,
                frequency_range: FrequencyRange { min: 60.0, max: 2100.0 },
                poll_interval_ms: 20,
                frame_size: 3072,
            },
            Instrument::Guitar => InstrumentPreset {
                min_volume_rms: 0.008,
                onset_volume_jump: 0.015,
                min_confidence: 0.80,
                stability_window_ms: 80.0,
                pitch_stability_cents: 35.0,
                onset_cooldown_ms: 150.0,
                frequency_range: FrequencyRange { min: 75.0, max: 1400.0 },
                poll_interval_ms: 30,
                frame_size: 3072,
            },
            // Soft attacks and long periods: lower thresholds, longer windows.
            Instrument::Bass => InstrumentPreset {
                min_volume_rms: 0.005,
                onset_volume_jump: 0.010,
                min_confidence: 0.75,
                stability_window_ms: 120.0,
                pitch_stability_cents: 40.0,
                onset_cooldown_ms: 200.0,
                frequency_range: FrequencyRange { min: 38.0, max: 420.0 },
                poll_interval_ms: 50,
                frame_size: 4096,
            },
        }
    }
}

/// Complete engine configuration. Fixed for the lifetime of a listening session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub instrument: Instrument,
    pub strategy: EstimatorStrategy,
    pub preset: InstrumentPreset,
    pub yin_threshold: f32,
    pub smoothing: bool,
    pub note_settle_ms: f64,
    pub duplicate_debounce_ms: f64,
    pub match_tolerance_cents: f64,
    pub noise_floor_decay: f32,
    pub noise_floor_attack: f32,
    pub silence_multiplier: f32,
    pub initial_noise_floor: f32,
}

impl EngineConfig {
    pub fn new(instrument: Instrument, strategy: EstimatorStrategy) -> Self {
        let preset = InstrumentPreset::for_instrument(instrument);
        EngineConfig {
            instrument,
            strategy,
            note_settle_ms: preset.stability_window_ms,
            preset,
            yin_threshold: 0.15,
            smoothing: false,
            duplicate_debounce_ms: 250.0,
            match_tolerance_cents: 55.0,
            noise_floor_decay: 0.95,
            noise_floor_attack: 0.01,
            silence_multiplier: 2.5,
            initial_noise_floor: 0.001,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::new(Instrument::Keyboard, EstimatorStrategy::YinOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_parsing() {
        assert_eq!("piano".parse::<Instrument>().unwrap(), Instrument::Keyboard);
        assert_eq!("Bass".parse::<Instrument>().unwrap(), Instrument::Bass);
        assert!(matches!(
            "tuba".parse::<Instrument>(),
            Err(EngineError::UnknownInstrument(_))
        ));
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "neural".parse::<EstimatorStrategy>().unwrap(),
            EstimatorStrategy::NeuralWithFallback
        );
        assert!("crepe-ish".parse::<EstimatorStrategy>().is_err());
    }

    #[test]
    fn test_presets_follow_attack_character() {
        let keyboard = InstrumentPreset::for_instrument(Instrument::Keyboard);
        let bass = InstrumentPreset::for_instrument(Instrument::Bass);
        assert!(bass.min_volume_rms < keyboard.min_volume_rms);
        assert!(bass.stability_window_ms > keyboard.stability_window_ms);
        assert!(bass.onset_cooldown_ms > keyboard.onset_cooldown_ms);
        // Bass frames must hold two periods of the lowest note.
        let min_frame = 2.0 * 44100.0 / bass.frequency_range.min;
        assert!(bass.frame_size as f32 >= min_frame);
    }

    #[test]
    fn test_settle_time_defaults_to_stability_window() {
        let config = EngineConfig::new(Instrument::Guitar, EstimatorStrategy::YinOnly);
        assert_eq!(config.note_settle_ms, config.preset.stability_window_ms);
    }
}
