//! Neural pitch estimation: model lifecycle, input windows and activation decoding.
//!
//! The model itself runs outside this crate. We prepare its fixed-size input
//! window and turn the activation curve it returns into a `PitchEstimate`.

use log::{info, warn};
use serde::Serialize;

use crate::config::FrequencyRange;
use crate::error::EngineError;
use crate::pitch::refine::refine_peak;
use crate::pitch::PitchEstimate;

pub const MODEL_SAMPLE_RATE: f32 = 16000.0;
pub const MODEL_WINDOW: usize = 1024;
pub const NUM_BINS: usize = 360;
pub const CENTS_PER_BIN: f32 = 20.0;
/// Cents above `CENTS_REFERENCE_HZ` of bin 0.
const BIN0_CENTS: f32 = 1997.379_4;
const CENTS_REFERENCE_HZ: f32 = 10.0;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    /// Loading failed; the engine stays on YIN for the rest of its lifetime.
    Failed,
}

pub struct NeuralEstimator {
    state: ModelState,
}

impl NeuralEstimator {
    pub fn new() -> Self {
        NeuralEstimator {
            state: ModelState::Unloaded,
        }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ModelState::Ready
    }

    /// Returns true if the caller should load the model now. Only ever true once.
    pub fn begin_load(&mut self) -> bool {
        if self.state != ModelState::Unloaded {
            return false;
        }
        self.state = ModelState::Loading;
        true
    }

    pub fn finish_load(&mut self, success: bool) {
        if self.state != ModelState::Loading {
            warn!("ignoring model load result in state {:?}", self.state);
            return;
        }
        if success {
            info!("pitch model loaded");
            self.state = ModelState::Ready;
        } else {
            warn!("pitch model failed to load, continuing with YIN only");
            self.state = ModelState::Failed;
        }
    }
}

impl Default for NeuralEstimator {
    fn default() -> Self {
        NeuralEstimator::new()
    }
}

/// Input samples at `sample_rate` needed to fill one model window.
pub fn window_span(sample_rate: f32) -> usize {
    (MODEL_WINDOW as f32 * sample_rate / MODEL_SAMPLE_RATE).ceil() as usize
}

/// Build the model input from the most recent audio in `samples`: resampled to
/// `MODEL_SAMPLE_RATE`, `MODEL_WINDOW` long, zero mean and unit variance.
pub fn prepare_window(samples: &[f32], sample_rate: f32) -> Vec<f32> {
    let mut window = vec![0.0f32; MODEL_WINDOW];
    if samples.is_empty() || sample_rate <= 0.0 {
        return window;
    }

    let step = sample_rate / MODEL_SAMPLE_RATE;
    let start = samples.len().saturating_sub(window_span(sample_rate));
    let source = &samples[start..];

    // Linear interpolation; shorter frames are zero-padded at the front.
    let available = ((source.len() as f32) / step).floor() as usize;
    let available = available.min(MODEL_WINDOW);
    let offset = MODEL_WINDOW - available;
    for i in 0..available {
        let pos = i as f32 * step;
        let idx = pos.floor() as usize;
        let frac = pos - idx as f32;
        let a = source[idx];
        let b = source.get(idx + 1).copied().unwrap_or(a);
        window[offset + i] = a + (b - a) * frac;
    }

    let mean = window.iter().sum::<f32>() / MODEL_WINDOW as f32;
    let variance = window.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / MODEL_WINDOW as f32;
    let std = variance.sqrt();
    for v in window.iter_mut() {
        *v -= mean;
        if std > 1e-8 {
            *v /= std;
        }
    }
    window
}

pub fn bin_to_frequency(bin: f32) -> f32 {
    let cents = BIN0_CENTS + CENTS_PER_BIN * bin;
    CENTS_REFERENCE_HZ * 2f32.powf(cents / 1200.0)
}

/// Fractional bin for `hz`; the inverse of `bin_to_frequency`.
pub fn frequency_to_bin(hz: f32) -> f32 {
    (1200.0 * (hz / CENTS_REFERENCE_HZ).log2() - BIN0_CENTS) / CENTS_PER_BIN
}

/// Decode an activation curve into an estimate. `Ok(None)` for an empty curve or a
/// peak outside `range`; `Err` if the curve has the wrong shape.
pub fn decode_activations(
    activations: &[f32],
    range: FrequencyRange,
) -> Result<Option<PitchEstimate>, EngineError> {
    if activations.len() != NUM_BINS {
        return Err(EngineError::ActivationLength {
            expected: NUM_BINS,
            got: activations.len(),
        });
    }

    let Some((best_bin, &peak)) = activations
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_finite())
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
    else {
        return Ok(None);
    };

    if peak <= 0.0 {
        return Ok(None);
    }

    let frequency_hz = bin_to_frequency(refine_peak(activations, best_bin));
    if !range.contains(frequency_hz) {
        return Ok(None);
    }

    let confidence = peak.clamp(0.0, 1.0);
    Ok(Some(PitchEstimate {
        frequency_hz,
        confidence,
        periodicity: confidence,
    }))
}
