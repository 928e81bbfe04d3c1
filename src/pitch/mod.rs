pub mod neural;
pub mod octave;
pub mod refine;
pub mod smoother;
pub mod yin;

use serde::Serialize;

/// One frame's frequency estimate. Recomputed every frame, never stored long-term.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PitchEstimate {
    pub frequency_hz: f32,
    pub confidence: f32,
    /// How periodic the frame looked to YIN (1 - normalized difference at the chosen lag).
    pub periodicity: f32,
}

impl PitchEstimate {
    pub fn midi_float(&self) -> f32 {
        69.0 + 12.0 * (self.frequency_hz / 440.0).log2()
    }
}

/// Root-mean-square amplitude of a frame.
pub fn frame_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f32 = samples.iter().map(|s| s * s).sum();
    (energy / samples.len() as f32).sqrt()
}
