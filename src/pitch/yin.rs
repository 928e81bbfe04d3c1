use crate::config::FrequencyRange;
use crate::pitch::PitchEstimate;

pub const DEFAULT_YIN_THRESHOLD: f32 = 0.15;
/// Shortest period searched, whatever the configured range. A note above the
/// range must be found at its own period so it can be rejected, not at a multiple of it.
const MAX_SEARCH_HZ: f32 = 2100.0;

/// YIN fundamental frequency estimator with reusable scratch buffers.
///
/// Anything detected outside `range` is reported as no pitch.
pub struct YinDetector {
    threshold: f32,
    range: FrequencyRange,
    diff: Vec<f32>,
    cmnd: Vec<f32>,
}

impl YinDetector {
    pub fn new(threshold: f32, range: FrequencyRange) -> Self {
        YinDetector {
            threshold,
            range,
            diff: Vec::new(),
            cmnd: Vec::new(),
        }
    }

    /// Estimate the fundamental of `samples`. Deterministic for a given frame and setup.
    pub fn detect(&mut self, samples: &[f32], sample_rate: f32) -> Option<PitchEstimate> {
        if samples.len() < 4 || sample_rate <= 0.0 {
            return None;
        }

        let min_lag = ((sample_rate / MAX_SEARCH_HZ.max(self.range.max)).floor() as usize).max(2);
        let max_lag = (sample_rate / self.range.min).floor() as usize;

        let half_len = samples.len() / 2;
        let max_lag = max_lag.min(half_len);

        if min_lag >= max_lag {
            return None;
        }

        // Difference function
        self.diff.clear();
        self.diff.resize(max_lag + 1, 0.0);
        for tau in 1..=max_lag {
            let mut sum = 0.0f32;
            for j in 0..half_len {
                let d = samples[j] - samples[j + tau];
                sum += d * d;
            }
            self.diff[tau] = sum;
        }

        // Cumulative mean normalized difference
        self.cmnd.clear();
        self.cmnd.resize(max_lag + 1, 1.0);
        let mut running_sum = 0.0f32;
        for tau in 1..=max_lag {
            running_sum += self.diff[tau];
            self.cmnd[tau] = if running_sum > 0.0 {
                self.diff[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }

        // First dip below the threshold, walked forward to the bottom of its valley
        let mut best_tau = None;
        for tau in min_lag..=max_lag {
            if self.cmnd[tau] < self.threshold {
                let mut t = tau;
                while t < max_lag && self.cmnd[t + 1] < self.cmnd[t] {
                    t += 1;
                }
                best_tau = Some(t);
                break;
            }
        }
        let best_tau = best_tau?;

        let tau_refined = if best_tau > 1 && best_tau < max_lag {
            let alpha = self.cmnd[best_tau - 1];
            let beta = self.cmnd[best_tau];
            let gamma = self.cmnd[best_tau + 1];
            let denom = 2.0 * (2.0 * beta - alpha - gamma);
            if denom.abs() > 1e-10 {
                best_tau as f32 + (alpha - gamma) / denom
            } else {
                best_tau as f32
            }
        } else {
            best_tau as f32
        };

        if tau_refined <= 0.0 {
            return None;
        }

        let frequency_hz = sample_rate / tau_refined;
        if !self.range.contains(frequency_hz) {
            return None;
        }

        let clarity = (1.0 - self.cmnd[best_tau]).clamp(0.0, 1.0);
        Some(PitchEstimate {
            frequency_hz,
            confidence: clarity,
            periodicity: clarity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn generate_sine(freq: f32, sample_rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn wide() -> YinDetector {
        YinDetector::new(DEFAULT_YIN_THRESHOLD, FrequencyRange { min: 60.0, max: 2000.0 })
    }

    #[test]
    fn test_yin_a440() {
        let samples = generate_sine(440.0, 44100.0, 2048);
        let result = wide().detect(&samples, 44100.0).expect("should detect pitch");
        let error = (result.frequency_hz - 440.0).abs();
        assert!(error < 2.0, "Expected ~440 Hz, got {} (error {})", result.frequency_hz, error);
        assert!(result.confidence > 0.8, "Should have high confidence: {}", result.confidence);
        assert!((result.midi_float() - 69.0).abs() < 0.1);
    }

    #[test]
    fn test_yin_low_e_bass() {
        let mut detector = YinDetector::new(
            DEFAULT_YIN_THRESHOLD,
            FrequencyRange { min: 38.0, max: 420.0 },
        );
        let samples = generate_sine(41.2, 44100.0, 4096);
        let result = detector.detect(&samples, 44100.0).expect("should detect E1");
        let error = (result.frequency_hz - 41.2).abs();
        assert!(error < 0.5, "Expected ~41.2 Hz, got {}", result.frequency_hz);
    }

    #[test]
    fn test_yin_is_deterministic() {
        let samples = generate_sine(329.63, 44100.0, 2048);
        let mut detector = wide();
        let first = detector.detect(&samples, 44100.0).unwrap();
        for _ in 0..5 {
            assert_eq!(detector.detect(&samples, 44100.0).unwrap(), first);
        }
        // A fresh detector agrees with a reused one.
        assert_eq!(wide().detect(&samples, 44100.0).unwrap(), first);
    }

    #[test]
    fn test_yin_silence() {
        let samples = vec![0.0; 2048];
        assert!(wide().detect(&samples, 44100.0).is_none());
    }

    #[test]
    fn test_yin_empty() {
        assert!(wide().detect(&[], 44100.0).is_none());
    }

    #[test]
    fn test_yin_out_of_range() {
        let mut detector = YinDetector::new(
            DEFAULT_YIN_THRESHOLD,
            FrequencyRange { min: 38.0, max: 420.0 },
        );
        let samples = generate_sine(880.0, 44100.0, 4096);
        assert!(detector.detect(&samples, 44100.0).is_none());
    }

    #[test]
    fn test_yin_above_range_is_not_folded_to_subharmonic() {
        let mut detector = YinDetector::new(
            DEFAULT_YIN_THRESHOLD,
            FrequencyRange { min: 38.0, max: 420.0 },
        );
        for freq in [523.25, 659.26, 880.0] {
            let samples = generate_sine(freq, 44100.0, 4096);
            let result = detector.detect(&samples, 44100.0);
            assert!(result.is_none(), "{} Hz reported as {:?}", freq, result);
        }
        // Still fine just inside the top of the range
        let samples = generate_sine(392.0, 44100.0, 4096);
        let result = detector.detect(&samples, 44100.0).expect("G4 is in range");
        assert!((result.frequency_hz - 392.0).abs() < 2.0);
    }

    #[test]
    fn test_yin_noise_has_no_pitch() {
        // Deterministic pseudo-random noise
        let mut state = 12345u32;
        let samples: Vec<f32> = (0..2048)
            .map(|_| {
                state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
                ((state >> 16) as f32 / 32768.0) - 1.0
            })
            .collect();
        assert!(wide().detect(&samples, 44100.0).is_none());
    }

    #[test]
    fn test_yin_octave_robustness() {
        let sample_rate = 44100.0;
        let fundamental = 220.0;
        let samples: Vec<f32> = (0..2048)
            .map(|i| {
                let t = i as f32 / sample_rate;
                0.5 * (2.0 * PI * fundamental * t).sin()
                    + 0.3 * (2.0 * PI * 2.0 * fundamental * t).sin()
                    + 0.1 * (2.0 * PI * 3.0 * fundamental * t).sin()
            })
            .collect();
        let result = wide().detect(&samples, sample_rate).unwrap();
        let error = (result.frequency_hz - fundamental).abs();
        assert!(
            error < 3.0,
            "Should detect fundamental 220 Hz despite harmonics, got {}",
            result.frequency_hz
        );
    }
}
