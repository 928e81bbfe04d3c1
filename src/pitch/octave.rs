use log::trace;

use crate::pitch::PitchEstimate;

/// Maximum distance from a whole octave, in octaves, for the ratio to count as clean.
const OCTAVE_TOLERANCE: f32 = 0.08;
/// YIN clarity needed before its octave is trusted over the model's.
const MIN_YIN_CLARITY: f32 = 0.6;
const CORRECTION_DISCOUNT: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OctaveCorrection {
    /// YIN missing, unclear, or not an octave multiple away.
    Unchecked,
    Confirmed,
    Halved,
    Doubled,
}

/// Cross-check a neural estimate against YIN and repair octave errors.
pub fn correct_octave(
    neural: PitchEstimate,
    yin: Option<PitchEstimate>,
) -> (PitchEstimate, OctaveCorrection) {
    let Some(yin) = yin else {
        return (neural, OctaveCorrection::Unchecked);
    };
    if yin.periodicity < MIN_YIN_CLARITY || yin.frequency_hz <= 0.0 || neural.frequency_hz <= 0.0 {
        return (neural, OctaveCorrection::Unchecked);
    }

    let octaves = (neural.frequency_hz / yin.frequency_hz).log2();
    let octave_diff = octaves.round();
    if (octaves - octave_diff).abs() >= OCTAVE_TOLERANCE {
        return (neural, OctaveCorrection::Unchecked);
    }

    let corrected = match octave_diff as i32 {
        0 => {
            let agreed = 0.5 * (neural.confidence + yin.periodicity);
            return (
                PitchEstimate {
                    confidence: neural.confidence.max(agreed).min(1.0),
                    periodicity: yin.periodicity,
                    ..neural
                },
                OctaveCorrection::Confirmed,
            );
        }
        1 => (neural.frequency_hz / 2.0, OctaveCorrection::Halved),
        -1 => (neural.frequency_hz * 2.0, OctaveCorrection::Doubled),
        _ => return (neural, OctaveCorrection::Unchecked),
    };

    trace!(
        "octave correction {:?}: {:.1} Hz -> {:.1} Hz (yin {:.1} Hz)",
        corrected.1,
        neural.frequency_hz,
        corrected.0,
        yin.frequency_hz
    );

    (
        PitchEstimate {
            frequency_hz: corrected.0,
            confidence: neural.confidence * CORRECTION_DISCOUNT,
            periodicity: yin.periodicity,
        },
        corrected.1,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn est(hz: f32, confidence: f32) -> PitchEstimate {
        PitchEstimate {
            frequency_hz: hz,
            confidence,
            periodicity: confidence,
        }
    }

    #[test]
    fn test_agreement_never_lowers_confidence() {
        for &(neural_conf, yin_conf) in &[(0.9, 0.7), (0.6, 0.95), (0.99, 0.99), (0.3, 0.61)] {
            let neural = est(440.0, neural_conf);
            let (out, kind) = correct_octave(neural, Some(est(441.5, yin_conf)));
            assert_eq!(kind, OctaveCorrection::Confirmed);
            assert!(out.confidence >= neural.confidence);
            assert_eq!(out.frequency_hz, 440.0);
        }
    }

    #[test]
    fn test_neural_octave_too_high_is_halved() {
        let (out, kind) = correct_octave(est(880.0, 0.9), Some(est(440.0, 0.9)));
        assert_eq!(kind, OctaveCorrection::Halved);
        assert!((out.frequency_hz - 440.0).abs() < 1e-3);
        assert!(out.confidence < 0.9);
    }

    #[test]
    fn test_neural_octave_too_low_is_doubled() {
        let (out, kind) = correct_octave(est(110.0, 0.8), Some(est(220.5, 0.85)));
        assert_eq!(kind, OctaveCorrection::Doubled);
        assert!((out.frequency_hz - 220.0).abs() < 1e-3);
    }

    #[test]
    fn test_passthrough_without_clear_yin() {
        let neural = est(440.0, 0.9);
        assert_eq!(correct_octave(neural, None), (neural, OctaveCorrection::Unchecked));
        let (out, kind) = correct_octave(neural, Some(est(220.0, 0.3)));
        assert_eq!(kind, OctaveCorrection::Unchecked);
        assert_eq!(out, neural);
    }

    #[test]
    fn test_non_octave_ratio_passes_through() {
        // A fifth apart: harmonic confusion we do not try to fix
        let neural = est(660.0, 0.9);
        let (out, kind) = correct_octave(neural, Some(est(440.0, 0.9)));
        assert_eq!(kind, OctaveCorrection::Unchecked);
        assert_eq!(out, neural);

        // Two octaves apart is outside the corrected set
        let (out, kind) = correct_octave(neural, Some(est(165.0, 0.9)));
        assert_eq!(kind, OctaveCorrection::Unchecked);
        assert_eq!(out, neural);
    }
}
