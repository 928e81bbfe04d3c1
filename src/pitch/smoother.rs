//! Particle-style pitch smoothing.
//!
//! Keeps a handful of weighted frequency hypotheses. Each observation reweights
//! them by how close they are (in cents) to what was just heard, so a single
//! noisy frame cannot drag the output far, while a real note change takes over
//! within a frame or two.

const MAX_HYPOTHESES: usize = 8;
const OUTPUT_HYPOTHESES: usize = 3;
/// Width of the transition kernel in cents.
const TRANSITION_SIGMA_CENTS: f32 = 40.0;
/// Observations this close to an existing hypothesis reinforce it instead of adding one.
const MERGE_CENTS: f32 = 10.0;
const MIN_PROBABILITY: f32 = 1e-4;
/// Prior weight of a brand new hypothesis relative to its observation's confidence.
const NEW_HYPOTHESIS_WEIGHT: f32 = 0.25;
/// Only hypotheses this close to the strongest one contribute to the output.
const OUTPUT_CLUSTER_CENTS: f32 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Hypothesis {
    frequency_hz: f32,
    probability: f32,
}

#[derive(Debug, Default)]
pub struct PitchSmoother {
    hypotheses: Vec<Hypothesis>,
}

fn cents(a: f32, b: f32) -> f32 {
    1200.0 * (a / b).log2()
}

impl PitchSmoother {
    pub fn new() -> Self {
        PitchSmoother {
            hypotheses: Vec::with_capacity(MAX_HYPOTHESES + 1),
        }
    }

    pub fn reset(&mut self) {
        self.hypotheses.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Feed one observation and return the smoothed frequency.
    pub fn update(&mut self, frequency_hz: f32, confidence: f32) -> f32 {
        let confidence = confidence.clamp(0.0, 1.0);
        if frequency_hz <= 0.0 {
            return self.estimate().unwrap_or(frequency_hz);
        }

        for h in self.hypotheses.iter_mut() {
            let d = cents(h.frequency_hz, frequency_hz) / TRANSITION_SIGMA_CENTS;
            let transition = (-0.5 * d * d).exp();
            // Low-confidence observations barely move the weights.
            h.probability *= confidence * transition + (1.0 - confidence) * 0.5;
        }

        let nearest = self
            .hypotheses
            .iter()
            .enumerate()
            .filter(|(_, h)| cents(h.frequency_hz, frequency_hz).abs() < MERGE_CENTS)
            .max_by(|a, b| a.1.probability.total_cmp(&b.1.probability))
            .map(|(i, _)| i);
        match nearest {
            Some(i) => {
                let h = &mut self.hypotheses[i];
                let w = h.probability + confidence;
                h.frequency_hz = (h.frequency_hz * h.probability + frequency_hz * confidence)
                    / w.max(f32::EPSILON);
                h.probability = w;
            }
            None => self.hypotheses.push(Hypothesis {
                frequency_hz,
                probability: (confidence * NEW_HYPOTHESIS_WEIGHT).max(MIN_PROBABILITY),
            }),
        }

        self.hypotheses.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        self.hypotheses.truncate(MAX_HYPOTHESES);

        let total: f32 = self.hypotheses.iter().map(|h| h.probability).sum();
        if total > 0.0 {
            for h in self.hypotheses.iter_mut() {
                h.probability /= total;
            }
        }
        self.hypotheses.retain(|h| h.probability >= MIN_PROBABILITY);

        self.estimate().unwrap_or(frequency_hz)
    }

    /// Probability-weighted mean of the strongest hypotheses around the best one.
    pub fn estimate(&self) -> Option<f32> {
        let best = self.hypotheses.first()?;
        let (sum, weight) = self
            .hypotheses
            .iter()
            .take(OUTPUT_HYPOTHESES)
            .filter(|h| cents(h.frequency_hz, best.frequency_hz).abs() <= OUTPUT_CLUSTER_CENTS)
            .fold((0.0f32, 0.0f32), |(sum, weight), h| {
                (sum + h.frequency_hz * h.probability, weight + h.probability)
            });
        if weight <= 0.0 {
            return None;
        }
        Some(sum / weight)
    }
}
