use std::collections::VecDeque;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::notes::describe_frequency;
use crate::pitch::PitchEstimate;

/// Agreeing frames needed inside the window before a pitch counts as stable.
const MIN_STABLE_FRAMES: usize = 2;
/// The window always spans at least this many observation intervals, so slow
/// producers (e.g. inference that outlasts the poll interval) can still agree.
const WINDOW_INTERVALS: f64 = 2.0;
/// Upper bound on a stretched window.
const MAX_WINDOW_MS: f64 = 500.0;

/// A pitch that passed the confidence and stability gates.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StablePitch {
    pub note_name: String,
    pub frequency_hz: f32,
    pub cents_offset: f32,
    pub confidence: f32,
    pub timestamp_ms: f64,
    pub is_onset: bool,
}

#[derive(Clone, Copy, Debug)]
struct Observation {
    timestamp_ms: f64,
    frequency_hz: f32,
    confidence: f32,
}

pub struct StabilityGate {
    window_ms: f64,
    max_spread_cents: f32,
    min_confidence: f32,
    history: VecDeque<Observation>,
    last_push_ms: Option<f64>,
    /// Spacing between the previous two pushes.
    interval_ms: Option<f64>,
}

impl StabilityGate {
    pub fn new(config: &EngineConfig) -> Self {
        StabilityGate {
            window_ms: config.preset.stability_window_ms,
            max_spread_cents: config.preset.pitch_stability_cents,
            min_confidence: config.preset.min_confidence,
            history: VecDeque::new(),
            last_push_ms: None,
            interval_ms: None,
        }
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_push_ms = None;
        self.interval_ms = None;
    }

    /// Age limit for observations, stretched to the cadence they arrive at.
    fn effective_window_ms(&self) -> f64 {
        match self.interval_ms {
            Some(interval) => self
                .window_ms
                .max((interval * WINDOW_INTERVALS).min(MAX_WINDOW_MS)),
            None => self.window_ms,
        }
    }

    /// Feed this frame's estimate (if any); returns a pitch once it has held steady.
    pub fn push(&mut self, estimate: Option<PitchEstimate>, now_ms: f64) -> Option<StablePitch> {
        // Judged against the cadence seen so far; this gap counts from the next push.
        let window = self.effective_window_ms();
        if let Some(last) = self.last_push_ms {
            self.interval_ms = Some(now_ms - last);
        }
        self.last_push_ms = Some(now_ms);

        let estimate = match estimate {
            Some(e) if e.confidence >= self.min_confidence && e.frequency_hz > 0.0 => e,
            _ => {
                self.history.clear();
                return None;
            }
        };

        let spread = self.max_spread_cents;
        self.history.retain(|o| {
            now_ms - o.timestamp_ms <= window
                && (1200.0 * (o.frequency_hz / estimate.frequency_hz).log2()).abs() <= spread
        });
        self.history.push_back(Observation {
            timestamp_ms: now_ms,
            frequency_hz: estimate.frequency_hz,
            confidence: estimate.confidence,
        });

        if self.history.len() < MIN_STABLE_FRAMES {
            return None;
        }

        let n = self.history.len() as f32;
        let frequency_hz = self.history.iter().map(|o| o.frequency_hz).sum::<f32>() / n;
        let confidence = self.history.iter().map(|o| o.confidence).sum::<f32>() / n;
        let (note_name, cents_offset) = describe_frequency(frequency_hz as f64);

        Some(StablePitch {
            note_name,
            frequency_hz,
            cents_offset: cents_offset as f32,
            confidence,
            timestamp_ms: now_ms,
            is_onset: false,
        })
    }
}
