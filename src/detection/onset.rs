//! Onset (note attack) detection.
//!
//! Two states: silent, or sounding with a held note. New notes are reported on a
//! silence-to-sound edge, on a settled change of note, or when the held note is
//! struck again (a sharp volume rise). Everything is subject to a cooldown since
//! the previous onset. The detector errs towards firing: the grader can absorb a
//! spurious onset, but a missed one loses a note.

use std::collections::VecDeque;

use log::debug;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::detection::stability::StablePitch;

const VOLUME_HISTORY_LEN: usize = 5;
/// A rise from the recent minimum must be this many times the per-frame jump threshold.
const RISE_FROM_MIN_FACTOR: f32 = 1.5;

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OnsetKind {
    SilenceEdge,
    NoteChange,
    Reattack,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OnsetState {
    pub is_in_silence: bool,
    pub silence_start_ms: f64,
    pub last_onset_ms: Option<f64>,
    pub last_volume: f32,
    pub held_note: Option<String>,
    pub hold_start_ms: f64,
    /// Candidate replacement for the held note and when it first appeared.
    pub pending_note: Option<(String, f64)>,
    pub volume_history: VecDeque<f32>,
}

impl Default for OnsetState {
    fn default() -> Self {
        OnsetState {
            is_in_silence: true,
            silence_start_ms: 0.0,
            last_onset_ms: None,
            last_volume: 0.0,
            held_note: None,
            hold_start_ms: 0.0,
            pending_note: None,
            volume_history: VecDeque::with_capacity(VOLUME_HISTORY_LEN),
        }
    }
}

pub struct OnsetDetector {
    state: OnsetState,
    cooldown_ms: f64,
    volume_jump: f32,
    settle_ms: f64,
}

impl OnsetDetector {
    pub fn new(config: &EngineConfig) -> Self {
        OnsetDetector {
            state: OnsetState::default(),
            cooldown_ms: config.preset.onset_cooldown_ms.max(0.0),
            volume_jump: config.preset.onset_volume_jump,
            settle_ms: config.note_settle_ms.max(0.0),
        }
    }

    pub fn state(&self) -> &OnsetState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = OnsetState::default();
    }

    pub fn is_silent(&self) -> bool {
        self.state.is_in_silence
    }

    fn cooldown_elapsed(&self, now_ms: f64) -> bool {
        match self.state.last_onset_ms {
            Some(last) => now_ms - last >= self.cooldown_ms,
            None => true,
        }
    }

    fn fire(&mut self, kind: OnsetKind, now_ms: f64) -> Option<OnsetKind> {
        if !self.cooldown_elapsed(now_ms) {
            debug!("{:?} onset at {:.0} ms suppressed by cooldown", kind, now_ms);
            return None;
        }
        self.state.last_onset_ms = Some(now_ms);
        self.state.volume_history.clear();
        Some(kind)
    }

    /// Evaluate one frame. `threshold` is the current silence threshold and
    /// `pitch` the stable pitch for this frame, if there is one.
    pub fn update(
        &mut self,
        volume: f32,
        threshold: f32,
        pitch: Option<&StablePitch>,
        now_ms: f64,
    ) -> Option<OnsetKind> {
        if volume < threshold {
            if !self.state.is_in_silence {
                debug!("silence at {:.0} ms", now_ms);
                self.state.is_in_silence = true;
                self.state.silence_start_ms = now_ms;
                self.state.held_note = None;
                self.state.pending_note = None;
            }
            self.state.volume_history.clear();
            self.state.last_volume = volume;
            return None;
        }

        let onset = if self.state.is_in_silence {
            match pitch {
                Some(p) => {
                    self.state.is_in_silence = false;
                    self.state.held_note = Some(p.note_name.clone());
                    self.state.hold_start_ms = now_ms;
                    self.state.pending_note = None;
                    self.state.volume_history.clear();
                    self.fire(OnsetKind::SilenceEdge, now_ms)
                }
                // Loud but unpitched: wait for the pitch to settle.
                None => None,
            }
        } else {
            match pitch {
                Some(p) if self.state.held_note.as_deref() != Some(p.note_name.as_str()) => {
                    self.note_change(&p.note_name, now_ms)
                }
                Some(_) => {
                    self.state.pending_note = None;
                    if self.is_reattack(volume) {
                        self.fire(OnsetKind::Reattack, now_ms)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if self.state.volume_history.len() == VOLUME_HISTORY_LEN {
            self.state.volume_history.pop_front();
        }
        self.state.volume_history.push_back(volume);
        self.state.last_volume = volume;
        onset
    }

    fn note_change(&mut self, note: &str, now_ms: f64) -> Option<OnsetKind> {
        let pending_since = self
            .state
            .pending_note
            .as_ref()
            .filter(|(pending, _)| pending.as_str() == note)
            .map(|(_, since)| *since);
        let since = match pending_since {
            Some(since) => since,
            None => {
                self.state.pending_note = Some((note.to_string(), now_ms));
                now_ms
            }
        };
        if now_ms - since < self.settle_ms {
            return None;
        }
        let onset = self.fire(OnsetKind::NoteChange, now_ms)?;
        self.state.held_note = Some(note.to_string());
        self.state.hold_start_ms = now_ms;
        self.state.pending_note = None;
        Some(onset)
    }

    fn is_reattack(&self, volume: f32) -> bool {
        let jump = volume - self.state.last_volume;
        let recent_min = self
            .state
            .volume_history
            .iter()
            .copied()
            .fold(f32::INFINITY, f32::min);
        let rise = volume - recent_min;
        jump > self.volume_jump
            || (recent_min.is_finite() && rise > self.volume_jump * RISE_FROM_MIN_FACTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EstimatorStrategy, Instrument};

    const THRESHOLD: f32 = 0.01;

    fn pitch(note: &str, t: f64) -> StablePitch {
        StablePitch {
            note_name: note.to_string(),
            frequency_hz: 440.0,
            cents_offset: 0.0,
            confidence: 0.9,
            timestamp_ms: t,
            is_onset: false,
        }
    }

    fn detector() -> OnsetDetector {
        // keyboard: cooldown 120 ms, jump 0.02, settle 60 ms
        OnsetDetector::new(&EngineConfig::new(Instrument::Keyboard, EstimatorStrategy::YinOnly))
    }

    #[test]
    fn test_silence_to_sound_fires() {
        let mut d = detector();
        assert_eq!(d.update(0.001, THRESHOLD, None, 0.0), None);
        assert_eq!(
            d.update(0.1, THRESHOLD, Some(&pitch("A4", 20.0)), 20.0),
            Some(OnsetKind::SilenceEdge)
        );
        assert_eq!(d.state().held_note.as_deref(), Some("A4"));
        assert!(!d.is_silent());
    }

    #[test]
    fn test_loud_without_pitch_waits() {
        let mut d = detector();
        assert_eq!(d.update(0.1, THRESHOLD, None, 0.0), None);
        assert!(d.is_silent());
        assert_eq!(
            d.update(0.1, THRESHOLD, Some(&pitch("C4", 20.0)), 20.0),
            Some(OnsetKind::SilenceEdge)
        );
    }

    #[test]
    fn test_sustained_note_fires_once() {
        let mut d = detector();
        let mut onsets = 0;
        for i in 0..50 {
            let t = i as f64 * 20.0;
            if d.update(0.1, THRESHOLD, Some(&pitch("E4", t)), t).is_some() {
                onsets += 1;
            }
        }
        assert_eq!(onsets, 1);
    }

    #[test]
    fn test_note_change_waits_for_settle_time() {
        let mut d = detector();
        d.update(0.1, THRESHOLD, Some(&pitch("C4", 0.0)), 0.0);
        for t in [200.0, 220.0, 240.0] {
            assert_eq!(d.update(0.1, THRESHOLD, Some(&pitch("D4", t)), t), None);
        }
        assert_eq!(
            d.update(0.1, THRESHOLD, Some(&pitch("D4", 260.0)), 260.0),
            Some(OnsetKind::NoteChange)
        );
        assert_eq!(d.state().held_note.as_deref(), Some("D4"));
    }

    #[test]
    fn test_flicker_does_not_change_note() {
        let mut d = detector();
        d.update(0.1, THRESHOLD, Some(&pitch("C4", 0.0)), 0.0);
        for i in 1..30 {
            let t = 200.0 + i as f64 * 20.0;
            let note = if i % 2 == 0 { "C4" } else { "C#4" };
            assert_eq!(d.update(0.1, THRESHOLD, Some(&pitch(note, t)), t), None);
        }
    }

    #[test]
    fn test_reattack_of_same_note() {
        let mut d = detector();
        d.update(0.10, THRESHOLD, Some(&pitch("G4", 0.0)), 0.0);
        d.update(0.06, THRESHOLD, Some(&pitch("G4", 200.0)), 200.0);
        d.update(0.04, THRESHOLD, Some(&pitch("G4", 220.0)), 220.0);
        assert_eq!(
            d.update(0.12, THRESHOLD, Some(&pitch("G4", 240.0)), 240.0),
            Some(OnsetKind::Reattack)
        );
    }

    #[test]
    fn test_gradual_rise_from_recent_minimum_is_reattack() {
        let mut d = detector();
        d.update(0.10, THRESHOLD, Some(&pitch("G4", 0.0)), 0.0);
        d.update(0.03, THRESHOLD, None, 200.0);
        d.update(0.045, THRESHOLD, None, 220.0);
        // Each step is below the 0.02 jump, the total rise is not
        assert_eq!(
            d.update(0.062, THRESHOLD, Some(&pitch("G4", 240.0)), 240.0),
            Some(OnsetKind::Reattack)
        );
    }

    #[test]
    fn test_cooldown_between_onsets() {
        let mut d = detector();
        let mut onsets = Vec::new();
        let notes = ["C4", "D4", "E4", "F4", "G4", "A4"];
        let mut t = 0.0;
        for step in 0..120 {
            let note = notes[(step / 5) % notes.len()];
            let volume = if step % 7 == 0 { 0.2 } else { 0.05 };
            if d.update(volume, THRESHOLD, Some(&pitch(note, t)), t).is_some() {
                onsets.push(t);
            }
            t += 20.0;
        }
        assert!(onsets.len() > 1);
        for pair in onsets.windows(2) {
            assert!(pair[1] - pair[0] >= 120.0, "onsets {:?} too close", pair);
        }
    }

    #[test]
    fn test_silence_edge_resets_held_note_even_in_cooldown() {
        let mut d = detector();
        d.update(0.1, THRESHOLD, Some(&pitch("C4", 0.0)), 0.0);
        d.update(0.0, THRESHOLD, None, 20.0);
        assert_eq!(d.update(0.1, THRESHOLD, Some(&pitch("D4", 40.0)), 40.0), None);
        assert_eq!(d.state().held_note.as_deref(), Some("D4"));
        assert_eq!(d.state().last_onset_ms, Some(0.0));
    }

    #[test]
    fn test_reset_matches_fresh_detector() {
        let mut d = detector();
        d.update(0.1, THRESHOLD, Some(&pitch("C4", 0.0)), 0.0);
        d.update(0.3, THRESHOLD, Some(&pitch("C4", 300.0)), 300.0);
        d.reset();
        assert_eq!(d.state(), detector().state());
    }
}
