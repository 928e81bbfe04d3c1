//! Grades a live performance against an expected melody.
//!
//! Only the order of pitch classes matters: octave and timing are ignored.

use log::{debug, info, warn};

use crate::detection::stability::StablePitch;
use crate::error::EngineError;
use crate::notes::{midi_to_frequency, note_to_midi, octave_folded_cents, pitch_class};
use crate::scoring::types::*;

struct PerformanceSession {
    melody: Vec<ExpectedNote>,
    current_index: usize,
    results: Vec<NoteResult>,
    is_active: bool,
}

pub struct Grader {
    session: Option<PerformanceSession>,
    result: Option<PerformanceResult>,
    tolerance_cents: f64,
}

pub fn parse_melody(names: &[String]) -> Result<Vec<ExpectedNote>, EngineError> {
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            Ok(ExpectedNote {
                note_name: name.trim().to_string(),
                index,
                midi: note_to_midi(name)?,
            })
        })
        .collect()
}

/// Does a detected pitch count as the expected note?
pub fn matches_expected(detected: &StablePitch, expected: &ExpectedNote, tolerance_cents: f64) -> bool {
    let detected_class = pitch_class(&detected.note_name);
    if detected_class.is_some() && detected_class == Some(expected.midi.rem_euclid(12) as u8) {
        return true;
    }
    // Near a semitone boundary the rounded name can land on the neighbour.
    if detected.frequency_hz > 0.0 {
        let target_hz = midi_to_frequency(expected.midi as f64);
        let off = octave_folded_cents(detected.frequency_hz as f64, target_hz);
        return off.abs() <= tolerance_cents;
    }
    false
}

impl Grader {
    pub fn new(tolerance_cents: f64) -> Self {
        Grader {
            session: None,
            result: None,
            tolerance_cents,
        }
    }

    pub fn set_tolerance_cents(&mut self, tolerance_cents: f64) {
        self.tolerance_cents = tolerance_cents;
    }

    pub fn status(&self) -> PerformanceStatus {
        match &self.session {
            Some(s) if s.is_active => PerformanceStatus::Active,
            Some(_) => PerformanceStatus::Complete,
            None => PerformanceStatus::Idle,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status() == PerformanceStatus::Active
    }

    pub fn start_performance(&mut self, melody: &[String]) -> Result<(), EngineError> {
        if self.is_active() {
            warn!("start_performance rejected: a performance is already active");
            return Err(EngineError::PerformanceActive);
        }
        if melody.is_empty() {
            return Err(EngineError::EmptyMelody);
        }
        let melody = parse_melody(melody)?;
        info!("performance started with {} notes", melody.len());

        self.result = None;
        self.session = Some(PerformanceSession {
            results: Vec::with_capacity(melody.len()),
            melody,
            current_index: 0,
            is_active: true,
        });
        Ok(())
    }

    /// End the performance early. Idempotent: returns whatever result exists.
    pub fn stop_performance(&mut self) -> Option<PerformanceResult> {
        if self.is_active() {
            info!("performance stopped early");
            self.finish();
        }
        self.result.clone()
    }

    /// Grade one onset against the next expected note.
    pub fn process_detection(&mut self, detected: &StablePitch) -> Option<NoteResult> {
        let tolerance = self.tolerance_cents;
        let session = self.session.as_mut().filter(|s| s.is_active)?;
        let expected = session.melody.get(session.current_index)?;

        let is_correct = matches_expected(detected, expected, tolerance);
        let result = NoteResult {
            expected_note: expected.note_name.clone(),
            note_index: expected.index,
            played_note: Some(detected.note_name.clone()),
            played_frequency_hz: Some(detected.frequency_hz),
            is_correct,
        };
        debug!(
            "note {}: expected {}, played {} ({})",
            result.note_index,
            result.expected_note,
            detected.note_name,
            if is_correct { "correct" } else { "wrong" }
        );

        session.results.push(result.clone());
        session.current_index += 1;
        if session.current_index == session.melody.len() {
            self.finish();
        }
        Some(result)
    }

    fn finish(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.is_active = false;
            let result =
                PerformanceResult::from_results(session.results.clone(), session.melody.len());
            info!(
                "performance complete: {}/{} correct ({}%)",
                result.correct_count,
                session.melody.len(),
                result.total_score_percent
            );
            self.result = Some(result);
        }
    }

    pub fn result(&self) -> Option<&PerformanceResult> {
        self.result.as_ref()
    }

    pub fn state(&self) -> PerformanceState {
        match &self.session {
            Some(s) => PerformanceState {
                status: self.status(),
                current_index: s.current_index,
                total_notes: s.melody.len(),
                expected_note: if s.is_active {
                    s.melody.get(s.current_index).map(|n| n.note_name.clone())
                } else {
                    None
                },
                results: s.results.clone(),
            },
            None => PerformanceState {
                status: PerformanceStatus::Idle,
                current_index: 0,
                total_notes: 0,
                expected_note: None,
                results: Vec::new(),
            },
        }
    }
}
