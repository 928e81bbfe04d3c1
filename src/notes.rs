use crate::error::EngineError;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const A4_HZ: f64 = 440.0;
const A4_MIDI: f64 = 69.0;

pub fn midi_from_pitch(step: char, alter: i32, octave: i32) -> Option<i32> {
    let base = match step.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    Some((octave + 1) * 12 + base + alter)
}

/// Parse a note name like "C4", "F#3" or "Bb2" into a MIDI number.
/// A name without an octave ("E", "G#") is taken to be in octave 4.
pub fn note_to_midi(name: &str) -> Result<i32, EngineError> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let step = chars
        .next()
        .ok_or_else(|| EngineError::InvalidNote(name.to_string()))?;
    let rest = chars.as_str();

    let (alter, octave_str) = if let Some(r) = rest.strip_prefix('#') {
        (1, r)
    } else if let Some(r) = rest.strip_prefix('b') {
        (-1, r)
    } else {
        (0, rest)
    };

    let octave: i32 = if octave_str.is_empty() {
        4
    } else {
        octave_str
            .parse()
            .map_err(|_| EngineError::InvalidNote(name.to_string()))?
    };

    midi_from_pitch(step, alter, octave).ok_or_else(|| EngineError::InvalidNote(name.to_string()))
}

pub fn midi_to_note_name(midi: i32) -> String {
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}

/// Pitch class (0 = C .. 11 = B) of a note name, ignoring its octave.
pub fn pitch_class(name: &str) -> Option<u8> {
    note_to_midi(name).ok().map(|m| m.rem_euclid(12) as u8)
}

pub fn frequency_to_midi(freq_hz: f64) -> f64 {
    A4_MIDI + 12.0 * (freq_hz / A4_HZ).log2()
}

pub fn midi_to_frequency(midi: f64) -> f64 {
    A4_HZ * 2f64.powf((midi - A4_MIDI) / 12.0)
}

/// Signed distance in cents from `reference_hz` to `freq_hz`.
pub fn cents_between(freq_hz: f64, reference_hz: f64) -> f64 {
    1200.0 * (freq_hz / reference_hz).log2()
}

/// Cents distance with whole octaves removed, in [-600, 600].
pub fn octave_folded_cents(freq_hz: f64, reference_hz: f64) -> f64 {
    let cents = cents_between(freq_hz, reference_hz);
    cents - 1200.0 * (cents / 1200.0).round()
}

/// Nearest equal-tempered note for a frequency and the deviation from it in cents.
pub fn describe_frequency(freq_hz: f64) -> (String, f64) {
    let midi_float = frequency_to_midi(freq_hz);
    let nearest = midi_float.round();
    (midi_to_note_name(nearest as i32), (midi_float - nearest) * 100.0)
}
