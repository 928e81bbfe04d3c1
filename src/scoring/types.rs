use serde::{Deserialize, Serialize};

pub const PASS_PERCENT: f64 = 60.0;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedNote {
    pub note_name: String,
    pub index: usize,
    pub midi: i32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteResult {
    pub expected_note: String,
    pub note_index: usize,
    pub played_note: Option<String>,
    pub played_frequency_hz: Option<f32>,
    pub is_correct: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PerformanceStatus {
    Idle,
    Active,
    Complete,
}

/// Snapshot of the grading session for the UI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceState {
    pub status: PerformanceStatus,
    pub current_index: usize,
    pub total_notes: usize,
    pub expected_note: Option<String>,
    pub results: Vec<NoteResult>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceResult {
    pub results: Vec<NoteResult>,
    pub correct_count: u32,
    /// Expected notes not played correctly, including ones never reached.
    pub miss_count: u32,
    pub total_score_percent: f64,
    pub stars: u8,
    pub passed: bool,
}

impl PerformanceResult {
    pub fn from_results(results: Vec<NoteResult>, total_notes: usize) -> Self {
        let correct_count = results.iter().filter(|r| r.is_correct).count() as u32;
        let miss_count = (total_notes as u32).saturating_sub(correct_count);
        let total_score_percent = if total_notes > 0 {
            (correct_count as f64 / total_notes as f64 * 100.0).round()
        } else {
            0.0
        };
        let stars = if total_score_percent >= 90.0 {
            3
        } else if total_score_percent >= 70.0 {
            2
        } else {
            1
        };

        PerformanceResult {
            results,
            correct_count,
            miss_count,
            total_score_percent,
            stars,
            passed: total_score_percent >= PASS_PERCENT,
        }
    }
}
