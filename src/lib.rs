use wasm_bindgen::prelude::*;

pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod notes;
pub mod pitch;
pub mod scoring;

use config::{EngineConfig, EstimatorStrategy, FrequencyRange, Instrument, InstrumentPreset};
use engine::{InferenceTag, PitchEngine, PitchFrame};
use serde::Serialize;

use std::cell::RefCell;

thread_local! {
    static ENGINE: RefCell<PitchEngine> = RefCell::new(PitchEngine::new(EngineConfig::default()));
    static DETECTOR: RefCell<Option<pitch::yin::YinDetector>> = RefCell::new(None);
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Warn).ok();
}

fn with_engine<R>(f: impl FnOnce(&mut PitchEngine) -> R) -> R {
    ENGINE.with(|cell| f(&mut cell.borrow_mut()))
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value).map_err(|e| JsValue::from_str(&e.to_string()))
}

fn js_err(e: error::EngineError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// Configure the engine for an instrument (`keyboard`, `guitar`, `bass`) and a
/// strategy (`yin` or `neural`). Fails while listening.
#[wasm_bindgen]
pub fn init_engine(instrument: &str, strategy: &str) -> Result<(), JsValue> {
    let instrument: Instrument = instrument.parse().map_err(js_err)?;
    let strategy: EstimatorStrategy = strategy.parse().map_err(js_err)?;
    with_engine(|engine| engine.reconfigure(EngineConfig::new(instrument, strategy))).map_err(js_err)
}

/// Replace the whole configuration, e.g. one read back from `engine_config` and tweaked.
#[wasm_bindgen]
pub fn configure_engine(config_js: JsValue) -> Result<(), JsValue> {
    let config: EngineConfig =
        serde_wasm_bindgen::from_value(config_js).map_err(|e| JsValue::from_str(&e.to_string()))?;
    with_engine(|engine| engine.reconfigure(config)).map_err(js_err)
}

#[wasm_bindgen]
pub fn engine_config() -> Result<JsValue, JsValue> {
    with_engine(|engine| to_js(engine.config()))
}

/// The tuning preset for an instrument, for UIs that show or edit it.
#[wasm_bindgen]
pub fn instrument_preset(instrument: &str) -> Result<JsValue, JsValue> {
    let instrument: Instrument = instrument.parse().map_err(js_err)?;
    to_js(&InstrumentPreset::for_instrument(instrument))
}

#[wasm_bindgen]
pub fn start_listening() {
    with_engine(|engine| engine.start_listening());
}

#[wasm_bindgen]
pub fn stop_listening() {
    with_engine(|engine| engine.stop_listening());
}

/// True if the caller should fetch and load the model now.
#[wasm_bindgen]
pub fn begin_model_load() -> bool {
    with_engine(|engine| engine.begin_model_load())
}

#[wasm_bindgen]
pub fn finish_model_load(ok: bool) {
    with_engine(|engine| engine.finish_model_load(ok));
}

#[wasm_bindgen]
pub fn model_state() -> Result<JsValue, JsValue> {
    with_engine(|engine| to_js(&engine.model_state()))
}

/// Run one frame through the pipeline. Pass a negative `volume` to have it
/// computed from `samples`. Returns a `TickOutcome`.
#[wasm_bindgen]
pub fn process_frame(
    samples: &[f32],
    sample_rate: u32,
    volume: f32,
    now_ms: f64,
) -> Result<JsValue, JsValue> {
    let frame = PitchFrame {
        samples: samples.to_vec(),
        sample_rate,
        captured_at_ms: now_ms,
    };
    let outcome = with_engine(|engine| engine.process_frame(&frame, volume));
    to_js(&outcome)
}

/// Release the request tagged `generation`/`sequence` after its inference failed.
#[wasm_bindgen]
pub fn abandon_inference(generation: f64, sequence: f64) -> bool {
    let tag = InferenceTag {
        generation: generation as u64,
        sequence: sequence as u64,
    };
    with_engine(|engine| engine.abandon_inference(tag))
}

/// Feed back the activations for the request tagged `generation`/`sequence`.
#[wasm_bindgen]
pub fn complete_inference(
    generation: f64,
    sequence: f64,
    activations: &[f32],
) -> Result<JsValue, JsValue> {
    let tag = InferenceTag {
        generation: generation as u64,
        sequence: sequence as u64,
    };
    let outcome = with_engine(|engine| engine.complete_inference(tag, activations)).map_err(js_err)?;
    to_js(&outcome)
}

/// Start grading against a list of note names such as `["C4", "E4", "G4"]`.
#[wasm_bindgen]
pub fn start_performance(melody_js: JsValue) -> Result<(), JsValue> {
    let melody: Vec<String> =
        serde_wasm_bindgen::from_value(melody_js).map_err(|e| JsValue::from_str(&e.to_string()))?;
    with_engine(|engine| engine.start_performance(&melody)).map_err(js_err)
}

#[wasm_bindgen]
pub fn stop_performance() -> Result<JsValue, JsValue> {
    let result = with_engine(|engine| engine.stop_performance());
    to_js(&result)
}

#[wasm_bindgen]
pub fn performance_state() -> Result<JsValue, JsValue> {
    with_engine(|engine| to_js(&engine.performance_state()))
}

#[wasm_bindgen]
pub fn performance_result() -> Result<JsValue, JsValue> {
    with_engine(|engine| to_js(&engine.performance_result()))
}

/// Stateless YIN detection returning Float64Array [hz, confidence, midi_float].
/// Zeros when no pitch is found. Reuses a thread-local detector's buffers.
#[wasm_bindgen]
pub fn detect_pitch(samples: &[f32], sample_rate: f32) -> js_sys::Float64Array {
    let estimate = DETECTOR.with(|cell| {
        let mut borrow = cell.borrow_mut();
        let detector = borrow.get_or_insert_with(|| {
            pitch::yin::YinDetector::new(
                pitch::yin::DEFAULT_YIN_THRESHOLD,
                FrequencyRange {
                    min: 30.0,
                    max: 2100.0,
                },
            )
        });
        detector.detect(samples, sample_rate)
    });

    let arr = js_sys::Float64Array::new_with_length(3);
    if let Some(e) = estimate {
        arr.set_index(0, e.frequency_hz as f64);
        arr.set_index(1, e.confidence as f64);
        arr.set_index(2, e.midi_float() as f64);
    }
    arr
}
