//! The per-frame pitch pipeline.
//!
//! Frames arrive from a poll timer. Everything except neural inference runs
//! synchronously inside `process_frame`. Inference runs elsewhere and comes back
//! through `complete_inference`; at most one request is outstanding, and each is
//! tagged with the listening generation so results from a stopped session are
//! dropped.

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, EstimatorStrategy};
use crate::detection::noise_floor::NoiseFloor;
use crate::detection::onset::{OnsetDetector, OnsetKind, OnsetState};
use crate::detection::stability::{StabilityGate, StablePitch};
use crate::error::{CaptureError, EngineError};
use crate::pitch::neural::{decode_activations, prepare_window, ModelState, NeuralEstimator};
use crate::pitch::octave::correct_octave;
use crate::pitch::smoother::PitchSmoother;
use crate::pitch::yin::YinDetector;
use crate::pitch::{frame_rms, PitchEstimate};
use crate::scoring::grader::Grader;
use crate::scoring::types::{NoteResult, PerformanceResult, PerformanceState};

/// An unanswered inference request is given up after this long, freeing the slot.
pub const INFERENCE_TIMEOUT_MS: f64 = 1000.0;

/// Raw audio handed over by the capture side.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// One analysis cycle's input.
#[derive(Clone, Debug)]
pub struct PitchFrame {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at_ms: f64,
}

/// Where frames come from. Capture itself lives outside this crate.
pub trait FrameSource {
    /// Open the device. Called once per listening session.
    fn start(&mut self) -> Result<(), CaptureError> {
        Ok(())
    }

    /// Latest frame, or `None` if nothing new is ready.
    fn get_frame(&mut self) -> Option<AudioFrame>;

    /// Running RMS volume of the input.
    fn get_volume(&self) -> f32;
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct InferenceTag {
    pub generation: u64,
    pub sequence: u64,
}

/// Model input the caller should run and hand back to `complete_inference`.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    pub tag: InferenceTag,
    pub window: Vec<f32>,
}

struct PendingInference {
    tag: InferenceTag,
    yin: Option<PitchEstimate>,
    volume: f32,
    threshold: f32,
    captured_at_ms: f64,
    /// Silence arrived after this frame; its result no longer applies.
    stale: bool,
}

/// What one frame (or one completed inference) produced.
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub volume: f32,
    pub silence_threshold: f32,
    pub is_silent: bool,
    pub pitch: Option<StablePitch>,
    pub onset: Option<OnsetKind>,
    pub inference_request: Option<InferenceRequest>,
    pub graded: Option<NoteResult>,
}

/// Drops a repeat of the previous onset's note that arrives within the debounce window.
struct OnsetDebounce {
    window_ms: f64,
    last: Option<(String, f64)>,
}

impl OnsetDebounce {
    fn accept(&mut self, pitch: &StablePitch) -> bool {
        if let Some((note, at)) = &self.last {
            if *note == pitch.note_name && pitch.timestamp_ms - at < self.window_ms {
                debug!("duplicate onset {} debounced", note);
                return false;
            }
        }
        self.last = Some((pitch.note_name.clone(), pitch.timestamp_ms));
        true
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

pub struct PitchEngine {
    config: EngineConfig,
    yin: YinDetector,
    neural: NeuralEstimator,
    smoother: PitchSmoother,
    noise_floor: NoiseFloor,
    stability: StabilityGate,
    onset: OnsetDetector,
    debounce: OnsetDebounce,
    grader: Grader,
    listening: bool,
    generation: u64,
    next_sequence: u64,
    in_flight: Option<PendingInference>,
}

impl PitchEngine {
    pub fn new(config: EngineConfig) -> Self {
        PitchEngine {
            yin: YinDetector::new(config.yin_threshold, config.preset.frequency_range),
            neural: NeuralEstimator::new(),
            smoother: PitchSmoother::new(),
            noise_floor: NoiseFloor::new(&config),
            stability: StabilityGate::new(&config),
            onset: OnsetDetector::new(&config),
            debounce: OnsetDebounce {
                window_ms: config.duplicate_debounce_ms,
                last: None,
            },
            grader: Grader::new(config.match_tolerance_cents),
            listening: false,
            generation: 0,
            next_sequence: 0,
            in_flight: None,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Swap in a new configuration, e.g. after an instrument change.
    /// The model state and any grading session survive.
    pub fn reconfigure(&mut self, config: EngineConfig) -> Result<(), EngineError> {
        if self.listening {
            return Err(EngineError::ConfigLocked);
        }
        self.yin = YinDetector::new(config.yin_threshold, config.preset.frequency_range);
        self.noise_floor = NoiseFloor::new(&config);
        self.stability = StabilityGate::new(&config);
        self.onset = OnsetDetector::new(&config);
        self.debounce = OnsetDebounce {
            window_ms: config.duplicate_debounce_ms,
            last: None,
        };
        self.grader.set_tolerance_cents(config.match_tolerance_cents);
        self.smoother.reset();
        info!("engine configured for {:?} ({:?})", config.instrument, config.strategy);
        self.config = config;
        Ok(())
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    /// Open `source` and start listening. Capture failures end the attempt.
    pub fn start_capture<S: FrameSource>(&mut self, source: &mut S) -> Result<(), EngineError> {
        source.start()?;
        self.start_listening();
        Ok(())
    }

    pub fn start_listening(&mut self) {
        if self.listening {
            return;
        }
        self.reset_detection();
        self.listening = true;
        info!("listening started (generation {})", self.generation);
    }

    pub fn stop_listening(&mut self) {
        if self.listening {
            info!("listening stopped");
        }
        self.listening = false;
        self.reset_detection();
    }

    /// Clear all per-session detection state and orphan any outstanding inference.
    fn reset_detection(&mut self) {
        self.noise_floor.reset();
        self.onset.reset();
        self.smoother.reset();
        self.stability.reset();
        self.debounce.reset();
        if self.in_flight.take().is_some() {
            debug!("discarding in-flight inference");
        }
        self.generation += 1;
    }

    pub fn onset_state(&self) -> &OnsetState {
        self.onset.state()
    }

    pub fn noise_floor(&self) -> &NoiseFloor {
        &self.noise_floor
    }

    pub fn model_state(&self) -> ModelState {
        self.neural.state()
    }

    /// True if the caller should load the model now. At most once per engine.
    pub fn begin_model_load(&mut self) -> bool {
        if self.config.strategy == EstimatorStrategy::YinOnly {
            return false;
        }
        self.neural.begin_load()
    }

    pub fn finish_model_load(&mut self, success: bool) {
        self.neural.finish_load(success);
    }

    pub fn start_performance(&mut self, melody: &[String]) -> Result<(), EngineError> {
        self.grader.start_performance(melody)?;
        self.debounce.reset();
        Ok(())
    }

    pub fn stop_performance(&mut self) -> Option<PerformanceResult> {
        let result = self.grader.stop_performance();
        self.reset_detection();
        result
    }

    pub fn performance_state(&self) -> PerformanceState {
        self.grader.state()
    }

    pub fn performance_result(&self) -> Option<&PerformanceResult> {
        self.grader.result()
    }

    /// Pull the latest frame from `source` and run it. No frame is a quiet no-op.
    pub fn tick<S: FrameSource>(&mut self, source: &mut S, now_ms: f64) -> TickOutcome {
        if !self.listening {
            return TickOutcome::default();
        }
        match source.get_frame() {
            Some(audio) => {
                let frame = PitchFrame {
                    samples: audio.samples,
                    sample_rate: audio.sample_rate,
                    captured_at_ms: now_ms,
                };
                self.process_frame(&frame, source.get_volume())
            }
            None => TickOutcome {
                is_silent: self.onset.is_silent(),
                silence_threshold: self.noise_floor.silence_threshold(),
                ..TickOutcome::default()
            },
        }
    }

    pub fn process_frame(&mut self, frame: &PitchFrame, volume: f32) -> TickOutcome {
        if !self.listening {
            return TickOutcome::default();
        }
        let now_ms = frame.captured_at_ms;
        let volume = if volume.is_finite() && volume >= 0.0 {
            volume
        } else {
            frame_rms(&frame.samples)
        };

        self.noise_floor.update(volume);
        let threshold = self.noise_floor.silence_threshold();

        if volume < threshold {
            self.smoother.reset();
            self.stability.reset();
            if let Some(pending) = self.in_flight.as_mut() {
                pending.stale = true;
            }
            self.onset.update(volume, threshold, None, now_ms);
            return TickOutcome {
                volume,
                silence_threshold: threshold,
                is_silent: true,
                ..TickOutcome::default()
            };
        }

        let yin = self.yin.detect(&frame.samples, frame.sample_rate as f32);

        if self.config.strategy == EstimatorStrategy::NeuralWithFallback && self.neural.is_ready() {
            let mut outcome = TickOutcome {
                volume,
                silence_threshold: threshold,
                is_silent: self.onset.is_silent(),
                ..TickOutcome::default()
            };
            let expired = self
                .in_flight
                .as_ref()
                .map(|p| now_ms - p.captured_at_ms >= INFERENCE_TIMEOUT_MS);
            match expired {
                Some(false) => {
                    trace!("inference still running, dropping frame at {:.0} ms", now_ms);
                    return outcome;
                }
                Some(true) => {
                    warn!("inference timed out after {} ms, releasing the slot", INFERENCE_TIMEOUT_MS);
                    self.in_flight = None;
                }
                None => {}
            }
            let tag = InferenceTag {
                generation: self.generation,
                sequence: self.next_sequence,
            };
            self.next_sequence += 1;
            self.in_flight = Some(PendingInference {
                tag,
                yin,
                volume,
                threshold,
                captured_at_ms: now_ms,
                stale: false,
            });
            outcome.inference_request = Some(InferenceRequest {
                tag,
                window: prepare_window(&frame.samples, frame.sample_rate as f32),
            });
            return outcome;
        }

        self.finish_frame(yin, volume, threshold, now_ms)
    }

    /// Give up on a request whose inference failed. False if `tag` is not the outstanding one.
    pub fn abandon_inference(&mut self, tag: InferenceTag) -> bool {
        if self.in_flight.as_ref().map(|p| p.tag) != Some(tag) {
            return false;
        }
        debug!("inference {:?} abandoned", tag);
        self.in_flight = None;
        true
    }

    /// Hand back the model's activations for an earlier `InferenceRequest`.
    pub fn complete_inference(
        &mut self,
        tag: InferenceTag,
        activations: &[f32],
    ) -> Result<TickOutcome, EngineError> {
        if tag.generation != self.generation {
            debug!("dropping inference result from generation {}", tag.generation);
            return Ok(TickOutcome::default());
        }
        let pending = match self.in_flight.take() {
            Some(p) if p.tag == tag => p,
            other => {
                debug!("dropping unexpected inference result {:?}", tag);
                self.in_flight = other;
                return Ok(TickOutcome::default());
            }
        };
        if pending.stale || !self.listening {
            debug!("dropping stale inference result {:?}", tag);
            return Ok(TickOutcome::default());
        }

        let estimate = decode_activations(activations, self.config.preset.frequency_range)?
            .map(|neural| correct_octave(neural, pending.yin).0);
        Ok(self.finish_frame(estimate, pending.volume, pending.threshold, pending.captured_at_ms))
    }

    fn finish_frame(
        &mut self,
        estimate: Option<PitchEstimate>,
        volume: f32,
        threshold: f32,
        now_ms: f64,
    ) -> TickOutcome {
        let estimate = match estimate {
            Some(e) if self.config.smoothing => Some(PitchEstimate {
                frequency_hz: self.smoother.update(e.frequency_hz, e.confidence),
                ..e
            }),
            other => other,
        };

        let stable = self.stability.push(estimate, now_ms);
        let mut onset = self.onset.update(volume, threshold, stable.as_ref(), now_ms);

        let mut outcome = TickOutcome {
            volume,
            silence_threshold: threshold,
            is_silent: self.onset.is_silent(),
            ..TickOutcome::default()
        };

        if let Some(mut pitch) = stable {
            if onset.is_some() && self.debounce.accept(&pitch) {
                pitch.is_onset = true;
                debug!("{:?} onset: {} at {:.0} ms", onset, pitch.note_name, now_ms);
                if self.grader.is_active() {
                    outcome.graded = self.grader.process_detection(&pitch);
                }
            } else {
                onset = None;
            }
            outcome.pitch = Some(pitch);
        }
        outcome.onset = onset;
        outcome
    }
}
