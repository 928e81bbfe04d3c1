/// Failures reported by the audio capture side when a listening session starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CaptureError {
    #[error("No audio input device available")]
    NoDevice,

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio capture failed: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Cannot grade against an empty melody")]
    EmptyMelody,

    #[error("A performance is already active")]
    PerformanceActive,

    #[error("Invalid note name: {0}")]
    InvalidNote(String),

    #[error("Configuration cannot change while listening")]
    ConfigLocked,

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Unknown estimator strategy: {0}")]
    UnknownStrategy(String),

    #[error("Expected {expected} activations, got {got}")]
    ActivationLength { expected: usize, got: usize },
}
