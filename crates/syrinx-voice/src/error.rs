//! Error types for the per-call orchestrator.

use thiserror::Error;

/// Result type alias for call operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors inside one call. Per the propagation policy, none of these
/// cross call boundaries: tasks log, skip the failed operation, and the
/// session continues or shuts down cleanly.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("transcription error: {0}")]
    Asr(String),

    #[error("synthesis error: {0}")]
    Synth(String),

    #[error("telephony provider error: {0}")]
    Provider(String),

    #[error("frame parse error: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("payload decode error: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error(transparent)]
    Core(#[from] syrinx_core::CoreError),
}
