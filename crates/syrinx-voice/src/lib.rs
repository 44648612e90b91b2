//! # Syrinx Voice: the per-call orchestrator
//!
//! Turns one duplex telephony media socket into a two-party spoken
//! dialogue. Each call runs as a set of cooperating tasks wired by typed
//! channels:
//!
//! ```text
//! caller ──> Ingress ──┬──> ASR adapter ──> Turn engine ──> Generation
//!                      └──> VAD side channel         │
//!        <── Egress synthesis <── response channel <─┘
//!        <── Barge-in (clear) <── interruption channel
//! ```
//!
//! The floor is tracked by a turn flag; outbound audio is chunked with
//! mark checkpoints the peer echoes on playback, and the turn returns to
//! the caller exactly when the outstanding-mark set drains or a barge-in
//! empties it.

pub mod actions;
pub mod asr;
pub mod audio;
pub mod bargein;
pub mod context;
pub mod endpointing;
pub mod engine;
pub mod error;
pub mod ingress;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod state;
pub mod synth;
pub mod timeout;
pub mod transport;
pub mod twilio;
pub mod vad;
pub mod voices;

pub use asr::{AsrSignals, DeepgramTranscriber, Transcriber};
pub use error::{VoiceError, VoiceResult};
pub use orchestrator::{Backends, CallOrchestrator};
pub use provider::{ProviderCall, ProviderControl, TwilioRest};
pub use state::{CallShared, Turn, TurnFlag};
pub use synth::{AudioStream, CartesiaSpeech, ElevenLabsSpeech, SpeechRequest, SpeechVendor};
pub use transport::{FrameSink, FrameSource, InboundFrame, Outbound};
pub use twilio::{MarkFrame, MediaFormat, MediaFrame, StartFrame, TwilioMessage};
