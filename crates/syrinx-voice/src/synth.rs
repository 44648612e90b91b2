//! Egress synthesizer: reply text → µ-law audio frames on the caller
//! socket.
//!
//! Replies (and filler words) arrive on the response channel in FIFO
//! order. The voice id picks the vendor; audio streams back in chunks,
//! each written as a media frame followed by a uniquely-named mark.
//! Before every write the user-speaking flag is checked; a barge-in in
//! flight drops the buffer instead of racing the clear. An empty reply
//! (generation failure) writes a bare mark so the peer's echo still
//! returns the floor to the caller.

use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use syrinx_core::{Agent, Config};

use crate::error::{VoiceError, VoiceResult};
use crate::state::CallShared;
use crate::voices;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io/v1";
const ELEVENLABS_MODEL: &str = "eleven_turbo_v2_5";
const CARTESIA_TTS_URL: &str = "https://api.cartesia.ai/tts/bytes";
const CARTESIA_MODEL_ENGLISH: &str = "sonic-english";
const CARTESIA_MODEL_MULTILINGUAL: &str = "sonic-multilingual";
const DEFAULT_VOICE_OPTIMIZATION: u32 = 3;

pub type AudioStream = Pin<Box<dyn Stream<Item = VoiceResult<Vec<u8>>> + Send>>;

/// What to synthesize and how.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice_id: String,
    pub language: String,
    /// Vendor latency optimization 0-4.
    pub optimization: u32,
}

/// One synthesis vendor. Returns µ-law/8 kHz bytes, chunked.
#[async_trait]
pub trait SpeechVendor: Send + Sync {
    async fn stream(&self, request: &SpeechRequest) -> VoiceResult<AudioStream>;
}

/// ElevenLabs streaming synthesis, µ-law output.
pub struct ElevenLabsSpeech {
    api_key: String,
    client: reqwest::Client,
}

impl ElevenLabsSpeech {
    pub fn new(cfg: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { api_key: cfg.elevenlabs_api_key.clone(), client }
    }
}

#[async_trait]
impl SpeechVendor for ElevenLabsSpeech {
    async fn stream(&self, request: &SpeechRequest) -> VoiceResult<AudioStream> {
        let voice = voices::elevenlabs_voice(&request.voice_id)
            .ok_or_else(|| VoiceError::Synth(format!("unknown voice id {}", request.voice_id)))?;
        let url = format!(
            "{ELEVENLABS_API_BASE}/text-to-speech/{voice}/stream\
             ?output_format=ulaw_8000&optimize_streaming_latency={}",
            request.optimization
        );
        let res = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({
                "text": request.text,
                "model_id": ELEVENLABS_MODEL,
            }))
            .send()
            .await
            .map_err(|e| VoiceError::Synth(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Synth(format!(
                "synthesis request failed: {}",
                res.status()
            )));
        }
        let stream = res
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(VoiceError::Synth(e.to_string())),
            })
            .boxed();
        Ok(stream)
    }
}

/// Cartesia raw-bytes synthesis, `pcm_mulaw` at 8 kHz.
pub struct CartesiaSpeech {
    api_key: String,
    version: String,
    client: reqwest::Client,
}

impl CartesiaSpeech {
    pub fn new(cfg: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: cfg.cartesia_api_key.clone(),
            version: cfg.cartesia_version.clone(),
            client,
        }
    }
}

#[async_trait]
impl SpeechVendor for CartesiaSpeech {
    async fn stream(&self, request: &SpeechRequest) -> VoiceResult<AudioStream> {
        let voice = voices::cartesia_voice(&request.voice_id)
            .ok_or_else(|| VoiceError::Synth(format!("unknown voice id {}", request.voice_id)))?;

        let english = request.language.is_empty() || request.language == "en-US";
        let (model_id, language) = if english {
            (CARTESIA_MODEL_ENGLISH, "en")
        } else {
            (
                CARTESIA_MODEL_MULTILINGUAL,
                voices::cartesia_language(&request.language),
            )
        };

        let res = self
            .client
            .post(CARTESIA_TTS_URL)
            .header("X-API-Key", &self.api_key)
            .header("Cartesia-Version", &self.version)
            .json(&serde_json::json!({
                "model_id": model_id,
                "transcript": request.text,
                "voice": {"mode": "id", "id": voice},
                "output_format": {
                    "container": "raw",
                    "encoding": "pcm_mulaw",
                    "sample_rate": 8000,
                },
                "language": language,
            }))
            .send()
            .await
            .map_err(|e| VoiceError::Synth(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Synth(format!(
                "synthesis request failed: {}",
                res.status()
            )));
        }
        let stream = res
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(VoiceError::Synth(e.to_string())),
            })
            .boxed();
        Ok(stream)
    }
}

pub(crate) struct SynthDeps {
    pub elevenlabs: Arc<dyn SpeechVendor>,
    pub cartesia: Arc<dyn SpeechVendor>,
}

pub(crate) async fn run(
    shared: Arc<CallShared>,
    agent: Agent,
    deps: SynthDeps,
    mut response_rx: mpsc::UnboundedReceiver<String>,
) {
    let optimization = if agent.voice_optimization == 0 {
        DEFAULT_VOICE_OPTIMIZATION
    } else {
        agent.voice_optimization
    };

    while let Some(response) = response_rx.recv().await {
        if shared.is_done() {
            break;
        }

        if response.trim().is_empty() {
            // No-op turn: a bare mark gives the peer something to echo so
            // the floor still returns to the caller.
            let mut outbound = shared.outbound.lock().await;
            if let Err(e) = outbound.write_empty_mark().await {
                error!("error writing mark frame: {e}");
            }
            continue;
        }

        let vendor: &Arc<dyn SpeechVendor> = if voices::is_elevenlabs(&agent.voice_id) {
            &deps.elevenlabs
        } else if voices::is_cartesia(&agent.voice_id) {
            &deps.cartesia
        } else {
            error!(voice_id = %agent.voice_id, "unknown voice service for voice id");
            continue;
        };

        let request = SpeechRequest {
            text: response,
            voice_id: agent.voice_id.clone(),
            language: agent.language.clone(),
            optimization,
        };

        let mut stream = match vendor.stream(&request).await {
            Ok(s) => s,
            Err(e) => {
                error!("error streaming speech: {e}");
                // Same recovery as an empty reply.
                let mut outbound = shared.outbound.lock().await;
                if let Err(e) = outbound.write_empty_mark().await {
                    error!("error writing mark frame: {e}");
                }
                continue;
            }
        };

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    error!("error reading synthesis stream: {e}");
                    break;
                }
            };
            if chunk.is_empty() {
                continue;
            }
            write_audio(&shared, &chunk).await;
        }
    }
    debug!("synthesizer ended");
}

/// Write one chunk under the outbound lock, unless a barge-in is in
/// flight. The first write of a turn closes the latency sample.
async fn write_audio(shared: &CallShared, chunk: &[u8]) {
    if shared.user_speaking.load(Ordering::SeqCst) {
        return;
    }
    shared.metrics.lock().unwrap().stop_processing();
    let mut outbound = shared.outbound.lock().await;
    if let Err(e) = outbound.write_audio(chunk).await {
        error!("error writing media frame: {e}");
    }
}
