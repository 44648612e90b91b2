//! Streaming ASR adapter (Deepgram live websocket).
//!
//! Forwards every inbound media chunk and turns the recognizer's interim
//! and final hypotheses into floor-change signals:
//!
//! - a **final** stamps metrics/timestamps, fires barge-in, and pushes
//!   the text to the turn engine unless the assistant holds the floor;
//! - an **interim** more than two seconds after the last finalization is
//!   the start of a new user turn: the floor flips to the user and
//!   barge-in fires. The two-second gate suppresses the interim the
//!   recognizer sometimes emits immediately before the matching final.
//!
//! Transient recognizer errors are logged and skipped; failing to open
//! the connection at all is fatal to the call.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

use syrinx_core::{languages, Agent};

use crate::state::{CallShared, Turn};

const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";
const DEFAULT_ENDPOINTING_MS: u32 = 100;
const INTERIM_TURN_GATE: Duration = Duration::from_secs(2);
const INTERIM_CONFIDENCE_FLOOR: f64 = 0.5;

/// Where recognizer signals land: transcripts for the turn engine,
/// collapsing interruptions for the barge-in controller.
pub struct AsrSignals {
    pub transcriptions_tx: mpsc::UnboundedSender<String>,
    pub interruption_tx: mpsc::Sender<()>,
}

/// A final hypothesis with positive confidence.
pub fn handle_final(shared: &CallShared, transcript: &str, signals: &AsrSignals) {
    info!(transcript, "final transcript");
    shared.user_speaking.store(false, Ordering::SeqCst);
    let _ = signals.interruption_tx.try_send(());
    shared.metrics.lock().unwrap().start_processing();
    shared.touch_user_spoke();
    shared.touch_finalized();
    if shared.turn.get() != Turn::Assistant {
        let _ = signals.transcriptions_tx.send(transcript.to_string());
    }
}

/// A confident interim hypothesis. Only treated as the start of a new
/// user turn when well clear of the last finalization.
pub fn handle_interim(shared: &CallShared, signals: &AsrSignals) {
    let since_final = shared.last_finalized.lock().unwrap().elapsed();
    if since_final > INTERIM_TURN_GATE {
        shared.user_speaking.store(true, Ordering::SeqCst);
        let _ = signals.interruption_tx.try_send(());
        shared.touch_user_spoke();
        shared.turn.set(Turn::User);
    }
}

/// Seam over the recognizer session so calls can run against a scripted
/// transcriber in tests.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn run(
        &self,
        shared: Arc<CallShared>,
        agent: Agent,
        audio_rx: mpsc::UnboundedReceiver<String>,
        signals: AsrSignals,
    );
}

#[derive(Debug, Deserialize)]
struct LiveResult {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    channel: Channel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Deserialize, Default)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize, Default)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// Recognizer session parameters derived from the agent.
pub(crate) fn listen_url(agent: &Agent) -> String {
    let endpointing = if agent.endpointing == 0 {
        DEFAULT_ENDPOINTING_MS
    } else {
        agent.endpointing
    };
    let language = languages::asr_language(&agent.language);
    format!(
        "{DEEPGRAM_LISTEN_URL}?model=nova-2&language={language}&punctuate=true\
         &encoding=mulaw&channels=1&sample_rate=8000&interim_results=true\
         &vad_events=true&endpointing={endpointing}"
    )
}

/// Production transcriber over the Deepgram live endpoint.
pub struct DeepgramTranscriber;

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn run(
        &self,
        shared: Arc<CallShared>,
        agent: Agent,
        mut audio_rx: mpsc::UnboundedReceiver<String>,
        signals: AsrSignals,
    ) {
        let url = listen_url(&agent);
        let mut request = match url.clone().into_client_request() {
            Ok(r) => r,
            Err(e) => {
                error!("invalid recognizer url: {e}");
                shared.shutdown();
                return;
            }
        };
        let auth = format!("Token {}", shared.cfg.deepgram_api_key);
        match auth.parse() {
            Ok(value) => {
                request.headers_mut().insert("Authorization", value);
            }
            Err(e) => {
                error!("invalid recognizer credentials: {e}");
                shared.shutdown();
                return;
            }
        }

        let (ws, _) = match connect_async(request).await {
            Ok(conn) => conn,
            Err(e) => {
                // Without transcription there is no conversation to run.
                error!("recognizer connection failed: {e}");
                shared.shutdown();
                return;
            }
        };
        info!("recognizer session open");
        let (mut ws_tx, mut ws_rx) = ws.split();

        // Forward caller audio as raw µ-law bytes.
        let forward_shared = Arc::clone(&shared);
        let forward = tokio::spawn(async move {
            while let Some(payload) = audio_rx.recv().await {
                if forward_shared.is_done() {
                    break;
                }
                let chunk = match BASE64.decode(&payload) {
                    Ok(c) => c,
                    Err(e) => {
                        error!("error decoding media payload: {e}");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Binary(chunk.into())).await {
                    error!("error writing to recognizer: {e}");
                    continue;
                }
            }
        });

        while let Some(message) = ws_rx.next().await {
            if shared.is_done() {
                break;
            }
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    error!("recognizer read error: {e}");
                    continue;
                }
            };
            let text = match message {
                Message::Text(t) => t.to_string(),
                Message::Close(_) => {
                    warn!("recognizer closed the session");
                    break;
                }
                _ => continue,
            };

            let result: LiveResult = match serde_json::from_str(&text) {
                Ok(r) => r,
                Err(e) => {
                    debug!("ignoring non-result recognizer message: {e}");
                    continue;
                }
            };
            if !result.kind.is_empty() && result.kind != "Results" {
                continue;
            }
            let Some(alternative) = result.channel.alternatives.first() else {
                continue;
            };
            if alternative.transcript.is_empty() {
                continue;
            }

            if result.is_final && alternative.confidence > 0.0 {
                handle_final(&shared, &alternative.transcript, &signals);
            } else if !result.is_final && alternative.confidence > INTERIM_CONFIDENCE_FLOOR {
                handle_interim(&shared, &signals);
            }
        }

        forward.abort();
        debug!("recognizer session ended");
    }
}
