//! The per-call supervisor.
//!
//! Owns every task of one call: ingress demux, the VAD side channel, the
//! recognizer session, the turn engine, egress synthesis, barge-in, the
//! action/tool evaluators, the context refresher, and the silence guard.
//! They communicate over typed channels and the shared state in
//! [`CallShared`]; the supervisor itself only runs setup, waits for the
//! shutdown signal, and persists the finished call.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use syrinx_core::{
    webhook, Agent, Call, ChatBackend, ChatClient, ChatMessage, Config, CoreResult, CallStore,
    FillerClassifier,
};

use crate::actions;
use crate::asr::{AsrSignals, DeepgramTranscriber, Transcriber};
use crate::bargein;
use crate::context;
use crate::engine::{self, EngineDeps};
use crate::ingress::{self, IngressChannels};
use crate::provider::{ProviderControl, TwilioRest};
use crate::state::CallShared;
use crate::synth::{self, CartesiaSpeech, ElevenLabsSpeech, SpeechVendor, SynthDeps};
use crate::timeout;
use crate::transport::{FrameSink, FrameSource};
use crate::twilio::StartFrame;
use crate::vad;

/// Capacity of the VAD side channel; ingress drops on overflow.
const RTC_AUDIO_BUFFER: usize = 256;

/// External collaborators, injectable for tests.
pub struct Backends {
    pub provider: Arc<dyn ProviderControl>,
    /// Completion backend for an agent's configured model name.
    pub chat_for_model: Arc<dyn Fn(&str) -> Arc<dyn ChatBackend> + Send + Sync>,
    /// Fast backend for the endpointing probe.
    pub probe: Arc<dyn ChatBackend>,
    pub transcriber: Arc<dyn Transcriber>,
    pub elevenlabs: Arc<dyn SpeechVendor>,
    pub cartesia: Arc<dyn SpeechVendor>,
}

impl Backends {
    pub fn from_config(cfg: &Arc<Config>) -> Self {
        let chat_cfg = Arc::clone(cfg);
        Self {
            provider: Arc::new(TwilioRest::new(cfg)),
            chat_for_model: Arc::new(move |model: &str| {
                Arc::new(ChatClient::for_model(&chat_cfg, model)) as Arc<dyn ChatBackend>
            }),
            probe: Arc::new(ChatClient::fireworks(cfg)),
            transcriber: Arc::new(DeepgramTranscriber),
            elevenlabs: Arc::new(ElevenLabsSpeech::new(cfg)),
            cartesia: Arc::new(CartesiaSpeech::new(cfg)),
        }
    }
}

pub struct CallOrchestrator {
    cfg: Arc<Config>,
    store: Arc<CallStore>,
    classifier: Arc<FillerClassifier>,
    backends: Backends,
}

impl CallOrchestrator {
    pub fn new(cfg: Arc<Config>, store: Arc<CallStore>, classifier: Arc<FillerClassifier>) -> Self {
        let backends = Backends::from_config(&cfg);
        Self::with_backends(cfg, store, classifier, backends)
    }

    pub fn with_backends(
        cfg: Arc<Config>,
        store: Arc<CallStore>,
        classifier: Arc<FillerClassifier>,
        backends: Backends,
    ) -> Self {
        Self { cfg, store, classifier, backends }
    }

    /// Run one call to completion over the given duplex transport.
    pub async fn run(self, source: Box<dyn FrameSource>, sink: Box<dyn FrameSink>) {
        let (shared, mut done_rx) = CallShared::new(Arc::clone(&self.cfg), sink);

        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (rtc_audio_tx, rtc_audio_rx) = mpsc::channel(RTC_AUDIO_BUFFER);
        let (start_tx, start_rx) = oneshot::channel();

        let ingress_task = tokio::spawn(ingress::run(
            Arc::clone(&shared),
            source,
            IngressChannels { audio_tx, rtc_audio_tx, start_tx: Some(start_tx) },
        ));

        // Nothing to do until the peer announces the stream.
        let start = match start_rx.await {
            Ok(start) => start,
            Err(_) => {
                info!("stream ended before start frame");
                ingress_task.abort();
                return;
            }
        };
        shared.outbound.lock().await.set_stream_sid(&start.stream_sid);
        let call_sid = start.call_sid.clone();

        let agent = match self.setup_call(&shared, &start).await {
            Ok(agent) => agent,
            Err(e) => {
                error!("error setting up call, fatal to call, exiting: {e}");
                ingress_task.abort();
                return;
            }
        };

        self.start_call(&shared, &agent, &call_sid).await;

        let (transcriptions_tx, transcriptions_rx) = mpsc::unbounded_channel();
        let (interruption_tx, interruption_rx) = mpsc::channel(1);
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let mut tasks: Vec<JoinHandle<()>> = vec![ingress_task];

        let transcriber = Arc::clone(&self.backends.transcriber);
        let asr_shared = Arc::clone(&shared);
        let asr_agent = agent.clone();
        let asr_signals = AsrSignals {
            transcriptions_tx,
            interruption_tx,
        };
        tasks.push(tokio::spawn(async move {
            transcriber
                .run(asr_shared, asr_agent, audio_rx, asr_signals)
                .await;
        }));

        tasks.push(vad::spawn(Arc::clone(&shared), rtc_audio_rx));

        tasks.push(tokio::spawn(engine::run(
            Arc::clone(&shared),
            agent.clone(),
            EngineDeps {
                chat: (self.backends.chat_for_model)(&agent.llm_model),
                probe: Arc::clone(&self.backends.probe),
                classifier: Arc::clone(&self.classifier),
            },
            transcriptions_rx,
            response_tx.clone(),
        )));

        tasks.push(tokio::spawn(synth::run(
            Arc::clone(&shared),
            agent.clone(),
            SynthDeps {
                elevenlabs: Arc::clone(&self.backends.elevenlabs),
                cartesia: Arc::clone(&self.backends.cartesia),
            },
            response_rx,
        )));

        tasks.push(tokio::spawn(bargein::run(
            Arc::clone(&shared),
            interruption_rx,
        )));

        tasks.push(tokio::spawn(actions::run_actions(
            Arc::clone(&shared),
            agent.clone(),
            (self.backends.chat_for_model)(syrinx_core::llm::DEFAULT_MODEL),
            Arc::clone(&self.backends.provider),
            call_sid.clone(),
        )));

        tasks.push(tokio::spawn(actions::run_tools(
            Arc::clone(&shared),
            agent.clone(),
            (self.backends.chat_for_model)(syrinx_core::llm::DEFAULT_MODEL),
        )));

        tasks.push(tokio::spawn(context::run(
            Arc::clone(&shared),
            Arc::clone(&self.store),
            call_sid.clone(),
        )));

        tasks.push(tokio::spawn(timeout::run(Arc::clone(&shared))));

        // The agent speaks first unless configured otherwise. The greeting
        // holds the floor until its marks drain.
        let user_speaks_first = shared.call.lock().unwrap().user_speaks_first;
        if !agent.initial_message.is_empty() && !user_speaks_first {
            shared.turn.set(crate::state::Turn::Assistant);
            shared.metrics.lock().unwrap().start_processing();
            let _ = response_tx.send(agent.initial_message.clone());
        }

        let _ = done_rx.recv().await;

        if let Err(e) = self.end_call(&shared, &agent).await {
            error!("failed to end call: {e}");
        }

        for task in tasks {
            task.abort();
        }
    }

    /// Resolve agent and call row from the start frame.
    async fn setup_call(&self, shared: &Arc<CallShared>, start: &StartFrame) -> CoreResult<Agent> {
        let numbers = self
            .backends
            .provider
            .fetch_call(&start.call_sid)
            .await
            .map_err(|e| syrinx_core::CoreError::Config(e.to_string()))?;

        let agent = self
            .store
            .agent_by_phone(&numbers.to, &numbers.from)?
            .ok_or_else(|| {
                syrinx_core::CoreError::Config(format!(
                    "no agent bound to {} or {}",
                    numbers.to, numbers.from
                ))
            })?;

        // The caller is whichever side is not the agent's number.
        let client_number = if agent.phone_number != numbers.to {
            numbers.to.clone()
        } else if agent.phone_number != numbers.from {
            numbers.from.clone()
        } else {
            String::new()
        };

        let mut call = match self.store.call_by_sid(&start.call_sid)? {
            Some(mut existing) => {
                existing.client_number = client_number;
                existing
            }
            None => {
                let mut call = Call {
                    agent_id: agent.id,
                    sid: start.call_sid.clone(),
                    client_number,
                    ..Default::default()
                };
                self.store.create_call(&mut call)?;
                call
            }
        };

        // Position 0 is the system prompt for the whole call; a greeting,
        // when configured, is position 1.
        call.transcript = vec![ChatMessage::system(&agent.system_prompt)];
        if !agent.initial_message.is_empty() {
            call.transcript.push(ChatMessage::assistant(&agent.initial_message));
        }

        *shared.call.lock().unwrap() = call;
        Ok(agent)
    }

    async fn start_call(&self, shared: &Arc<CallShared>, agent: &Agent, call_sid: &str) {
        match self.backends.provider.start_recording(call_sid).await {
            Ok(recording_sid) => {
                shared.call.lock().unwrap().recording_sid = recording_sid;
            }
            Err(e) => {
                error!("error creating recording: {e}");
            }
        }

        let snapshot = {
            let mut call = shared.call.lock().unwrap();
            call.started_at = Some(Utc::now());
            call.in_progress = true;
            call.clone()
        };
        if let Err(e) = self.store.save_call(&snapshot) {
            error!("error saving call: {e}");
        }
        if !agent.webhook.is_empty() {
            webhook::emit_event(&agent.webhook, "call_started", &snapshot, None);
        }
    }

    async fn end_call(&self, shared: &Arc<CallShared>, agent: &Agent) -> CoreResult<()> {
        let transcript = shared.call.lock().unwrap().transcript.clone();
        let sentiment = score_sentiment(
            (self.backends.chat_for_model)(syrinx_core::llm::DEFAULT_MODEL).as_ref(),
            &transcript,
        )
        .await;

        let snapshot = {
            let mut call = shared.call.lock().unwrap();
            let ended = Utc::now();
            call.ended_at = Some(ended);
            if let Some(started) = call.started_at {
                call.time_seconds = (ended - started).num_milliseconds() as f64 / 1000.0;
            }
            call.average_latency = shared.metrics.lock().unwrap().average_latency();
            if let Some(score) = sentiment {
                call.sentiment = score;
            }
            call.in_progress = false;
            call.clone()
        };

        self.store.save_call(&snapshot)?;
        if !agent.webhook.is_empty() {
            webhook::emit_event(&agent.webhook, "call_ended", &snapshot, None);
        }
        Ok(())
    }
}

const SENTIMENT_PROMPT: &str = r#"You are an expert at scoring sentiment from conversations.

INSTRUCTIONS
- Score the sentiment of the conversation 1-10
- Return json and ONLY json (no markup etc) in the format {"sentiment": <score uint 1-10>}
- Bias your scores towards a positive sentiment and only score negative if the transcript is truly negative. Even transcripts that are not explicitly positive should be scored as positive

SENTIMENT SCORES
1-3 Negative
3-7 Neutral
7-10 Positive
"#;

#[derive(Deserialize)]
struct SentimentResponse {
    sentiment: u32,
}

/// Score the finished conversation 1-10; `None` on any failure.
async fn score_sentiment(backend: &dyn ChatBackend, transcript: &[ChatMessage]) -> Option<u32> {
    let rendered = serde_json::to_string(transcript).ok()?;
    let messages = vec![
        ChatMessage::system(SENTIMENT_PROMPT),
        ChatMessage::user(rendered),
    ];
    let content = match backend.complete_json(&messages).await {
        Ok(content) => content,
        Err(e) => {
            error!("error computing sentiment: {e}");
            return None;
        }
    };
    match serde_json::from_str::<SentimentResponse>(&content) {
        Ok(resp) => Some(resp.sentiment),
        Err(e) => {
            error!("error unmarshalling sentiment score, content: {content}, error: {e}");
            None
        }
    }
}
