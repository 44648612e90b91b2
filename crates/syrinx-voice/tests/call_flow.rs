//! End-to-end call scenarios over a channel-backed transport.
//!
//! Each test drives a full [`CallOrchestrator`] with scripted chat,
//! synthesis, provider, and transcription backends, then inspects the
//! outbound frame stream and the persisted call row.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tokio::time::timeout;

use syrinx_core::{
    Agent, AgentAction, CallStore, ChatBackend, ChatMessage, Config, CoreResult,
    DisconnectReason, FillerClassifier, Tool, ToolInvocation,
};
use syrinx_voice::{
    asr, AsrSignals, AudioStream, Backends, CallOrchestrator, CallShared, FrameSink, FrameSource,
    InboundFrame, ProviderCall, ProviderControl, SpeechRequest, SpeechVendor, Transcriber,
    TwilioMessage, VoiceError, VoiceResult,
};

const AGENT_NUMBER: &str = "+15550001111";
const CALLER_NUMBER: &str = "+15559998888";

// ── transport ────────────────────────────────────────────────────────────

struct ChannelSource {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn next_frame(&mut self) -> VoiceResult<Option<InboundFrame>> {
        Ok(self.rx.recv().await)
    }
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<TwilioMessage>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: &TwilioMessage) -> VoiceResult<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| VoiceError::Transport("sink closed".into()))
    }
}

// ── scripted backends ────────────────────────────────────────────────────

struct ScriptedChat {
    reply: String,
    probabilities: Vec<u32>,
    probe_delay: Duration,
    probe_calls: AtomicUsize,
    completion_calls: AtomicUsize,
    sentiment: u32,
    invocations: Mutex<Vec<ToolInvocation>>,
}

impl ScriptedChat {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            probabilities: vec![95],
            probe_delay: Duration::ZERO,
            probe_calls: AtomicUsize::new(0),
            completion_calls: AtomicUsize::new(0),
            sentiment: 8,
            invocations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatBackend for ScriptedChat {
    async fn complete(&self, _messages: &[ChatMessage]) -> CoreResult<String> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> CoreResult<String> {
        if messages[0].content.contains("scoring sentiment") {
            return Ok(format!(r#"{{"sentiment": {}}}"#, self.sentiment));
        }
        tokio::time::sleep(self.probe_delay).await;
        let i = self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let p = self
            .probabilities
            .get(i)
            .copied()
            .unwrap_or_else(|| *self.probabilities.last().unwrap_or(&100));
        Ok(format!(r#"{{"probability": {p}}}"#))
    }

    async fn complete_with_tools(
        &self,
        _messages: &[ChatMessage],
        _tools: &[Tool],
    ) -> CoreResult<Vec<ToolInvocation>> {
        Ok(std::mem::take(&mut *self.invocations.lock().unwrap()))
    }
}

/// Transcriber that replays recognizer signals scripted inside the media
/// payloads themselves: each payload is base64 of
/// `{"kind": "final"|"interim", "text": "..."}`.
struct ScriptedTranscriber;

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn run(
        &self,
        shared: Arc<CallShared>,
        _agent: Agent,
        mut audio_rx: mpsc::UnboundedReceiver<String>,
        signals: AsrSignals,
    ) {
        while let Some(payload) = audio_rx.recv().await {
            let bytes = BASE64.decode(payload).unwrap();
            let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            match value["kind"].as_str() {
                Some("final") => {
                    asr::handle_final(&shared, value["text"].as_str().unwrap_or(""), &signals)
                }
                Some("interim") => asr::handle_interim(&shared, &signals),
                _ => {}
            }
        }
    }
}

struct FixedVendor {
    chunks: Vec<Vec<u8>>,
}

#[async_trait]
impl SpeechVendor for FixedVendor {
    async fn stream(&self, _request: &SpeechRequest) -> VoiceResult<AudioStream> {
        use futures_util::StreamExt;
        let chunks = self.chunks.clone();
        Ok(futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

#[derive(Default)]
struct RecordingProvider {
    operations: Mutex<Vec<String>>,
}

#[async_trait]
impl ProviderControl for RecordingProvider {
    async fn fetch_call(&self, call_sid: &str) -> VoiceResult<ProviderCall> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("fetch:{call_sid}"));
        Ok(ProviderCall { to: AGENT_NUMBER.into(), from: CALLER_NUMBER.into() })
    }

    async fn start_recording(&self, call_sid: &str) -> VoiceResult<String> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("record:{call_sid}"));
        Ok("RE-test".into())
    }

    async fn complete_call(&self, call_sid: &str) -> VoiceResult<()> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("complete:{call_sid}"));
        Ok(())
    }

    async fn redirect_call(&self, call_sid: &str, url: &str) -> VoiceResult<()> {
        self.operations
            .lock()
            .unwrap()
            .push(format!("redirect:{call_sid}:{url}"));
        Ok(())
    }
}

// ── harness ──────────────────────────────────────────────────────────────

struct CallHarness {
    in_tx: mpsc::UnboundedSender<InboundFrame>,
    out_rx: mpsc::UnboundedReceiver<TwilioMessage>,
    store: Arc<CallStore>,
    chat: Arc<ScriptedChat>,
    provider: Arc<RecordingProvider>,
    run: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

fn start_call(agent: Agent, chat: ScriptedChat, reply_chunks: Vec<Vec<u8>>) -> CallHarness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CallStore::new(dir.path().join("calls.db")).unwrap());
    let mut agent = agent;
    agent.phone_number = AGENT_NUMBER.into();
    if agent.system_prompt.is_empty() {
        agent.system_prompt = "You are a helpful phone agent.".into();
    }
    if agent.voice_id.is_empty() {
        agent.voice_id = "rachel".into();
    }
    agent.id = store.insert_agent(&agent).unwrap();

    let chat = Arc::new(chat);
    let provider = Arc::new(RecordingProvider::default());
    let vendor: Arc<dyn SpeechVendor> = Arc::new(FixedVendor { chunks: reply_chunks });

    let chat_dyn: Arc<dyn ChatBackend> = chat.clone();
    let chat_for_model = {
        let chat_dyn = Arc::clone(&chat_dyn);
        Arc::new(move |_model: &str| Arc::clone(&chat_dyn))
    };
    let backends = Backends {
        provider: provider.clone(),
        chat_for_model,
        probe: Arc::clone(&chat_dyn),
        transcriber: Arc::new(ScriptedTranscriber),
        elevenlabs: Arc::clone(&vendor),
        cartesia: vendor,
    };

    let mut cfg = Config::from_env();
    cfg.forward_redirect_url = "https://syrinx.example/twiml/forward".into();
    let orchestrator = CallOrchestrator::with_backends(
        Arc::new(cfg),
        Arc::clone(&store),
        Arc::new(FillerClassifier::new()),
        backends,
    );

    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let run = tokio::spawn(orchestrator.run(
        Box::new(ChannelSource { rx: in_rx }),
        Box::new(ChannelSink { tx: out_tx }),
    ));

    CallHarness { in_tx, out_rx, store, chat, provider, run, _dir: dir }
}

fn frame(json: String) -> InboundFrame {
    InboundFrame::Text(json)
}

fn start_frame() -> InboundFrame {
    frame(
        r#"{"event":"start","streamSid":"MZ1","start":{"streamSid":"MZ1","callSid":"CA1","tracks":["inbound","outbound"],"mediaFormat":{"encoding":"audio/x-mulaw","sampleRate":8000,"channels":1}}}"#
            .to_string(),
    )
}

fn stop_frame() -> InboundFrame {
    frame(r#"{"event":"stop"}"#.to_string())
}

fn mark_echo(name: &str) -> InboundFrame {
    frame(format!(r#"{{"event":"mark","mark":{{"name":"{name}"}}}}"#))
}

fn scripted_media(kind: &str, text: &str) -> InboundFrame {
    let payload = BASE64.encode(
        serde_json::json!({"kind": kind, "text": text})
            .to_string()
            .into_bytes(),
    );
    frame(format!(
        r#"{{"event":"media","media":{{"payload":"{payload}"}}}}"#
    ))
}

async fn next_frame(h: &mut CallHarness) -> TwilioMessage {
    timeout(Duration::from_secs(5), h.out_rx.recv())
        .await
        .expect("timed out waiting for outbound frame")
        .expect("outbound stream closed")
}

// ── scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn greeting_then_hangup_persists_transcript() {
    let agent = Agent {
        initial_message: "Hello.".into(),
        ..Default::default()
    };
    let mut h = start_call(agent, ScriptedChat::new("unused"), vec![vec![1u8; 160]]);

    h.in_tx.send(start_frame()).unwrap();

    let media = next_frame(&mut h).await;
    assert_eq!(media.event, "media");
    assert_eq!(media.stream_sid, "MZ1");
    let mark = next_frame(&mut h).await;
    assert_eq!(mark.event, "mark");

    // Peer plays the greeting and echoes the mark, then hangs up.
    h.in_tx.send(mark_echo(&mark.mark.unwrap().name)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.in_tx.send(stop_frame()).unwrap();

    timeout(Duration::from_secs(5), h.run).await.unwrap().unwrap();

    let call = h.store.call_by_sid("CA1").unwrap().unwrap();
    assert_eq!(call.transcript.len(), 2);
    assert_eq!(call.transcript[0].role, syrinx_core::Role::System);
    assert_eq!(call.transcript[1].content, "Hello.");
    assert_eq!(call.disconnect_reason, Some(DisconnectReason::UserHangup));
    assert!(!call.in_progress);
    assert!(call.time_seconds >= 0.0);
    assert_eq!(call.sentiment, 8);
    assert_eq!(call.recording_sid, "RE-test");
    assert!(h
        .provider
        .operations
        .lock()
        .unwrap()
        .contains(&"record:CA1".to_string()));
}

#[tokio::test]
async fn high_probability_final_commits_immediately() {
    let mut h = start_call(
        Agent::default(),
        ScriptedChat::new("Got it."),
        vec![vec![7u8; 160]],
    );

    h.in_tx.send(start_frame()).unwrap();
    h.in_tx.send(scripted_media("final", "yes")).unwrap();

    let media = next_frame(&mut h).await;
    assert_eq!(media.event, "media");
    let mark = next_frame(&mut h).await;
    assert_eq!(mark.event, "mark");

    // Exactly one completion and one synthesized reply.
    assert_eq!(h.chat.completion_calls.load(Ordering::SeqCst), 1);

    h.in_tx.send(mark_echo(&mark.mark.unwrap().name)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.in_tx.send(stop_frame()).unwrap();
    timeout(Duration::from_secs(5), h.run).await.unwrap().unwrap();

    let call = h.store.call_by_sid("CA1").unwrap().unwrap();
    let roles: Vec<_> = call.transcript.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            syrinx_core::Role::System,
            syrinx_core::Role::User,
            syrinx_core::Role::Assistant
        ]
    );
    assert_eq!(call.transcript[2].content, "Got it.");
    assert!(h.out_rx.try_recv().is_err(), "reply synthesized exactly once");
}

#[tokio::test]
async fn probe_timeout_falls_back_to_immediate_commit() {
    let mut chat = ScriptedChat::new("Right away.");
    chat.probabilities = vec![5];
    // Slower than the 700 ms probe deadline: the probability must never
    // be consulted and the low score never delays the commit.
    chat.probe_delay = Duration::from_secs(3);
    let mut h = start_call(Agent::default(), chat, vec![vec![7u8; 160]]);

    h.in_tx.send(start_frame()).unwrap();
    h.in_tx.send(scripted_media("final", "book it")).unwrap();

    let started = std::time::Instant::now();
    let media = next_frame(&mut h).await;
    assert_eq!(media.event, "media");
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "commit must not wait out the slow probe"
    );

    let mark = next_frame(&mut h).await;
    h.in_tx.send(mark_echo(&mark.mark.unwrap().name)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.in_tx.send(stop_frame()).unwrap();
    timeout(Duration::from_secs(5), h.run).await.unwrap().unwrap();
}

#[tokio::test]
async fn barge_in_clears_queued_playout() {
    let agent = Agent {
        initial_message: "Let me read you our full opening hours.".into(),
        ..Default::default()
    };
    // Three chunks → three outstanding marks while the peer plays audio.
    let mut h = start_call(
        agent,
        ScriptedChat::new("unused"),
        vec![vec![1u8; 160], vec![2u8; 160], vec![3u8; 160]],
    );

    h.in_tx.send(start_frame()).unwrap();
    let mut mark_names = Vec::new();
    for _ in 0..3 {
        let media = next_frame(&mut h).await;
        assert_eq!(media.event, "media");
        let mark = next_frame(&mut h).await;
        mark_names.push(mark.mark.unwrap().name);
    }

    // The interim gate only opens well after the last finalization.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    h.in_tx.send(scripted_media("interim", "")).unwrap();

    let clear = next_frame(&mut h).await;
    assert_eq!(clear.event, "clear");

    // Stale echoes from the peer are ignored.
    for name in &mark_names {
        h.in_tx.send(mark_echo(name)).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.in_tx.send(stop_frame()).unwrap();
    timeout(Duration::from_secs(5), h.run).await.unwrap().unwrap();

    let call = h.store.call_by_sid("CA1").unwrap().unwrap();
    assert_eq!(call.disconnect_reason, Some(DisconnectReason::UserHangup));
}

#[tokio::test]
async fn forward_action_drains_and_redirects() {
    let agent = Agent {
        initial_message: "Connecting you now.".into(),
        actions: vec![AgentAction {
            name: "forward".into(),
            instructions: "Forward when the caller asks for billing".into(),
            forwarding_number: "+15551234".into(),
        }],
        ..Default::default()
    };
    let chat = ScriptedChat::new("unused");
    *chat.invocations.lock().unwrap() = vec![ToolInvocation {
        name: "forward".into(),
        arguments: r#"{"ForwardingNumber": "+15551234"}"#.into(),
    }];
    let mut h = start_call(agent, chat, vec![vec![1u8; 160]]);

    h.in_tx.send(start_frame()).unwrap();
    let _media = next_frame(&mut h).await;
    let mark = next_frame(&mut h).await;
    // The evaluator waits for the greeting to drain before forwarding.
    h.in_tx.send(mark_echo(&mark.mark.unwrap().name)).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let done = h
            .provider
            .operations
            .lock()
            .unwrap()
            .iter()
            .any(|op| op.starts_with("redirect:CA1:"));
        if done {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "forward never issued");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let ops = h.provider.operations.lock().unwrap().clone();
    assert!(ops.contains(
        &"redirect:CA1:https://syrinx.example/twiml/forward?ForwardingNumber=+15551234"
            .to_string()
    ));

    h.in_tx.send(stop_frame()).unwrap();
    timeout(Duration::from_secs(5), h.run).await.unwrap().unwrap();

    let call = h.store.call_by_sid("CA1").unwrap().unwrap();
    assert_eq!(call.disconnect_reason, Some(DisconnectReason::Forward));
}
