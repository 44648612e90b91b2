//! Turn engine and generation driver.
//!
//! Waits for a final user transcript, then races a full completion
//! against the smart-endpointing probe:
//!
//! - probability ≥ threshold: commit now: take the assistant floor,
//!   optionally interject a filler word, await the completion, hand the
//!   reply to synthesis, append it to the transcript;
//! - probability < threshold: arm a timer of `500·(threshold − p)/10` ms.
//!   A new final before the timer fires joins the utterance (the caller
//!   was not done) and the race restarts with a fresh completion; the
//!   in-flight one is cancelled. Timer expiry commits as above.
//!
//! Position 0 of the transcript is rewritten with the current call
//! context on every race, so operator edits take effect on the next turn.
//! Exactly one generation is awaited per commit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use syrinx_core::{Agent, ChatBackend, ChatMessage, FillerClassifier};

use crate::endpointing;
use crate::state::{CallShared, Turn};

pub(crate) const DEFAULT_THRESHOLD: u32 = 70;

pub(crate) struct EngineDeps {
    /// Completion backend for the agent's configured model.
    pub chat: Arc<dyn ChatBackend>,
    /// Fast backend for the endpointing probe.
    pub probe: Arc<dyn ChatBackend>,
    pub classifier: Arc<FillerClassifier>,
}

/// Back-off before committing, linear in how unsure the probe was.
/// Zero at the threshold, monotonically longer as confidence drops.
pub(crate) fn backoff_delay(threshold: u32, probability: u32) -> Duration {
    let deficit = threshold.saturating_sub(probability);
    Duration::from_millis(u64::from(500 * deficit / 10))
}

fn append_user(shared: &CallShared, text: String) {
    let mut call = shared.call.lock().unwrap();
    call.transcript.push(ChatMessage::user(text));
}

/// Rewrite position 0 with the live context and snapshot the transcript.
fn snapshot_with_context(shared: &CallShared, agent: &Agent) -> Vec<ChatMessage> {
    let mut call = shared.call.lock().unwrap();
    call.transcript[0].content =
        format!("{} \n\nExtra Context \n\n {}", agent.system_prompt, call.context);
    call.transcript.clone()
}

fn spawn_generation(
    chat: Arc<dyn ChatBackend>,
    transcript: Vec<ChatMessage>,
) -> JoinHandle<String> {
    tokio::spawn(async move {
        match chat.complete(&transcript).await {
            Ok(reply) => reply,
            Err(e) => {
                // Empty reply is a no-op turn: synthesis emits a bare mark
                // and the floor returns to the caller.
                error!("error getting completion: {e}");
                String::new()
            }
        }
    })
}

pub(crate) async fn run(
    shared: Arc<CallShared>,
    agent: Agent,
    deps: EngineDeps,
    mut transcriptions_rx: mpsc::UnboundedReceiver<String>,
    response_tx: mpsc::UnboundedSender<String>,
) {
    let threshold = if agent.smart_endpointing_threshold == 0 {
        DEFAULT_THRESHOLD
    } else {
        agent.smart_endpointing_threshold
    };

    let mut previous_filler = String::new();

    'turns: loop {
        if shared.is_done() {
            break;
        }

        let Some(first) = transcriptions_rx.recv().await else {
            break;
        };
        // Rolling utterance string for filler-word classification; the
        // message list gets every joined final, this keeps the opener.
        let rolling = first.clone();
        append_user(&shared, first);

        loop {
            let snapshot = snapshot_with_context(&shared, &agent);
            let generation = spawn_generation(Arc::clone(&deps.chat), snapshot.clone());
            let probability = endpointing::probe(deps.probe.as_ref(), &snapshot[1..]).await;
            info!(probability, threshold, "endpointing probability");

            if probability >= threshold {
                commit(
                    &shared,
                    &agent,
                    &deps,
                    generation,
                    &rolling,
                    &mut previous_filler,
                    &response_tx,
                )
                .await;
                continue 'turns;
            }

            let delay = backoff_delay(threshold, probability);
            tokio::select! {
                more = transcriptions_rx.recv() => match more {
                    Some(text) => {
                        info!(transcript = %text, "joining continued utterance");
                        generation.abort();
                        append_user(&shared, text);
                    }
                    None => {
                        generation.abort();
                        break 'turns;
                    }
                },
                _ = tokio::time::sleep(delay) => {
                    commit(
                        &shared,
                        &agent,
                        &deps,
                        generation,
                        &rolling,
                        &mut previous_filler,
                        &response_tx,
                    )
                    .await;
                    continue 'turns;
                }
            }
        }
    }
}

async fn commit(
    shared: &CallShared,
    agent: &Agent,
    deps: &EngineDeps,
    generation: JoinHandle<String>,
    rolling: &str,
    previous_filler: &mut String,
    response_tx: &mpsc::UnboundedSender<String>,
) {
    shared.turn.set(Turn::Assistant);

    if agent.filler_words {
        if let Some(word) = deps.classifier.filler_word(
            rolling,
            &agent.filler_words_whitelist,
            previous_filler,
        ) {
            *previous_filler = word.clone();
            let _ = response_tx.send(word);
        }
    }

    let reply = match generation.await {
        Ok(reply) => reply,
        Err(e) => {
            error!("generation task failed: {e}");
            String::new()
        }
    };
    let _ = response_tx.send(reply.clone());

    let mut call = shared.call.lock().unwrap();
    call.transcript.push(ChatMessage::assistant(reply));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::channel_transport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use syrinx_core::{Call, Config, CoreResult, Role, Tool, ToolInvocation};

    #[test]
    fn backoff_is_monotone_and_zero_at_threshold() {
        assert_eq!(backoff_delay(70, 70), Duration::ZERO);
        assert_eq!(backoff_delay(70, 20), Duration::from_millis(2500));
        let mut previous = Duration::MAX;
        for p in 0..=70 {
            let d = backoff_delay(70, p);
            assert!(d <= previous, "backoff must not increase with confidence");
            previous = d;
        }
    }

    /// Chat backend whose `complete` replies with a fixed string and whose
    /// JSON mode replays a scripted probability sequence.
    struct Scripted {
        reply: String,
        probabilities: Vec<u32>,
        probe_calls: AtomicUsize,
        completion_calls: AtomicUsize,
        seen_transcripts: StdMutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(reply: &str, probabilities: Vec<u32>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                probabilities,
                probe_calls: AtomicUsize::new(0),
                completion_calls: AtomicUsize::new(0),
                seen_transcripts: StdMutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        async fn complete(&self, messages: &[ChatMessage]) -> CoreResult<String> {
            self.completion_calls.fetch_add(1, Ordering::SeqCst);
            self.seen_transcripts.lock().unwrap().push(messages.len());
            Ok(self.reply.clone())
        }

        async fn complete_json(&self, _messages: &[ChatMessage]) -> CoreResult<String> {
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
            Ok(vec![])
        }
    }

    struct EngineHarness {
        shared: Arc<CallShared>,
        transcriptions_tx: mpsc::UnboundedSender<String>,
        response_rx: mpsc::UnboundedReceiver<String>,
        backend: Arc<Scripted>,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn_engine(agent: Agent, backend: Arc<Scripted>) -> EngineHarness {
        let (_in_tx, _source, sink, _out_rx) = channel_transport();
        let (shared, _done_rx) = CallShared::new(Arc::new(Config::from_env()), Box::new(sink));
        {
            let mut call = shared.call.lock().unwrap();
            *call = Call::default();
            call.transcript.push(ChatMessage::system(&agent.system_prompt));
            call.context = "caller is a repeat customer".into();
        }
        let (transcriptions_tx, transcriptions_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let deps = EngineDeps {
            chat: backend.clone(),
            probe: backend.clone(),
            classifier: Arc::new(FillerClassifier::new()),
        };
        let task = tokio::spawn(run(
            Arc::clone(&shared),
            agent,
            deps,
            transcriptions_rx,
            response_tx,
        ));
        EngineHarness { shared, transcriptions_tx, response_rx, backend, task }
    }

    fn agent() -> Agent {
        Agent {
            system_prompt: "You are a helpful voice agent.".into(),
            smart_endpointing_threshold: 70,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn immediate_commit_generates_exactly_once() {
        let backend = Scripted::new("Got it.", vec![95]);
        let mut h = spawn_engine(agent(), backend.clone());

        h.transcriptions_tx.send("yes".into()).unwrap();
        assert_eq!(h.response_rx.recv().await.unwrap(), "Got it.");

        assert_eq!(backend.completion_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.shared.turn.get(), Turn::Assistant);
        let call = h.shared.call.lock().unwrap();
        assert_eq!(call.transcript.len(), 3);
        assert_eq!(call.transcript[1].role, Role::User);
        assert_eq!(call.transcript[2].content, "Got it.");
        drop(call);
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn low_probability_merges_and_reraces() {
        let backend = Scripted::new("Corgis are great.", vec![20, 92]);
        let mut h = spawn_engine(agent(), backend.clone());

        h.transcriptions_tx.send("I like".into()).unwrap();
        // First race: p=20 arms a 2.5 s timer; the second final arrives
        // before expiry and cancels the first generation.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        h.transcriptions_tx.send("corgis".into()).unwrap();

        assert_eq!(h.response_rx.recv().await.unwrap(), "Corgis are great.");
        assert_eq!(backend.probe_calls.load(Ordering::SeqCst), 2);

        let call = h.shared.call.lock().unwrap();
        let users: Vec<&str> = call
            .transcript
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(users, vec!["I like", "corgis"]);
        assert_eq!(call.transcript.last().unwrap().content, "Corgis are great.");
        drop(call);

        // Second generation ran over the merged transcript:
        // system + "I like" + "corgis".
        assert_eq!(*backend.seen_transcripts.lock().unwrap().last().unwrap(), 3);
        h.task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn timer_expiry_commits() {
        let backend = Scripted::new("Understood.", vec![40]);
        let mut h = spawn_engine(agent(), backend.clone());

        h.transcriptions_tx.send("let me think".into()).unwrap();
        // p=40 → 1.5 s back-off, no further finals: the timer commits.
        assert_eq!(h.response_rx.recv().await.unwrap(), "Understood.");
        assert_eq!(h.shared.turn.get(), Turn::Assistant);
        h.task.abort();
    }

    #[tokio::test]
    async fn context_is_rewritten_into_position_zero() {
        let backend = Scripted::new("ok", vec![95]);
        let mut h = spawn_engine(agent(), backend.clone());

        h.transcriptions_tx.send("hello there friend".into()).unwrap();
        let _ = h.response_rx.recv().await.unwrap();

        let call = h.shared.call.lock().unwrap();
        assert_eq!(call.transcript[0].role, Role::System);
        assert!(call.transcript[0].content.contains("Extra Context"));
        assert!(call.transcript[0].content.contains("repeat customer"));
        drop(call);
        h.task.abort();
    }

    #[tokio::test]
    async fn filler_word_precedes_reply_and_avoids_repeat() {
        let mut classifier = FillerClassifier::new();
        classifier.train("I need help with my tax form today please", "okay");
        classifier.train("could you help me sort out this deduction", "okay");
        classifier.train("so I was thinking about what you said there", "mhm");
        classifier.train("well I wanted to ask about the other thing", "mhm");

        let backend = Scripted::new("Sure.", vec![95, 95]);
        let (_in_tx, _source, sink, _out_rx) = channel_transport();
        let (shared, _done_rx) = CallShared::new(Arc::new(Config::from_env()), Box::new(sink));
        {
            let mut call = shared.call.lock().unwrap();
            call.transcript.push(ChatMessage::system("prompt"));
        }
        let agent = Agent {
            system_prompt: "prompt".into(),
            filler_words: true,
            filler_words_whitelist: vec!["okay".into(), "mhm".into()],
            ..Default::default()
        };
        let (transcriptions_tx, transcriptions_rx) = mpsc::unbounded_channel();
        let (response_tx, mut response_rx) = mpsc::unbounded_channel();
        let deps = EngineDeps {
            chat: backend.clone(),
            probe: backend.clone(),
            classifier: Arc::new(classifier),
        };
        let task = tokio::spawn(run(
            Arc::clone(&shared),
            agent,
            deps,
            transcriptions_rx,
            response_tx,
        ));

        transcriptions_tx
            .send("I need help with my tax form today".into())
            .unwrap();
        let first = response_rx.recv().await.unwrap();
        assert_eq!(first, "okay");
        assert_eq!(response_rx.recv().await.unwrap(), "Sure.");

        // Next turn must not repeat the same filler.
        shared.turn.set(Turn::User);
        transcriptions_tx
            .send("I need help with my tax form once more".into())
            .unwrap();
        let second = response_rx.recv().await.unwrap();
        assert_eq!(second, "mhm");
        task.abort();
    }
}
