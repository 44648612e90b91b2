//! Action and tool evaluation.
//!
//! Two slow loops watch the transcript. The action evaluator exposes the
//! agent's named side effects (hangup, forward) as function tools and
//! executes whatever the model selects; the tool evaluator exposes the
//! operator's own tool schemas and emits a `tool_call` webhook with the
//! structured arguments. Both only re-ask when the transcript has grown.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use syrinx_core::{
    webhook, Agent, ChatBackend, ChatMessage, DisconnectReason, Role, Tool, ToolInvocation,
};

use crate::state::CallShared;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const DRAIN_POLL: Duration = Duration::from_millis(250);

/// A side effect the evaluator decided on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ActionCommand {
    Hangup,
    Forward { number: String },
    Unknown { name: String },
}

#[derive(Deserialize)]
struct ForwardArgs {
    #[serde(rename = "ForwardingNumber")]
    forwarding_number: String,
}

impl ActionCommand {
    pub(crate) fn from_invocation(invocation: &ToolInvocation) -> Self {
        match invocation.name.as_str() {
            "hangup" => ActionCommand::Hangup,
            "forward" => match serde_json::from_str::<ForwardArgs>(&invocation.arguments) {
                Ok(args) => ActionCommand::Forward { number: args.forwarding_number },
                Err(e) => {
                    error!("error parsing forward arguments: {e}");
                    ActionCommand::Unknown { name: invocation.name.clone() }
                }
            },
            other => ActionCommand::Unknown { name: other.to_string() },
        }
    }
}

/// Function-tool schemas for the agent's configured actions.
pub(crate) fn action_tools(agent: &Agent) -> Vec<Tool> {
    agent
        .actions
        .iter()
        .map(|action| {
            Tool::function(
                &action.name,
                format!(
                    "Instructions: {} \n\nForwarding Number: {}",
                    action.instructions, action.forwarding_number
                ),
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "ForwardingNumber": {
                            "type": "string",
                            "description": "The phone number to forward the call to",
                        },
                    },
                    "required": ["ForwardingNumber"],
                }),
            )
        })
        .collect()
}

fn transcript_snapshot(shared: &CallShared) -> Vec<ChatMessage> {
    shared.call.lock().unwrap().transcript.clone()
}

fn emit(shared: &CallShared, agent: &Agent, name: &str, data: serde_json::Value) {
    if agent.webhook.is_empty() {
        return;
    }
    let call = shared.call.lock().unwrap().clone();
    webhook::emit_event(&agent.webhook, name, &call, Some(data));
}

/// Wait for the assistant's queued audio to be fully heard before a
/// terminal action tears the call down.
async fn drain_marks(shared: &CallShared) {
    loop {
        if shared.is_done() || !shared.outbound.lock().await.has_marks() {
            return;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

pub(crate) async fn run_actions(
    shared: Arc<CallShared>,
    agent: Agent,
    chat: Arc<dyn ChatBackend>,
    provider: Arc<dyn crate::provider::ProviderControl>,
    call_sid: String,
) {
    let tools = action_tools(&agent);
    if tools.is_empty() {
        info!("no actions configured, evaluator idle");
        return;
    }

    let mut seen_len = 0usize;
    loop {
        if shared.is_done() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;

        let transcript = transcript_snapshot(&shared);
        if transcript.len() <= seen_len {
            continue;
        }

        let invocations = match chat.complete_with_tools(&transcript, &tools).await {
            Ok(i) => i,
            Err(e) => {
                error!("error evaluating actions: {e}");
                continue;
            }
        };

        for invocation in &invocations {
            match ActionCommand::from_invocation(invocation) {
                ActionCommand::Hangup => {
                    drain_marks(&shared).await;
                    if let Err(e) = provider.complete_call(&call_sid).await {
                        error!("error hanging up call: {e}");
                    }
                    shared.set_disconnect_reason_if_unset(DisconnectReason::AgentHangup);
                    shared.shutdown();
                }
                ActionCommand::Forward { number } => {
                    drain_marks(&shared).await;
                    shared.set_disconnect_reason_if_unset(DisconnectReason::Forward);
                    let url = format!(
                        "{}?ForwardingNumber={}",
                        shared.cfg.forward_redirect_url, number
                    );
                    if let Err(e) = provider.redirect_call(&call_sid, &url).await {
                        error!("error forwarding call: {e}");
                    }
                }
                ActionCommand::Unknown { name } => {
                    warn!("unknown action: {name}");
                }
            }
            emit(
                &shared,
                &agent,
                "action",
                serde_json::json!({
                    "name": invocation.name,
                    "arguments": invocation.arguments,
                }),
            );
        }

        seen_len = transcript.len();
    }
}

pub(crate) async fn run_tools(shared: Arc<CallShared>, agent: Agent, chat: Arc<dyn ChatBackend>) {
    if agent.tools.is_empty() {
        info!("no tools configured, evaluator idle");
        return;
    }

    let mut seen_len = 0usize;
    loop {
        if shared.is_done() {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;

        let transcript = transcript_snapshot(&shared);
        let grew = transcript.len() > seen_len;
        let user_last = transcript.last().map(|m| m.role) == Some(Role::User);
        if !grew || !user_last {
            continue;
        }

        match chat.complete_with_tools(&transcript, &agent.tools).await {
            Ok(invocations) if !invocations.is_empty() => {
                emit(
                    &shared,
                    &agent,
                    "tool_call",
                    serde_json::json!(invocations),
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!("error evaluating tools: {e}");
                continue;
            }
        }
        seen_len = transcript.len();
    }
}
