//! Data model: agents, calls, and the chat transcript they accumulate.
//!
//! An [`Agent`] is operator-written configuration bound to a phone number;
//! it is read once at call start and never mutated by the orchestrator.
//! A [`Call`] is the per-session record the orchestrator owns exclusively
//! and persists on start, on coarse transitions, and on end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat role, serialized in the OpenAI wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One transcript entry. Position 0 is always the system prompt; an
/// assistant-initial greeting, when configured, is position 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Why a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    UserHangup,
    AgentHangup,
    Forward,
    CallTimeout,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::UserHangup => "user_hangup",
            DisconnectReason::AgentHangup => "agent_hangup",
            DisconnectReason::Forward => "forward",
            DisconnectReason::CallTimeout => "call_timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_hangup" => Some(DisconnectReason::UserHangup),
            "agent_hangup" => Some(DisconnectReason::AgentHangup),
            "forward" => Some(DisconnectReason::Forward),
            "call_timeout" => Some(DisconnectReason::CallTimeout),
            _ => None,
        }
    }
}

/// A JSON-schema-described function exposed to the LLM, OpenAI tool form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub parameters: serde_json::Value,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A named side effect the agent may trigger mid-call (hangup, forward).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentAction {
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub forwarding_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ComplianceCheck {
    pub name: String,
    pub model: String,
    pub check_instructions: String,
    pub rewrite_threshold: u32,
}

/// Operator-defined voice agent bound to a phone number.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub phone_number: String,
    pub system_prompt: String,
    #[serde(default)]
    pub initial_message: String,
    #[serde(default)]
    pub llm_model: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default)]
    pub webhook: String,
    #[serde(default)]
    pub voicemail_number: String,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub actions: Vec<AgentAction>,
    #[serde(default)]
    pub filler_words: bool,
    #[serde(default)]
    pub filler_words_whitelist: Vec<String>,
    #[serde(default)]
    pub chunking: bool,
    /// ASR endpointing silence in milliseconds; 0 means the default (100).
    #[serde(default)]
    pub endpointing: u32,
    /// Smart-endpointing commit threshold 0-100; 0 means the default (70).
    #[serde(default)]
    pub smart_endpointing_threshold: u32,
    /// TTS latency optimization 0-4; 0 means the default (3).
    #[serde(default)]
    pub voice_optimization: u32,
    #[serde(default)]
    pub multilingual: bool,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub compliance_checks: Vec<ComplianceCheck>,
}

/// One phone call, keyed by the provider-issued session id.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Call {
    pub id: i64,
    pub agent_id: i64,
    #[serde(rename = "twilio_sid")]
    pub sid: String,
    #[serde(default)]
    pub client_number: String,
    #[serde(default)]
    pub user_speaks_first: bool,
    #[serde(default)]
    pub transcript: Vec<ChatMessage>,
    /// Operator-mutable notes injected into the system prompt each turn.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub recording_sid: String,
    /// 1-10, assigned at call end; 0 until scored.
    #[serde(default)]
    pub sentiment: u32,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub time_seconds: f64,
    #[serde(rename = "average_latency_ms", default)]
    pub average_latency: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub disconnect_reason: Option<DisconnectReason>,
}
