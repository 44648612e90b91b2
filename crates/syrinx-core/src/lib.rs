//! # Syrinx Core
//!
//! Shared foundation for the Syrinx voice-agent platform: configuration,
//! the agent/call data model, SQLite persistence, the chat-completions
//! client, webhook delivery, the filler-word classifier, and the ASR
//! language table. The per-call orchestrator lives in `syrinx-voice`;
//! the HTTP/WebSocket surface in `syrinx-gateway`.

pub mod classifier;
pub mod config;
pub mod error;
pub mod languages;
pub mod llm;
pub mod models;
pub mod store;
pub mod webhook;

pub use classifier::FillerClassifier;
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use llm::{ChatBackend, ChatClient, LlmEndpoint, ToolInvocation};
pub use models::{
    Agent, AgentAction, Call, ChatMessage, ComplianceCheck, DisconnectReason, Role, Tool,
};
pub use store::CallStore;
