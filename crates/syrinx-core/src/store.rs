//! Local SQLite persistence for agents and calls.
//!
//! One connection per operation; the structured columns (transcript,
//! tools, actions) are stored as JSON text. The orchestrator saves the
//! call row on start, on coarse transitions, and on end, never per
//! utterance.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::error::CoreResult;
use crate::models::{Agent, Call, DisconnectReason};

#[derive(Clone)]
pub struct CallStore {
    db_path: PathBuf,
}

impl CallStore {
    pub fn new(db_path: PathBuf) -> CoreResult<Self> {
        let store = Self { db_path };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> CoreResult<Connection> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        Ok(conn)
    }

    fn init(&self) -> CoreResult<()> {
        if let Some(parent) = self.db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                system_prompt TEXT NOT NULL,
                initial_message TEXT NOT NULL DEFAULT '',
                llm_model TEXT NOT NULL DEFAULT '',
                voice_id TEXT NOT NULL DEFAULT '',
                webhook TEXT NOT NULL DEFAULT '',
                voicemail_number TEXT NOT NULL DEFAULT '',
                tools_json TEXT NOT NULL DEFAULT '[]',
                actions_json TEXT NOT NULL DEFAULT '[]',
                filler_words INTEGER NOT NULL DEFAULT 0,
                filler_words_whitelist_json TEXT NOT NULL DEFAULT '[]',
                chunking INTEGER NOT NULL DEFAULT 0,
                endpointing INTEGER NOT NULL DEFAULT 0,
                smart_endpointing_threshold INTEGER NOT NULL DEFAULT 0,
                voice_optimization INTEGER NOT NULL DEFAULT 0,
                multilingual INTEGER NOT NULL DEFAULT 0,
                language TEXT NOT NULL DEFAULT '',
                compliance_checks_json TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_agents_phone ON agents(phone_number);

            CREATE TABLE IF NOT EXISTS calls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                agent_id INTEGER NOT NULL,
                sid TEXT NOT NULL,
                client_number TEXT NOT NULL DEFAULT '',
                user_speaks_first INTEGER NOT NULL DEFAULT 0,
                transcript_json TEXT NOT NULL DEFAULT '[]',
                context TEXT NOT NULL DEFAULT '',
                recording_sid TEXT NOT NULL DEFAULT '',
                sentiment INTEGER NOT NULL DEFAULT 0,
                in_progress INTEGER NOT NULL DEFAULT 0,
                time_seconds REAL NOT NULL DEFAULT 0,
                average_latency REAL NOT NULL DEFAULT 0,
                started_at TEXT NULL,
                ended_at TEXT NULL,
                disconnect_reason TEXT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_calls_sid ON calls(sid);
            CREATE INDEX IF NOT EXISTS idx_calls_agent_id ON calls(agent_id);
            "#,
        )?;
        Ok(())
    }

    /// Agent bound to either side of the call, matching on phone number.
    pub fn agent_by_phone(&self, to: &str, from: &str) -> CoreResult<Option<Agent>> {
        let conn = self.open()?;
        let agent = conn
            .query_row(
                "SELECT * FROM agents WHERE phone_number = ?1 OR phone_number = ?2 LIMIT 1",
                params![to, from],
                agent_from_row,
            )
            .optional()?;
        Ok(agent)
    }

    pub fn insert_agent(&self, agent: &Agent) -> CoreResult<i64> {
        let conn = self.open()?;
        conn.execute(
            r#"INSERT INTO agents (
                name, phone_number, system_prompt, initial_message, llm_model,
                voice_id, webhook, voicemail_number, tools_json, actions_json,
                filler_words, filler_words_whitelist_json, chunking, endpointing,
                smart_endpointing_threshold, voice_optimization, multilingual,
                language, compliance_checks_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"#,
            params![
                agent.name,
                agent.phone_number,
                agent.system_prompt,
                agent.initial_message,
                agent.llm_model,
                agent.voice_id,
                agent.webhook,
                agent.voicemail_number,
                serde_json::to_string(&agent.tools)?,
                serde_json::to_string(&agent.actions)?,
                agent.filler_words,
                serde_json::to_string(&agent.filler_words_whitelist)?,
                agent.chunking,
                agent.endpointing,
                agent.smart_endpointing_threshold,
                agent.voice_optimization,
                agent.multilingual,
                agent.language,
                serde_json::to_string(&agent.compliance_checks)?,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Call row by provider session id, if one was pre-created (outbound calls).
    pub fn call_by_sid(&self, sid: &str) -> CoreResult<Option<Call>> {
        let conn = self.open()?;
        let call = conn
            .query_row(
                "SELECT * FROM calls WHERE sid = ?1 LIMIT 1",
                params![sid],
                call_from_row,
            )
            .optional()?;
        Ok(call)
    }

    pub fn create_call(&self, call: &mut Call) -> CoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO calls (agent_id, sid, client_number, user_speaks_first) VALUES (?1, ?2, ?3, ?4)",
            params![call.agent_id, call.sid, call.client_number, call.user_speaks_first],
        )?;
        call.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn save_call(&self, call: &Call) -> CoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            r#"UPDATE calls SET
                agent_id = ?1, client_number = ?2, user_speaks_first = ?3,
                transcript_json = ?4, context = ?5, recording_sid = ?6,
                sentiment = ?7, in_progress = ?8, time_seconds = ?9,
                average_latency = ?10, started_at = ?11, ended_at = ?12,
                disconnect_reason = ?13
            WHERE id = ?14"#,
            params![
                call.agent_id,
                call.client_number,
                call.user_speaks_first,
                serde_json::to_string(&call.transcript)?,
                call.context,
                call.recording_sid,
                call.sentiment,
                call.in_progress,
                call.time_seconds,
                call.average_latency,
                call.started_at.map(|t| t.to_rfc3339()),
                call.ended_at.map(|t| t.to_rfc3339()),
                call.disconnect_reason.map(|r| r.as_str()),
                call.id,
            ],
        )?;
        Ok(())
    }

    /// The operator-mutable context string, re-read mid-call by the refresher.
    pub fn call_context(&self, sid: &str) -> CoreResult<Option<String>> {
        let conn = self.open()?;
        let ctx = conn
            .query_row(
                "SELECT context FROM calls WHERE sid = ?1 LIMIT 1",
                params![sid],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(ctx)
    }

    /// Overwrite the context field (the operator-facing injection path).
    pub fn set_call_context(&self, sid: &str, context: &str) -> CoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE calls SET context = ?1 WHERE sid = ?2",
            params![context, sid],
        )?;
        Ok(())
    }
}

fn agent_from_row(row: &Row<'_>) -> rusqlite::Result<Agent> {
    let tools_json: String = row.get("tools_json")?;
    let actions_json: String = row.get("actions_json")?;
    let whitelist_json: String = row.get("filler_words_whitelist_json")?;
    let compliance_json: String = row.get("compliance_checks_json")?;
    Ok(Agent {
        id: row.get("id")?,
        name: row.get("name")?,
        phone_number: row.get("phone_number")?,
        system_prompt: row.get("system_prompt")?,
        initial_message: row.get("initial_message")?,
        llm_model: row.get("llm_model")?,
        voice_id: row.get("voice_id")?,
        webhook: row.get("webhook")?,
        voicemail_number: row.get("voicemail_number")?,
        tools: serde_json::from_str(&tools_json).unwrap_or_default(),
        actions: serde_json::from_str(&actions_json).unwrap_or_default(),
        filler_words: row.get("filler_words")?,
        filler_words_whitelist: serde_json::from_str(&whitelist_json).unwrap_or_default(),
        chunking: row.get("chunking")?,
        endpointing: row.get("endpointing")?,
        smart_endpointing_threshold: row.get("smart_endpointing_threshold")?,
        voice_optimization: row.get("voice_optimization")?,
        multilingual: row.get("multilingual")?,
        language: row.get("language")?,
        compliance_checks: serde_json::from_str(&compliance_json).unwrap_or_default(),
    })
}

fn call_from_row(row: &Row<'_>) -> rusqlite::Result<Call> {
    let transcript_json: String = row.get("transcript_json")?;
    let started_at: Option<String> = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let reason: Option<String> = row.get("disconnect_reason")?;
    Ok(Call {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        sid: row.get("sid")?,
        client_number: row.get("client_number")?,
        user_speaks_first: row.get("user_speaks_first")?,
        transcript: serde_json::from_str(&transcript_json).unwrap_or_default(),
        context: row.get("context")?,
        recording_sid: row.get("recording_sid")?,
        sentiment: row.get("sentiment")?,
        in_progress: row.get("in_progress")?,
        time_seconds: row.get("time_seconds")?,
        average_latency: row.get("average_latency")?,
        started_at: started_at.and_then(|t| t.parse().ok()),
        ended_at: ended_at.and_then(|t| t.parse().ok()),
        disconnect_reason: reason.as_deref().and_then(DisconnectReason::parse),
    })
}
