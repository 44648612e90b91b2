//! Process configuration, read once from the environment.
//!
//! Call `dotenvy::dotenv()` before `Config::from_env()` so a local `.env`
//! file can supply keys in development. Missing keys default to empty
//! strings; the corresponding remote calls then fail at use time and the
//! affected call degrades instead of the process refusing to start.

use std::path::PathBuf;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Credentials and endpoints for every external collaborator.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub fireworks_api_key: String,
    pub deepgram_api_key: String,
    pub elevenlabs_api_key: String,
    pub cartesia_api_key: String,
    pub cartesia_version: String,

    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    /// Public wss:// URL Twilio connects its media stream to.
    pub twilio_streaming_url: String,
    /// Dial-plan URL a forwarded call is redirected through.
    pub forward_redirect_url: String,

    pub db_path: PathBuf,
    /// JSONL corpus the filler-word classifier trains from at startup.
    pub filler_corpus_path: PathBuf,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_or("OPENAI_API_KEY", ""),
            fireworks_api_key: env_or("FIREWORKS_API_KEY", ""),
            deepgram_api_key: env_or("DEEPGRAM_API_KEY", ""),
            elevenlabs_api_key: env_or("ELEVENLABS_API_KEY", ""),
            cartesia_api_key: env_or("CARTESIA_API_KEY", ""),
            cartesia_version: env_or("CARTESIA_VERSION", "2024-06-10"),
            twilio_account_sid: env_or("TWILIO_SID", ""),
            twilio_auth_token: env_or("TWILIO_AUTH_TOKEN", ""),
            twilio_streaming_url: env_or("TWILIO_STREAMING_URL", ""),
            forward_redirect_url: env_or("TWILIO_REDIRECT_ML_URL", ""),
            db_path: PathBuf::from(env_or("SYRINX_DB_PATH", "syrinx.db")),
            filler_corpus_path: PathBuf::from(env_or(
                "SYRINX_FILLER_CORPUS",
                "data/filler_words.jsonl",
            )),
            port: env_or("PORT", "8080").parse().unwrap_or(8080),
        }
    }
}
