//! Telephony provider control plane (Twilio REST).
//!
//! [`ProviderControl`] is the seam; [`TwilioRest`] is the production
//! implementation. Only four operations are needed: look up the call's
//! numbers, start recording, complete (hang up), and redirect (forward).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use syrinx_core::Config;

use crate::error::{VoiceError, VoiceResult};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// The two phone numbers on a call.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderCall {
    pub to: String,
    pub from: String,
}

#[async_trait]
pub trait ProviderControl: Send + Sync {
    async fn fetch_call(&self, call_sid: &str) -> VoiceResult<ProviderCall>;

    /// Begin recording both tracks; returns the recording id.
    async fn start_recording(&self, call_sid: &str) -> VoiceResult<String>;

    /// End the call at the provider.
    async fn complete_call(&self, call_sid: &str) -> VoiceResult<()>;

    /// Point the live call at a new dial-plan URL (forwarding).
    async fn redirect_call(&self, call_sid: &str, url: &str) -> VoiceResult<()>;
}

pub struct TwilioRest {
    account_sid: String,
    auth_token: String,
    client: reqwest::Client,
}

impl TwilioRest {
    pub fn new(cfg: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            account_sid: cfg.twilio_account_sid.clone(),
            auth_token: cfg.twilio_auth_token.clone(),
            client,
        }
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{TWILIO_API_BASE}/Accounts/{}/Calls/{call_sid}.json",
            self.account_sid
        )
    }

    async fn post_call_update(&self, call_sid: &str, form: &[(&str, &str)]) -> VoiceResult<()> {
        let res = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await
            .map_err(|e| VoiceError::Provider(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Provider(format!(
                "call update failed: {}",
                res.status()
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct RecordingResponse {
    sid: String,
}

#[async_trait]
impl ProviderControl for TwilioRest {
    async fn fetch_call(&self, call_sid: &str) -> VoiceResult<ProviderCall> {
        let res = self
            .client
            .get(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| VoiceError::Provider(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Provider(format!(
                "call fetch failed: {}",
                res.status()
            )));
        }
        res.json::<ProviderCall>()
            .await
            .map_err(|e| VoiceError::Provider(e.to_string()))
    }

    async fn start_recording(&self, call_sid: &str) -> VoiceResult<String> {
        let url = format!(
            "{TWILIO_API_BASE}/Accounts/{}/Calls/{call_sid}/Recordings.json",
            self.account_sid
        );
        let res = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("RecordingTrack", "both")])
            .send()
            .await
            .map_err(|e| VoiceError::Provider(e.to_string()))?;
        if !res.status().is_success() {
            return Err(VoiceError::Provider(format!(
                "recording start failed: {}",
                res.status()
            )));
        }
        let recording: RecordingResponse = res
            .json()
            .await
            .map_err(|e| VoiceError::Provider(e.to_string()))?;
        Ok(recording.sid)
    }

    async fn complete_call(&self, call_sid: &str) -> VoiceResult<()> {
        self.post_call_update(call_sid, &[("Status", "completed")]).await
    }

    async fn redirect_call(&self, call_sid: &str, url: &str) -> VoiceResult<()> {
        self.post_call_update(call_sid, &[("Url", url), ("Method", "POST")])
            .await
    }
}
