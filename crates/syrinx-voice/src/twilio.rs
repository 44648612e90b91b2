//! Frame types for the telephony media stream.
//!
//! The duplex socket carries JSON text frames. Inbound: `start`, `media`
//! (base64 µ-law payload), `mark` (playback echo), `stop`. Outbound:
//! `media`, `mark`, `clear`. Field names follow the provider's wire
//! format exactly (`streamSid`, `sampleRate`, ...).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TwilioMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub event: String,
    #[serde(
        rename = "streamSid",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub stream_sid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark: Option<MarkFrame>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StartFrame {
    #[serde(rename = "accountSid", default)]
    pub account_sid: String,
    #[serde(rename = "streamSid", default)]
    pub stream_sid: String,
    #[serde(rename = "callSid", default)]
    pub call_sid: String,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: MediaFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaFormat {
    #[serde(default)]
    pub encoding: String,
    #[serde(rename = "sampleRate", default)]
    pub sample_rate: u32,
    #[serde(default)]
    pub channels: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MediaFrame {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub track: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chunk: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarkFrame {
    pub name: String,
}

impl TwilioMessage {
    /// Outbound audio chunk, base64 µ-law payload already encoded.
    pub fn media(stream_sid: &str, payload: String) -> Self {
        Self {
            event: "media".to_string(),
            stream_sid: stream_sid.to_string(),
            media: Some(MediaFrame { payload, ..Default::default() }),
            ..Default::default()
        }
    }

    /// Outbound mark checkpoint; the peer echoes it back once the audio
    /// preceding it has been played out.
    pub fn mark(stream_sid: &str, name: &str) -> Self {
        Self {
            event: "mark".to_string(),
            stream_sid: stream_sid.to_string(),
            mark: Some(MarkFrame { name: name.to_string() }),
            ..Default::default()
        }
    }

    /// Outbound clear: the peer discards any queued playout.
    pub fn clear(stream_sid: &str) -> Self {
        Self {
            event: "clear".to_string(),
            stream_sid: stream_sid.to_string(),
            ..Default::default()
        }
    }
}
