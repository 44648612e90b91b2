//! Voice-activity side channel.
//!
//! Decodes each inbound µ-law chunk, upsamples 8 kHz → 16 kHz, splits
//! into 20 ms frames of 320 samples, and runs WebRTC VAD in its most
//! aggressive mode. Sustained speech (≥ 460 ms) is logged. The channel
//! is advisory: nothing downstream gates on it, but it gives operators a
//! caller-activity trace independent of the ASR.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use webrtc_vad::{SampleRate, Vad, VadMode};

use crate::audio::{decode_mulaw, resample_linear};
use crate::state::CallShared;

const TARGET_SAMPLE_RATE: u32 = 16_000;
const FRAME_MS: usize = 20;
const FRAME_SAMPLES: usize = (TARGET_SAMPLE_RATE as usize) * FRAME_MS / 1000; // 320
const SUSTAINED_SPEECH_MS: usize = 460;
const SUSTAINED_SPEECH_FRAMES: usize = SUSTAINED_SPEECH_MS / FRAME_MS;

/// Consume the side-channel audio until shutdown. Runs on a dedicated
/// blocking thread: the WebRTC VAD handle is not `Send`.
pub(crate) fn spawn(
    shared: Arc<CallShared>,
    mut rx: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut vad = Vad::new();
        vad.set_mode(VadMode::VeryAggressive);
        vad.set_sample_rate(SampleRate::Rate16kHz);

        let mut speaking_frames = 0usize;

        while let Some(payload) = rx.blocking_recv() {
            if shared.is_done() {
                break;
            }

            let chunk = match BASE64.decode(&payload) {
                Ok(c) => c,
                Err(e) => {
                    error!("error decoding media payload: {e}");
                    continue;
                }
            };

            let pcm = decode_mulaw(&chunk);
            let resampled = resample_linear(&pcm, 8000, TARGET_SAMPLE_RATE);

            for frame in resampled.chunks(FRAME_SAMPLES) {
                if frame.len() != FRAME_SAMPLES {
                    // Trailing partial frame; the detector needs exact
                    // 10/20/30 ms windows.
                    continue;
                }
                let active = match vad.is_voice_segment(frame) {
                    Ok(a) => a,
                    Err(_) => {
                        error!(frame_len = frame.len(), "vad rejected frame");
                        continue;
                    }
                };
                if active {
                    speaking_frames += 1;
                } else {
                    speaking_frames = 0;
                }
                if speaking_frames >= SUSTAINED_SPEECH_FRAMES {
                    info!("caller speech sustained");
                    speaking_frames = 0;
                }
            }
        }
        debug!("vad side channel ended");
    })
}
