//! Ingress demultiplexer, the sole reader of the caller socket.
//!
//! Fans inbound frames out to the interior channels: media payloads to
//! the ASR (lossless) and the VAD side channel (drop-on-full), the start
//! frame to call setup, mark echoes into the outstanding-mark set. A
//! stop frame or socket close records `user_hangup` (when no other
//! reason is set) and signals shutdown.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use syrinx_core::DisconnectReason;

use crate::state::{CallShared, Turn};
use crate::transport::{FrameSource, InboundFrame};
use crate::twilio::{StartFrame, TwilioMessage};

pub(crate) struct IngressChannels {
    pub audio_tx: mpsc::UnboundedSender<String>,
    pub rtc_audio_tx: mpsc::Sender<String>,
    pub start_tx: Option<oneshot::Sender<StartFrame>>,
}

pub(crate) async fn run(
    shared: Arc<CallShared>,
    mut source: Box<dyn FrameSource>,
    mut channels: IngressChannels,
) {
    loop {
        let frame = match source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!("media stream closed");
                shared.set_disconnect_reason_if_unset(DisconnectReason::UserHangup);
                shared.shutdown();
                break;
            }
            Err(e) => {
                error!("error reading media stream: {e}");
                shared.set_disconnect_reason_if_unset(DisconnectReason::UserHangup);
                shared.shutdown();
                break;
            }
        };

        let text = match frame {
            InboundFrame::Text(text) => text,
            InboundFrame::Binary(data) => {
                debug!(bytes = data.len(), "ignoring binary frame from peer");
                continue;
            }
        };

        let message: TwilioMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                error!("unparseable frame from peer, skipping: {e}");
                continue;
            }
        };

        if let Some(start) = message.start {
            if let Some(tx) = channels.start_tx.take() {
                let _ = tx.send(start);
            }
        } else if let Some(media) = message.media {
            // ASR must see every chunk; the VAD channel may drop under
            // backpressure; it is informational only.
            if channels.audio_tx.send(media.payload.clone()).is_err() {
                debug!("transcription channel closed, dropping media");
            }
            let _ = channels.rtc_audio_tx.try_send(media.payload);
        } else if let Some(mark) = message.mark {
            let mut outbound = shared.outbound.lock().await;
            if outbound.ack_mark(&mark.name) {
                // Every chunk the assistant sent has been heard.
                shared.turn.set(Turn::User);
            }
        } else if message.event == "stop" {
            info!("stop frame from peer");
            shared.set_disconnect_reason_if_unset(DisconnectReason::UserHangup);
            shared.shutdown();
            break;
        }
    }
}
