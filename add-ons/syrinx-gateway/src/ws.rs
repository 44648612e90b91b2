//! Frame transport over the Axum WebSocket halves.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

use syrinx_voice::{FrameSink, FrameSource, InboundFrame, TwilioMessage, VoiceError, VoiceResult};

pub struct WsFrameSource {
    inner: SplitStream<WebSocket>,
}

pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

/// Split an upgraded socket into the orchestrator's transport halves.
pub fn split(socket: WebSocket) -> (WsFrameSource, WsFrameSink) {
    let (sink, stream) = socket.split();
    (WsFrameSource { inner: stream }, WsFrameSink { inner: sink })
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn next_frame(&mut self) -> VoiceResult<Option<InboundFrame>> {
        loop {
            return match self.inner.next().await {
                None => Ok(None),
                Some(Ok(Message::Text(text))) => Ok(Some(InboundFrame::Text(text))),
                Some(Ok(Message::Binary(data))) => Ok(Some(InboundFrame::Binary(data))),
                Some(Ok(Message::Close(_))) => Ok(None),
                Some(Ok(_)) => continue, // ping/pong
                Some(Err(e)) => Err(VoiceError::Transport(e.to_string())),
            };
        }
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: &TwilioMessage) -> VoiceResult<()> {
        let text = serde_json::to_string(frame).map_err(VoiceError::Frame)?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| VoiceError::Transport(e.to_string()))
    }
}
