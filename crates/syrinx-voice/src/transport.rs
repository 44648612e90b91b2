//! Transport seam for the duplex media socket, and the outbound writer.
//!
//! The orchestrator never touches a WebSocket directly: ingress consumes
//! a [`FrameSource`], egress and barge-in write through [`Outbound`],
//! which owns the [`FrameSink`] plus the outstanding-mark set under one
//! lock. That lock is the write discipline: a media frame and its mark
//! are adjacent on the wire, and a barge-in `clear` can never interleave
//! a media/mark pair.

use std::collections::HashSet;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use uuid::Uuid;

use crate::error::VoiceResult;
use crate::twilio::TwilioMessage;

/// An inbound frame from the telephony peer.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Read half of the duplex socket. `Ok(None)` is a normal close.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> VoiceResult<Option<InboundFrame>>;
}

/// Write half of the duplex socket.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: &TwilioMessage) -> VoiceResult<()>;
}

/// The outbound socket plus the outstanding-mark set, guarded together.
pub struct Outbound {
    sink: Box<dyn FrameSink>,
    stream_sid: String,
    marks: HashSet<String>,
}

impl Outbound {
    pub fn new(sink: Box<dyn FrameSink>) -> Self {
        Self {
            sink,
            stream_sid: String::new(),
            marks: HashSet::new(),
        }
    }

    /// Set once when the start frame arrives.
    pub fn set_stream_sid(&mut self, sid: &str) {
        self.stream_sid = sid.to_string();
    }

    pub fn has_marks(&self) -> bool {
        !self.marks.is_empty()
    }

    pub fn outstanding_marks(&self) -> usize {
        self.marks.len()
    }

    /// Remove an echoed mark; returns true when the set became empty
    /// (the assistant has finished being heard).
    pub fn ack_mark(&mut self, name: &str) -> bool {
        self.marks.remove(name);
        self.marks.is_empty()
    }

    /// Write one audio chunk as a media frame immediately followed by a
    /// fresh uniquely-named mark frame. The mark is registered before the
    /// mark frame is written so an (unrealistically) fast echo still finds
    /// it outstanding.
    pub async fn write_audio(&mut self, chunk: &[u8]) -> VoiceResult<()> {
        let payload = BASE64.encode(chunk);
        let media = TwilioMessage::media(&self.stream_sid, payload);
        self.sink.send_frame(&media).await?;

        let name = Uuid::new_v4().to_string();
        self.marks.insert(name.clone());
        let mark = TwilioMessage::mark(&self.stream_sid, &name);
        self.sink.send_frame(&mark).await?;
        Ok(())
    }

    /// Write a lone mark with no audio. Used when a reply is empty so the
    /// peer's echo still flips the turn back to the user.
    pub async fn write_empty_mark(&mut self) -> VoiceResult<()> {
        let name = Uuid::new_v4().to_string();
        self.marks.insert(name.clone());
        let mark = TwilioMessage::mark(&self.stream_sid, &name);
        self.sink.send_frame(&mark).await?;
        Ok(())
    }

    /// Barge-in: drop every outstanding mark and tell the peer to discard
    /// its queued playout.
    pub async fn clear(&mut self) -> VoiceResult<()> {
        self.marks.clear();
        let clear = TwilioMessage::clear(&self.stream_sid);
        self.sink.send_frame(&clear).await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Channel-backed transport halves for driving a call without a socket.

    use super::*;
    use tokio::sync::mpsc;

    pub struct ChannelSource {
        pub rx: mpsc::UnboundedReceiver<InboundFrame>,
    }

    #[async_trait]
    impl FrameSource for ChannelSource {
        async fn next_frame(&mut self) -> VoiceResult<Option<InboundFrame>> {
            Ok(self.rx.recv().await)
        }
    }

    pub struct ChannelSink {
        pub tx: mpsc::UnboundedSender<TwilioMessage>,
    }

    #[async_trait]
    impl FrameSink for ChannelSink {
        async fn send_frame(&mut self, frame: &TwilioMessage) -> VoiceResult<()> {
            self.tx
                .send(frame.clone())
                .map_err(|_| crate::error::VoiceError::Transport("sink closed".into()))
        }
    }

    pub fn channel_transport() -> (
        mpsc::UnboundedSender<InboundFrame>,
        ChannelSource,
        ChannelSink,
        mpsc::UnboundedReceiver<TwilioMessage>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (
            in_tx,
            ChannelSource { rx: in_rx },
            ChannelSink { tx: out_tx },
            out_rx,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn media_and_mark_are_adjacent_and_paired() {
        let (_in_tx, _source, sink, mut out_rx) = channel_transport();
        let mut outbound = Outbound::new(Box::new(sink));
        outbound.set_stream_sid("MZ1");

        outbound.write_audio(&[1, 2, 3]).await.unwrap();
        assert_eq!(outbound.outstanding_marks(), 1);

        let media = out_rx.recv().await.unwrap();
        assert_eq!(media.event, "media");
        assert_eq!(media.stream_sid, "MZ1");
        let mark = out_rx.recv().await.unwrap();
        assert_eq!(mark.event, "mark");
        let name = mark.mark.unwrap().name;

        assert!(outbound.ack_mark(&name), "last echo empties the set");
        assert!(!outbound.has_marks());
    }

    #[tokio::test]
    async fn unique_mark_names_per_chunk() {
        let (_in_tx, _source, sink, mut out_rx) = channel_transport();
        let mut outbound = Outbound::new(Box::new(sink));
        outbound.set_stream_sid("MZ1");

        outbound.write_audio(&[0]).await.unwrap();
        outbound.write_audio(&[0]).await.unwrap();
        let mut names = std::collections::HashSet::new();
        for _ in 0..4 {
            let frame = out_rx.recv().await.unwrap();
            if let Some(mark) = frame.mark {
                names.insert(mark.name);
            }
        }
        assert_eq!(names.len(), 2);
        assert_eq!(outbound.outstanding_marks(), 2);
    }

    #[tokio::test]
    async fn clear_empties_marks_and_emits_clear_frame() {
        let (_in_tx, _source, sink, mut out_rx) = channel_transport();
        let mut outbound = Outbound::new(Box::new(sink));
        outbound.set_stream_sid("MZ1");

        outbound.write_audio(&[0]).await.unwrap();
        outbound.write_audio(&[0]).await.unwrap();
        outbound.clear().await.unwrap();
        assert!(!outbound.has_marks());

        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(out_rx.recv().await.unwrap().event);
        }
        assert_eq!(events, vec!["media", "mark", "media", "mark", "clear"]);
    }

    #[tokio::test]
    async fn stale_echo_after_clear_is_ignored() {
        let (_in_tx, _source, sink, mut out_rx) = channel_transport();
        let mut outbound = Outbound::new(Box::new(sink));
        outbound.set_stream_sid("MZ1");

        outbound.write_audio(&[0]).await.unwrap();
        let _media = out_rx.recv().await.unwrap();
        let mark = out_rx.recv().await.unwrap().mark.unwrap();

        outbound.clear().await.unwrap();
        // The peer may still echo the mark it already played; the set is
        // already empty and stays empty.
        assert!(outbound.ack_mark(&mark.name));
        assert_eq!(outbound.outstanding_marks(), 0);
    }
}
