//! Shared per-call state, partitioned by writer.
//!
//! One [`CallShared`] is owned by exactly one orchestrator instance.
//! Fields and their writers:
//!
//! | field            | writers                                   |
//! |------------------|-------------------------------------------|
//! | `turn`           | ingress (drain), ASR adapter, turn engine |
//! | `user_speaking`  | ASR adapter; read by egress               |
//! | `call`           | turn engine (transcript), lifecycle; the context refresher overwrites only `context` |
//! | `outbound`       | egress + barge-in (frames), ingress (mark acks) |
//! | `metrics`        | ASR adapter (start), egress (stop)        |
//! | `done`           | anyone via `shutdown()`                   |

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
// tokio's Instant so the silence guard and the interim gate honour the
// test clock.
use tokio::time::Instant;

use syrinx_core::{Call, Config};

use crate::metrics::Metrics;
use crate::transport::{FrameSink, Outbound};

/// Which party holds the conversational floor. Audio is only written to
/// the caller while the turn is `Assistant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Turn {
    User = 0,
    Assistant = 1,
}

/// Single-word turn flag; readers see either the old or the new value,
/// never a torn one.
#[derive(Debug)]
pub struct TurnFlag(AtomicU8);

impl TurnFlag {
    pub fn new(turn: Turn) -> Self {
        Self(AtomicU8::new(turn as u8))
    }

    pub fn get(&self) -> Turn {
        match self.0.load(Ordering::SeqCst) {
            0 => Turn::User,
            _ => Turn::Assistant,
        }
    }

    pub fn set(&self, turn: Turn) {
        self.0.store(turn as u8, Ordering::SeqCst);
    }
}

pub struct CallShared {
    pub cfg: Arc<Config>,
    /// Accumulated call record; persisted on coarse transitions only.
    pub call: Mutex<Call>,
    pub turn: TurnFlag,
    pub user_speaking: AtomicBool,
    pub outbound: tokio::sync::Mutex<Outbound>,
    pub metrics: Mutex<Metrics>,
    pub user_last_spoke: Mutex<Instant>,
    pub last_finalized: Mutex<Instant>,
    done: AtomicBool,
    done_tx: mpsc::Sender<()>,
}

impl CallShared {
    pub fn new(cfg: Arc<Config>, sink: Box<dyn FrameSink>) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (done_tx, done_rx) = mpsc::channel(1);
        let shared = Arc::new(Self {
            cfg,
            call: Mutex::new(Call::default()),
            turn: TurnFlag::new(Turn::User),
            user_speaking: AtomicBool::new(false),
            outbound: tokio::sync::Mutex::new(Outbound::new(sink)),
            metrics: Mutex::new(Metrics::new()),
            user_last_spoke: Mutex::new(Instant::now()),
            last_finalized: Mutex::new(Instant::now()),
            done: AtomicBool::new(false),
            done_tx,
        });
        (shared, done_rx)
    }

    /// Signal call shutdown. Effective once; later calls are no-ops.
    pub fn shutdown(&self) {
        self.done.store(true, Ordering::SeqCst);
        let _ = self.done_tx.try_send(());
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Record the disconnect reason unless one is already set.
    pub fn set_disconnect_reason_if_unset(&self, reason: syrinx_core::DisconnectReason) {
        let mut call = self.call.lock().unwrap();
        if call.disconnect_reason.is_none() {
            call.disconnect_reason = Some(reason);
        }
    }

    pub fn touch_user_spoke(&self) {
        *self.user_last_spoke.lock().unwrap() = Instant::now();
    }

    pub fn touch_finalized(&self) {
        *self.last_finalized.lock().unwrap() = Instant::now();
    }
}
