//! Barge-in controller.
//!
//! Each interruption event atomically empties the outstanding-mark set
//! and sends one `clear` frame, making the peer discard queued playout.
//! Both happen under the outbound lock, so a clear never splits a
//! media/mark pair.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::state::CallShared;

pub(crate) async fn run(shared: Arc<CallShared>, mut interruption_rx: mpsc::Receiver<()>) {
    while interruption_rx.recv().await.is_some() {
        if shared.is_done() {
            break;
        }
        let mut outbound = shared.outbound.lock().await;
        if let Err(e) = outbound.clear().await {
            error!("error writing clear frame: {e}");
        }
    }
    debug!("barge-in controller ended");
}
