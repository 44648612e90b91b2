//! User-silence guard.
//!
//! If the caller has said nothing for 60 seconds the call is over:
//! record `call_timeout` and signal shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use syrinx_core::DisconnectReason;

use crate::state::CallShared;

const CHECK_INTERVAL: Duration = Duration::from_secs(1);
const USER_SILENCE_LIMIT: Duration = Duration::from_secs(60);

pub(crate) async fn run(shared: Arc<CallShared>) {
    loop {
        if shared.is_done() {
            break;
        }
        tokio::time::sleep(CHECK_INTERVAL).await;

        let silent_for = shared.user_last_spoke.lock().unwrap().elapsed();
        if silent_for > USER_SILENCE_LIMIT {
            info!(silent_secs = silent_for.as_secs(), "user silence limit reached");
            shared.set_disconnect_reason_if_unset(DisconnectReason::CallTimeout);
            shared.shutdown();
            break;
        }
    }
}
