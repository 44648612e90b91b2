//! Context refresher.
//!
//! Operators can edit a call's context string while the call runs; the
//! refresher polls the store every 500 ms and overwrites the in-memory
//! field. The generation driver reads it on the next turn; a plain
//! whole-string overwrite, no coordination needed.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use syrinx_core::CallStore;

use crate::state::CallShared;

const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

pub(crate) async fn run(shared: Arc<CallShared>, store: Arc<CallStore>, call_sid: String) {
    loop {
        if shared.is_done() {
            break;
        }
        tokio::time::sleep(REFRESH_INTERVAL).await;

        match store.call_context(&call_sid) {
            Ok(Some(context)) => {
                shared.call.lock().unwrap().context = context;
            }
            Ok(None) => {}
            Err(e) => {
                error!("error reading call context: {e}");
            }
        }
    }
}
