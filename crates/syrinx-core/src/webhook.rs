//! Operator webhook delivery.
//!
//! Events are fire-and-forget from the caller's point of view: emission
//! spawns a task that POSTs the payload and retries transient failures
//! with exponential backoff, giving up after one minute total elapsed.

use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use serde::Serialize;
use tracing::{error, warn};

use crate::models::Call;

#[derive(Serialize)]
struct Event<'a> {
    event: &'a str,
    call: &'a Call,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a serde_json::Value>,
}

/// POST `{event, call, data?}` to `webhook_url`. Invalid URLs are dropped
/// silently (the agent simply has no webhook); delivery failures are
/// logged and never surface to the call.
pub fn emit_event(webhook_url: &str, name: &str, call: &Call, data: Option<serde_json::Value>) {
    if reqwest::Url::parse(webhook_url).is_err() {
        return;
    }

    let payload = match serde_json::to_value(Event {
        event: name,
        call,
        data: data.as_ref(),
    }) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to serialize webhook payload: {e}");
            return;
        }
    };
    let url = webhook_url.to_string();
    let name = name.to_string();

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let policy = ExponentialBackoffBuilder::new()
            .with_max_elapsed_time(Some(Duration::from_secs(60)))
            .build();

        let send = || async {
            let res = client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(e.to_string()))?;
            let status = res.status();
            if status.is_success() {
                Ok(())
            } else if status.is_client_error() {
                // 4xx will not get better on retry
                Err(backoff::Error::permanent(format!("rejected with {status}")))
            } else {
                warn!("webhook {name} returned {status}, retrying");
                Err(backoff::Error::transient(format!("status {status}")))
            }
        };

        if let Err(e) = backoff::future::retry(policy, send).await {
            error!("webhook {name} failed after retries: {e}");
        }
    });
}
