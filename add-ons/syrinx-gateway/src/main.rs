//! Axum gateway: dial-plan webhooks plus the media-stream WebSocket that
//! hands each connection to a per-call orchestrator.

mod twiml;
mod ws;

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use syrinx_core::{CallStore, Config, FillerClassifier};
use syrinx_voice::CallOrchestrator;

#[derive(Clone)]
struct AppState {
    cfg: Arc<Config>,
    store: Arc<CallStore>,
    classifier: Arc<FillerClassifier>,
}

#[derive(Deserialize)]
struct DialPlanRequest {
    #[serde(rename = "To", default)]
    to: String,
    #[serde(rename = "From", default)]
    from: String,
    #[serde(rename = "ForwardingNumber", default)]
    forwarding_number: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(Config::from_env());
    let store = Arc::new(CallStore::new(cfg.db_path.clone())?);

    let classifier = match FillerClassifier::from_jsonl_path(&cfg.filler_corpus_path) {
        Ok(classifier) => classifier,
        Err(e) => {
            warn!("filler-word corpus unavailable, fillers disabled: {e}");
            FillerClassifier::new()
        }
    };

    let state = AppState {
        cfg: Arc::clone(&cfg),
        store,
        classifier: Arc::new(classifier),
    };

    let app = Router::new()
        .route("/twiml", post(handle_dial_plan))
        .route("/twiml/forward", post(handle_forward))
        .route("/media", get(handle_media))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", cfg.port);
    info!("gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn xml_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

/// Inbound-call webhook: answer with the agent's dial plan or 404 when
/// no agent is bound to either number.
async fn handle_dial_plan(
    State(state): State<AppState>,
    Form(req): Form<DialPlanRequest>,
) -> Response {
    match state.store.agent_by_phone(&req.to, &req.from) {
        Ok(Some(agent)) => xml_response(twiml::dial_plan(
            &agent.voicemail_number,
            &state.cfg.twilio_streaming_url,
        )),
        Ok(None) => (StatusCode::NOT_FOUND, "Agent not found").into_response(),
        Err(e) => {
            error!("error looking up agent: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response()
        }
    }
}

/// Redirect target for forwarded calls.
async fn handle_forward(
    State(state): State<AppState>,
    Form(req): Form<DialPlanRequest>,
) -> Response {
    if req.forwarding_number.is_empty() {
        return (StatusCode::BAD_REQUEST, "Forwarding number not provided").into_response();
    }
    match state.store.agent_by_phone(&req.to, &req.from) {
        Ok(Some(_agent)) => xml_response(twiml::forward_plan(&req.forwarding_number)),
        Ok(None) => (StatusCode::NOT_FOUND, "Agent not found").into_response(),
        Err(e) => {
            error!("error looking up agent: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "lookup failed").into_response()
        }
    }
}

/// Media-stream entry point: one upgraded socket, one call orchestrator.
async fn handle_media(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        info!("media stream connected");
        let (source, sink) = ws::split(socket);
        let orchestrator = CallOrchestrator::new(
            Arc::clone(&state.cfg),
            Arc::clone(&state.store),
            Arc::clone(&state.classifier),
        );
        orchestrator.run(Box::new(source), Box::new(sink)).await;
        info!("media stream finished");
    })
}
