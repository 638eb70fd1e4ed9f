//! Messaging webhook: subscription handshake and inbound message ingestion.
//!
//! Each delivery runs one dialogue step; the replies are sent in order before the
//! request is acknowledged, so a conversation's messages never overtake each other.

use crate::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use intake_core::extract_inbound;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// GET /webhook – echoes `hub.challenge` when the mode and token match.
pub(crate) async fn verify(State(state): State<AppState>, Query(q): Query<VerifyQuery>) -> Response {
    let expected = state.config.verify_token.as_str();
    let subscribed = q.mode.as_deref() == Some("subscribe");
    let token_ok = !expected.is_empty() && q.verify_token.as_deref() == Some(expected);
    match (subscribed && token_ok, q.challenge) {
        (true, Some(challenge)) => {
            tracing::info!(target: "intake::gateway", "webhook verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            tracing::warn!(target: "intake::gateway", mode = ?q.mode, "webhook verification rejected");
            (StatusCode::FORBIDDEN, "verification failed").into_response()
        }
    }
}

/// POST /webhook – runs the sender's next dialogue step and delivers the replies.
pub(crate) async fn receive(State(state): State<AppState>, Json(body): Json<serde_json::Value>) -> Response {
    let Some(inbound) = extract_inbound(&body) else {
        return Json(serde_json::json!({ "status": "ignored" })).into_response();
    };
    let delivery = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        target: "intake::gateway",
        delivery = %delivery,
        from = %inbound.from,
        kind = inbound.message.get("type").and_then(|t| t.as_str()).unwrap_or("unknown"),
        "inbound message"
    );

    let replies = match state.engine.handle(&inbound.from, &inbound.message).await {
        Ok(replies) => replies,
        Err(e) => {
            tracing::error!(target: "intake::gateway", delivery = %delivery, error = %e, "dialogue step failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "status": "error", "delivery": delivery })),
            )
                .into_response();
        }
    };

    let mut failed = 0usize;
    for reply in &replies {
        if let Err(e) = state.transport.send(&inbound.from, reply).await {
            failed += 1;
            tracing::warn!(
                target: "intake::transport",
                delivery = %delivery,
                transport = state.transport.name(),
                error = %e,
                "reply not delivered"
            );
        }
    }

    Json(serde_json::json!({
        "status": "ok",
        "delivery": delivery,
        "replies": replies.len(),
        "failed": failed,
    }))
    .into_response()
}
