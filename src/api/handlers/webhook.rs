//! Webhook receiver for processor payment notifications.
//!
//! The response policy is deliberate: verification failures and ignored
//! trade states still acknowledge success, so a crafted input can never
//! force a processor-side retry storm, and unverified input is never acted
//! on. Only an unresolved rollback failure answers 5xx to invite a retry.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};

use crate::{
    api::state::AppState,
    wechat::{WebhookAck, WebhookHeaders},
};

pub async fn wechat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(verifier) = state.services.verifier.clone() else {
        tracing::warn!("Webhook received but payment verification is not configured");
        return (StatusCode::OK, Json(WebhookAck::success()));
    };

    let parsed_headers = match WebhookHeaders::from_header_map(&headers) {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!("Webhook rejected: {}", e);
            return (StatusCode::OK, Json(WebhookAck::success()));
        }
    };

    // Signature is verified over the untouched body bytes.
    let event = match verifier.verify_and_decrypt(&body, &parsed_headers).await {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Webhook verification failed: {}", e);
            return (StatusCode::OK, Json(WebhookAck::success()));
        }
    };

    if !event.is_success() {
        tracing::debug!(
            "Ignoring webhook for {} with trade state {}",
            event.out_trade_no,
            event.trade_state
        );
        return (StatusCode::OK, Json(WebhookAck::success()));
    }

    let paid_at = event
        .success_time
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let outcome = state
        .services
        .fulfillment
        .fulfill_paid_order(&event.out_trade_no, &event.transaction_id, paid_at)
        .await;

    if outcome.rollback_failed() {
        tracing::error!(
            "Webhook fulfillment for {} left divergent state; requesting processor retry",
            event.out_trade_no
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(WebhookAck::retry()));
    }

    if !outcome.is_success() {
        tracing::warn!(
            "Webhook fulfillment for {} did not apply: {:?}",
            event.out_trade_no,
            outcome
        );
    }
    (StatusCode::OK, Json(WebhookAck::success()))
}
