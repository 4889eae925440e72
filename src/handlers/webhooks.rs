use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    errors::ServiceError,
    gateway::{self, paystack::charge_from_webhook, ChargeStatus},
    AppState,
};

const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Creates the router for gateway webhook callbacks.
pub fn webhooks_routes() -> Router<AppState> {
    Router::new().route("/paystack", post(paystack_webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Paystack event callback.
///
/// The HMAC signature over the raw body is the endpoint's sole
/// authentication; it is checked before the payload is even parsed, and a
/// mismatch rejects the request with zero database activity.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/paystack",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted"),
        (status = 403, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse)
    ),
    tag = "Webhooks"
)]
pub async fn paystack_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Forbidden("missing webhook signature".into()))?;

    let secret = state.config.paystack.webhook_secret();
    if !gateway::verify_webhook_signature(secret, &body, signature) {
        warn!("webhook signature verification failed");
        return Err(ServiceError::Forbidden("invalid webhook signature".into()));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook body: {e}")))?;

    match payload.event.as_str() {
        "charge.success" => {
            let charge = charge_from_webhook(&payload.data)?;
            if charge.status == ChargeStatus::Success {
                state
                    .services
                    .orders
                    .settle_successful_charge(&charge)
                    .await?;
            } else {
                // Belt and braces: the event name and the embedded status
                // should agree, but only the status is trusted.
                warn!(event = %payload.event, status = ?charge.status, "event/status mismatch");
            }
        }
        "charge.failed" => {
            let reference = payload
                .data
                .get("reference")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ServiceError::BadRequest("charge.failed without a reference".into())
                })?;
            let reason = payload
                .data
                .get("gateway_response")
                .and_then(|v| v.as_str());
            state
                .services
                .orders
                .record_failed_charge(reference, reason)
                .await?;
        }
        "refund.created" | "refund.failed" => {
            info!(event = %payload.event, "refund event received");
        }
        other => {
            info!(event = %other, "unhandled webhook event");
        }
    }

    Ok(Json(json!({"status": "ok"})))
}
