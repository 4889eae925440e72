//! Paystack REST client.
//!
//! Thin wrapper over the three gateway calls the order lifecycle needs:
//! initialize-transaction, verify-transaction and create-refund. Responses
//! arrive in Paystack's `{status, message, data}` envelope; a `status: false`
//! envelope or a non-2xx response surfaces as `ServiceError::GatewayError`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{instrument, warn};

use super::{
    ChargeStatus, ChargeVerification, InitializeRequest, PaymentGateway, PaymentSession,
    RefundOutcome,
};
use crate::{config::PaystackConfig, errors::ServiceError};

#[derive(Clone)]
pub struct PaystackClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    authorization_url: String,
    access_code: String,
    reference: String,
}

#[derive(Debug, Deserialize)]
struct AuthorizationData {
    #[serde(default)]
    card_type: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    last4: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    id: Option<u64>,
    status: String,
    reference: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    authorization: Option<AuthorizationData>,
}

#[derive(Debug, Deserialize)]
struct RefundData {
    id: u64,
    status: String,
}

impl PaystackClient {
    pub fn new(cfg: &PaystackConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client init: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
        })
    }

    async fn unwrap_envelope<T>(
        &self,
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, ServiceError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, context, body = %body, "gateway returned error response");
            return Err(ServiceError::GatewayError(format!(
                "{context}: gateway responded {status}"
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("{context}: invalid response: {e}")))?;

        if !envelope.status {
            let message = envelope.message.unwrap_or_else(|| "unknown error".into());
            return Err(ServiceError::GatewayError(format!("{context}: {message}")));
        }

        envelope
            .data
            .ok_or_else(|| ServiceError::GatewayError(format!("{context}: empty response data")))
    }

    fn map_transaction(data: TransactionData) -> ChargeVerification {
        let status = match data.status.as_str() {
            "success" => ChargeStatus::Success,
            "failed" => ChargeStatus::Failed,
            "abandoned" => ChargeStatus::Abandoned,
            _ => ChargeStatus::Pending,
        };

        let authorization = data.authorization.unwrap_or(AuthorizationData {
            card_type: None,
            brand: None,
            last4: None,
        });

        ChargeVerification {
            reference: data.reference,
            status,
            transaction_id: data.id.map(|id| id.to_string()),
            amount_minor: data.amount,
            currency: data.currency,
            channel: data.channel,
            card_brand: authorization.brand.or(authorization.card_type),
            card_last4: authorization.last4,
            paid_at: data.paid_at,
        }
    }
}

#[async_trait]
impl PaymentGateway for PaystackClient {
    #[instrument(skip(self, request), fields(reference = %request.reference))]
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let body = serde_json::json!({
            "email": request.email,
            "amount": request.amount_minor,
            "reference": request.reference,
            "currency": request.currency,
            "callback_url": request.callback_url,
            "metadata": request.metadata,
        });

        let response = self
            .http
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("initialize transaction: {e}")))?;

        let data: InitializeData = self
            .unwrap_envelope(response, "initialize transaction")
            .await?;

        Ok(PaymentSession {
            authorization_url: data.authorization_url,
            access_code: data.access_code,
            reference: data.reference,
        })
    }

    #[instrument(skip(self))]
    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<ChargeVerification, ServiceError> {
        let response = self
            .http
            .get(format!("{}/transaction/verify/{reference}", self.base_url))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("verify transaction: {e}")))?;

        let data: TransactionData = self.unwrap_envelope(response, "verify transaction").await?;
        Ok(Self::map_transaction(data))
    }

    #[instrument(skip(self))]
    async fn create_refund(&self, transaction_id: &str) -> Result<RefundOutcome, ServiceError> {
        let body = serde_json::json!({ "transaction": transaction_id });

        let response = self
            .http
            .post(format!("{}/refund", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::GatewayError(format!("create refund: {e}")))?;

        let data: RefundData = self.unwrap_envelope(response, "create refund").await?;

        Ok(RefundOutcome {
            refund_id: data.id.to_string(),
            status: data.status,
        })
    }
}

/// Parse a webhook `data` object into the same shape the verify call yields,
/// so both confirmation paths feed one settlement routine.
pub fn charge_from_webhook(data: &serde_json::Value) -> Result<ChargeVerification, ServiceError> {
    let parsed: TransactionData = serde_json::from_value(data.clone())
        .map_err(|e| ServiceError::BadRequest(format!("malformed webhook data: {e}")))?;
    Ok(PaystackClient::map_transaction(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_charge_parses_card_metadata() {
        let data = serde_json::json!({
            "id": 4099260516u64,
            "status": "success",
            "reference": "PSK-1700000000000-a1b2c3d4",
            "amount": 6_480_000,
            "currency": "NGN",
            "channel": "card",
            "paid_at": "2024-06-01T12:30:45Z",
            "authorization": {"brand": "visa", "last4": "4081"}
        });

        let charge = charge_from_webhook(&data).unwrap();
        assert_eq!(charge.status, ChargeStatus::Success);
        assert_eq!(charge.transaction_id.as_deref(), Some("4099260516"));
        assert_eq!(charge.card_brand.as_deref(), Some("visa"));
        assert_eq!(charge.card_last4.as_deref(), Some("4081"));
        assert_eq!(charge.amount_minor, 6_480_000);
        assert!(charge.paid_at.is_some());
    }

    #[test]
    fn unknown_status_maps_to_pending() {
        let data = serde_json::json!({
            "id": 1u64,
            "status": "ongoing",
            "reference": "PSK-x",
            "amount": 100,
            "currency": "NGN"
        });
        let charge = charge_from_webhook(&data).unwrap();
        assert_eq!(charge.status, ChargeStatus::Pending);
    }

    #[test]
    fn malformed_webhook_data_rejected() {
        let err = charge_from_webhook(&serde_json::json!({"reference": 7})).unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }
}
