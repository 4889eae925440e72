//! Payment gateway abstraction.
//!
//! The order lifecycle talks to the gateway through [`PaymentGateway`] so the
//! HTTP client can be swapped for a scripted double in tests. The only real
//! implementation is [`paystack::PaystackClient`].

pub mod paystack;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

use crate::errors::ServiceError;

pub use paystack::PaystackClient;

type HmacSha512 = Hmac<Sha512>;

/// Request to open a hosted payment session.
#[derive(Debug, Clone, Serialize)]
pub struct InitializeRequest {
    pub email: String,
    /// Amount in the smallest currency unit (kobo for NGN).
    pub amount_minor: i64,
    pub reference: String,
    pub currency: String,
    pub callback_url: Option<String>,
    pub metadata: serde_json::Value,
}

/// Hosted payment session handed back to the storefront client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
}

/// Terminal status of a charge as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Success,
    Failed,
    Abandoned,
    Pending,
}

/// Server-side view of a charge, from the verify call or a webhook payload.
/// Client-supplied status is never trusted; this always originates from the
/// gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeVerification {
    pub reference: String,
    pub status: ChargeStatus,
    pub transaction_id: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub channel: Option<String>,
    pub card_brand: Option<String>,
    pub card_last4: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Result of a refund request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    pub status: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted payment session for the given reference and amount.
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<PaymentSession, ServiceError>;

    /// Ask the gateway for the authoritative status of a reference.
    async fn verify_transaction(&self, reference: &str)
        -> Result<ChargeVerification, ServiceError>;

    /// Request a refund for a settled transaction.
    async fn create_refund(&self, transaction_id: &str) -> Result<RefundOutcome, ServiceError>;
}

/// Convert a decimal amount to the smallest currency unit.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    (amount * dec!(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InternalError(format!("amount out of range: {amount}")))
}

/// Verify the HMAC-SHA512 hex signature the gateway sends with each webhook.
/// Computed over the raw, unparsed request body.
pub fn verify_webhook_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Sign a payload the way the gateway does. Test helper for webhook fixtures.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
