//! Bearer-token authentication.
//!
//! Requests carry a JWT in the `Authorization: Bearer` header; the claims
//! identify the customer and their role. Session issuance/refresh machinery
//! lives outside this service.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{entities::customer::CustomerRole, errors::ServiceError, AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id
    pub sub: String,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// The authenticated caller, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub customer_id: Uuid,
    pub email: String,
    pub role: CustomerRole,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == CustomerRole::Admin
    }

    /// Ownership gate shared by the order endpoints: admins see everything,
    /// customers only their own records.
    pub fn can_access(&self, owner_id: Uuid) -> bool {
        self.is_admin() || self.customer_id == owner_id
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin access required".to_string()))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing authorization header".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("malformed authorization header".into()))?;

        decode_token(token, &state.config.jwt_secret)
    }
}

pub fn decode_token(token: &str, secret: &str) -> Result<AuthenticatedUser, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {e}")))?;

    let customer_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| ServiceError::Unauthorized("invalid subject claim".into()))?;

    let role = match data.claims.role.as_str() {
        "admin" => CustomerRole::Admin,
        _ => CustomerRole::Customer,
    };

    Ok(AuthenticatedUser {
        customer_id,
        email: data.claims.email,
        role,
    })
}

/// Issue a signed token for a customer. Used by the seed tooling and tests.
pub fn issue_token(
    customer_id: Uuid,
    email: &str,
    role: CustomerRole,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, ServiceError> {
    let now = Utc::now();
    let claims = Claims {
        sub: customer_id.to_string(),
        email: email.to_string(),
        role: match role {
            CustomerRole::Admin => "admin".to_string(),
            CustomerRole::Customer => "customer".to_string(),
        },
        iat: now.timestamp(),
        exp: (now + Duration::seconds(ttl_secs)).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ServiceError::InternalError(format!("failed to sign token: {e}")))
}
