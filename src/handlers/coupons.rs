use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response},
    services::coupons::{CreateCouponInput, ScopeItem},
    AppState,
};

/// Creates the router for coupon endpoints.
pub fn coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_coupon))
        .route("/validate", post(validate_coupon))
}

/// Create a coupon (admin)
async fn create_coupon(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateCouponInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let coupon = state.services.coupons.create(payload).await?;
    Ok(created_response(coupon))
}

#[derive(Debug, Deserialize)]
struct ValidateCouponRequest {
    code: String,
    subtotal: Decimal,
    #[serde(default)]
    items: Vec<ValidateScopeItem>,
}

#[derive(Debug, Deserialize)]
struct ValidateScopeItem {
    product_id: Uuid,
    #[serde(default)]
    category: Option<String>,
}

/// Preview a coupon against a subtotal and optional line items. Returns the
/// discount that checkout would apply right now.
async fn validate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let items: Vec<ScopeItem> = payload
        .items
        .iter()
        .map(|i| ScopeItem {
            product_id: i.product_id,
            category: i.category.clone(),
        })
        .collect();

    let code = payload.code.trim().to_uppercase();
    let coupon = state
        .services
        .coupons
        .validate(&code, payload.subtotal, &items)
        .await?;
    let discount = state
        .services
        .coupons
        .calculate_discount(&coupon, payload.subtotal);

    Ok(success_response(json!({
        "code": coupon.code,
        "discount": discount,
        "discount_type": coupon.discount_type,
    })))
}
