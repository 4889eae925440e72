use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::carts::{AddToCartInput, CreateCartInput},
    AppState,
};

/// Creates the router for cart endpoints.
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart))
        .route("/:id", get(get_cart))
        .route("/:id/items", post(add_to_cart))
        .route("/:id/items/:item_id", put(update_cart_item))
        .route("/:id/items/:item_id", delete(remove_cart_item))
        .route("/:id/coupon", post(apply_coupon))
        .route("/:id/coupon", delete(remove_coupon))
}

/// Create a new cart
async fn create_cart(
    State(state): State<AppState>,
    Json(payload): Json<CreateCartInput>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.create_cart(payload).await?;
    Ok(created_response(cart))
}

/// Get cart with items and a totals preview
async fn get_cart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.carts.get_cart(id).await?;
    Ok(success_response(detail))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let detail = state.services.carts.add_item(cart_id, payload).await?;
    Ok(success_response(detail))
}

#[derive(Debug, Deserialize, validator::Validate)]
struct UpdateQuantityRequest {
    #[validate(range(min = 0))]
    quantity: i32,
}

/// Update cart item quantity
async fn update_cart_item(
    State(state): State<AppState>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let detail = state
        .services
        .carts
        .update_item_quantity(cart_id, item_id, payload.quantity)
        .await?;
    Ok(success_response(detail))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .carts
        .update_item_quantity(cart_id, item_id, 0)
        .await?;
    Ok(success_response(detail))
}

#[derive(Debug, Deserialize)]
struct ApplyCouponRequest {
    code: String,
}

/// Apply a coupon code to the cart
async fn apply_coupon(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state
        .services
        .carts
        .apply_coupon(cart_id, &payload.code)
        .await?;
    Ok(success_response(detail))
}

/// Remove the coupon from the cart
async fn remove_coupon(
    State(state): State<AppState>,
    Path(cart_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let detail = state.services.carts.remove_coupon(cart_id).await?;
    Ok(success_response(detail))
}
