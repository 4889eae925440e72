use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Router,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, PaginationParams},
    services::orders::{
        CancelOrderRequest, CreateOrderRequest, UpdateStatusRequest, VerifyPaymentRequest,
    },
    AppState,
};

/// Creates the router for order endpoints. Everything here requires a bearer
/// token; ownership and admin checks happen in the service.
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/verify", post(verify_payment))
        .route("/:id", get(get_order))
        .route("/:id/status", put(update_status))
        .route("/:id/cancel", put(cancel_order))
        .route("/:id/refund", post(refund_order))
}

/// Create an order from the submitted items and open a hosted payment
/// session for it.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created, payment session open", body = crate::services::orders::CheckoutResponse),
        (status = 400, description = "Invalid items or coupon", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway initialization failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let checkout = state.services.orders.create_order(&user, payload).await?;
    Ok(created_response(checkout))
}

/// Confirm a payment from the client redirect. The reference is re-verified
/// against the gateway server-side.
#[utoipa::path(
    post,
    path = "/api/v1/orders/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment confirmed (or already settled)", body = crate::services::orders::OrderResponse),
        (status = 402, description = "Gateway reports the charge unsuccessful", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown reference", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .verify_payment(&payload.reference)
        .await?;
    Ok(success_response(order))
}

/// List orders (customers: own orders, admins: all)
async fn list_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state
        .services
        .orders
        .list_orders(&user, pagination.page, pagination.per_page)
        .await?;
    Ok(success_response(orders))
}

/// Fetch a single order
async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.get_order(&user, id).await?;
    Ok(success_response(order))
}

/// Admin: advance the fulfilment status
async fn update_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_status(&user, id, payload)
        .await?;
    Ok(success_response(order))
}

/// Cancel an order (owner or admin)
async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(&user, id, payload.reason)
        .await?;
    Ok(success_response(order))
}

/// Request a refund for a completed payment (owner or admin)
async fn refund_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.refund_order(&user, id).await?;
    Ok(success_response(order))
}
