//! OpenAPI document for the order/payment surface.

use utoipa::OpenApi;

use crate::{errors, services::orders};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        description = "Catalog, cart, coupon and order/payment lifecycle backend"
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::verify_payment,
        crate::handlers::webhooks::paystack_webhook,
    ),
    components(schemas(
        errors::ErrorResponse,
        orders::Address,
        orders::OrderItemInput,
        orders::CreateOrderRequest,
        orders::VerifyPaymentRequest,
        orders::UpdateStatusRequest,
        orders::CancelOrderRequest,
        orders::OrderItemResponse,
        orders::StatusHistoryEntry,
        orders::OrderResponse,
        orders::CheckoutResponse,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentStatus,
    )),
    tags(
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Webhooks", description = "Payment gateway callbacks")
    )
)]
pub struct ApiDoc;
