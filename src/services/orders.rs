//! Order lifecycle coordination.
//!
//! Checkout persists a `pending` order and opens a hosted payment session;
//! confirmation can then arrive twice for the same reference (the customer's
//! verify call and the gateway webhook race freely). A single conditional
//! `update_many` on `payment_status <> completed` decides the winner, and
//! every side effect (stock decrement, payment record, coupon usage, cart
//! deletion, emails) runs only on the winning path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    config::CheckoutConfig,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, order_status_history, payment, product, Order, OrderItem, OrderStatusHistory,
        Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{
        to_minor_units, ChargeStatus, ChargeVerification, InitializeRequest, PaymentGateway,
        PaymentSession,
    },
    services::{
        carts::CartService,
        coupons::{CouponService, ScopeItem},
        pricing,
        products::ProductCatalogService,
    },
};

static ORDER_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Address snapshot embedded into the order document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub country: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemInput>,
    pub shipping_address: Address,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelOrderRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub product_name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub payment_reference: String,
    pub customer_id: Uuid,
    pub customer_email: String,
    pub currency: String,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    #[schema(value_type = Object)]
    pub billing_address: Option<serde_json::Value>,
    #[schema(value_type = Object)]
    pub payment_details: Option<serde_json::Value>,
    pub items: Vec<OrderItemResponse>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: OrderResponse,
    #[schema(value_type = Object)]
    pub payment: PaymentSession,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: Arc<CouponService>,
    products: Arc<ProductCatalogService>,
    carts: Arc<CartService>,
    checkout: CheckoutConfig,
    callback_url: Option<String>,
    event_sender: EventSender,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: Arc<CouponService>,
        products: Arc<ProductCatalogService>,
        carts: Arc<CartService>,
        checkout: CheckoutConfig,
        callback_url: Option<String>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            db,
            gateway,
            coupons,
            products,
            carts,
            checkout,
            callback_url,
            event_sender,
        }
    }

    /// Create a `pending` order from the request and open a hosted payment
    /// session for it.
    ///
    /// Any missing or understocked item rejects the whole order before
    /// anything is written. Stock is not decremented or reserved here; that
    /// happens when the payment is confirmed. If the gateway refuses to open
    /// a session after the order row exists, the order is deleted again (the
    /// one compensating action in the system) and the failure surfaced.
    #[instrument(skip(self, user, request), fields(customer_id = %user.customer_id))]
    pub async fn create_order(
        &self,
        user: &AuthenticatedUser,
        request: CreateOrderRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        if request.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "order must contain at least one item".into(),
            ));
        }
        if request.items.iter().any(|i| i.quantity < 1) {
            return Err(ServiceError::ValidationError(
                "item quantities must be at least 1".into(),
            ));
        }

        // Collapse duplicate product lines so the stock check sees the real
        // requested quantity.
        let mut requested: Vec<(Uuid, i32)> = Vec::new();
        for item in &request.items {
            match requested.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty += item.quantity,
                None => requested.push((item.product_id, item.quantity)),
            }
        }

        let ids: Vec<Uuid> = requested.iter().map(|(id, _)| *id).collect();
        let found = Product::find()
            .filter(product::Column::Id.is_in(ids))
            .all(&*self.db)
            .await?;

        let mut subtotal = Decimal::ZERO;
        let mut lines = Vec::with_capacity(requested.len());
        let mut scope = Vec::with_capacity(requested.len());
        for (product_id, quantity) in &requested {
            let product = found
                .iter()
                .find(|p| p.id == *product_id)
                .filter(|p| p.is_active)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("product {product_id} not found"))
                })?;
            if product.stock_quantity < *quantity {
                return Err(ServiceError::InsufficientStock(format!(
                    "only {} of {} in stock",
                    product.stock_quantity, product.name
                )));
            }
            let unit_price = product.selling_price();
            subtotal += unit_price * Decimal::from(*quantity);
            scope.push(ScopeItem {
                product_id: product.id,
                category: product.category.clone(),
            });
            lines.push((product.clone(), *quantity, unit_price));
        }

        // Coupon is validated against the server-side subtotal and the order
        // lines; the discount snapshot goes onto the order.
        let (coupon_code, discount) = match &request.coupon_code {
            Some(code) => {
                let code = code.trim().to_uppercase();
                let coupon = self.coupons.validate(&code, subtotal, &scope).await?;
                let discount = self.coupons.calculate_discount(&coupon, subtotal);
                (Some(code), discount)
            }
            None => (None, Decimal::ZERO),
        };

        let totals = pricing::compute_totals(&self.checkout, subtotal, discount);
        let amount_minor = to_minor_units(totals.total)?;

        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order_number = next_order_number(now);
        let reference = new_payment_reference(now);

        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.clone()),
            payment_reference: Set(reference.clone()),
            customer_id: Set(user.customer_id),
            customer_email: Set(user.email.clone()),
            currency: Set(self.checkout.currency.clone()),
            subtotal: Set(totals.subtotal),
            tax: Set(totals.tax),
            shipping_cost: Set(totals.shipping_cost),
            discount: Set(totals.discount),
            total: Set(totals.total),
            coupon_code: Set(coupon_code),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            shipping_address: Set(serde_json::to_value(&request.shipping_address)
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            billing_address: Set(request
                .billing_address
                .as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| ServiceError::InternalError(e.to_string()))?),
            payment_details: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for (product, quantity, unit_price) in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                sku: Set(product.sku.clone()),
                quantity: Set(*quantity),
                unit_price: Set(*unit_price),
                line_total: Set(*unit_price * Decimal::from(*quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        append_history(&txn, order_id, OrderStatus::Pending, Some("order placed")).await?;

        txn.commit().await?;

        let session = match self
            .gateway
            .initialize_transaction(&InitializeRequest {
                email: user.email.clone(),
                amount_minor,
                reference: reference.clone(),
                currency: self.checkout.currency.clone(),
                callback_url: self.callback_url.clone(),
                metadata: serde_json::json!({
                    "order_id": order_id,
                    "order_number": order_number,
                }),
            })
            .await
        {
            Ok(session) => session,
            Err(e) => {
                // Compensating action: the payment session never existed, so
                // neither should the order.
                error!(%order_id, error = %e, "gateway initialization failed, deleting order");
                Order::delete_by_id(order_id).exec(&*self.db).await?;
                return Err(e);
            }
        };

        info!(%order_id, %order_number, "order created, payment session open");
        self.event_sender
            .send(Event::OrderCreated {
                order_id,
                order_number,
                customer_email: user.email.clone(),
            })
            .await;

        let order = self.load_order(order_id).await?;
        Ok(CheckoutResponse {
            order: self.build_response(order).await?,
            payment: session,
        })
    }

    /// Client-side confirmation: ask the gateway for the authoritative charge
    /// state, then settle. The client's own claim about the payment outcome
    /// is never consulted.
    #[instrument(skip(self))]
    pub async fn verify_payment(&self, reference: &str) -> Result<OrderResponse, ServiceError> {
        let charge = self.gateway.verify_transaction(reference).await?;

        if charge.status != ChargeStatus::Success {
            return Err(ServiceError::PaymentFailed(format!(
                "payment for {reference} has status {:?}",
                charge.status
            )));
        }

        let (response, _applied) = self.settle_successful_charge(&charge).await?;
        Ok(response)
    }

    /// Confirmation routine shared by the verify call and the webhook.
    ///
    /// The conditional update is the idempotency guard: whichever trigger
    /// wins it applies the side effects; the loser observes zero affected
    /// rows and returns the current order state untouched. Returns the order
    /// plus whether this call was the winner.
    #[instrument(skip(self, charge), fields(reference = %charge.reference))]
    pub async fn settle_successful_charge(
        &self,
        charge: &ChargeVerification,
    ) -> Result<(OrderResponse, bool), ServiceError> {
        let now = Utc::now();

        let claimed = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed),
            )
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Confirmed),
            )
            .col_expr(
                order::Column::UpdatedAt,
                Expr::value(sea_orm::Value::from(now)),
            )
            .filter(order::Column::PaymentReference.eq(charge.reference.clone()))
            .filter(order::Column::PaymentStatus.ne(PaymentStatus::Completed))
            .exec(&*self.db)
            .await?;

        let order = self.load_order_by_reference(&charge.reference).await?;

        if claimed.rows_affected == 0 {
            info!(
                order_id = %order.id,
                reference = %charge.reference,
                "charge already settled, treating as no-op"
            );
            return Ok((self.build_response(order).await?, false));
        }

        // From here on this call owns the transition.
        let details = merge_payment_details(order.payment_details.clone(), charge);
        let mut active: order::ActiveModel = order.clone().into();
        active.payment_details = Set(Some(details));
        let order = active.update(&*self.db).await?;

        append_history(
            &*self.db,
            order.id,
            OrderStatus::Confirmed,
            Some("payment confirmed"),
        )
        .await?;

        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            reference: Set(order.payment_reference.clone()),
            gateway_transaction_id: Set(charge.transaction_id.clone()),
            amount: Set(order.total),
            currency: Set(order.currency.clone()),
            method: Set(charge.channel.clone()),
            status: Set("success".to_string()),
            paid_at: Set(charge.paid_at),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?;
        for item in &items {
            // Stock was only checked at order creation; a concurrent sale may
            // have drained it since. The payment is already captured, so a
            // failed floor check is a fulfilment exception, not a rejection.
            if !self
                .products
                .decrement_stock(item.product_id, item.quantity)
                .await?
            {
                warn!(
                    order_id = %order.id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "insufficient stock at confirmation"
                );
                append_history(
                    &*self.db,
                    order.id,
                    OrderStatus::Confirmed,
                    Some(&format!(
                        "fulfilment exception: insufficient stock for {} x{}",
                        item.product_name, item.quantity
                    )),
                )
                .await?;
            }
        }

        if let Some(code) = &order.coupon_code {
            self.coupons.increment_usage(code).await?;
        }

        self.carts.delete_for_customer(order.customer_id).await?;

        info!(order_id = %order.id, order_number = %order.order_number, "order confirmed");
        self.event_sender
            .send(Event::OrderConfirmed {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_email: order.customer_email.clone(),
                total: order.total,
                currency: order.currency.clone(),
            })
            .await;

        Ok((self.build_response(order).await?, true))
    }

    /// Webhook-only path: a failed charge marks the payment failed while the
    /// order is still pending. Settled orders are never touched.
    #[instrument(skip(self))]
    pub async fn record_failed_charge(
        &self,
        reference: &str,
        reason: Option<&str>,
    ) -> Result<(), ServiceError> {
        let flipped = Order::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(
                order::Column::UpdatedAt,
                Expr::value(sea_orm::Value::from(Utc::now())),
            )
            .filter(order::Column::PaymentReference.eq(reference))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;

        if flipped.rows_affected == 0 {
            return Ok(());
        }

        let order = self.load_order_by_reference(reference).await?;
        append_history(
            &*self.db,
            order.id,
            OrderStatus::Pending,
            Some(reason.unwrap_or("payment attempt failed")),
        )
        .await?;

        self.event_sender
            .send(Event::PaymentFailed {
                order_id: order.id,
                order_number: order.order_number,
                reference: reference.to_string(),
            })
            .await;

        Ok(())
    }

    /// Cancel an order. Allowed for the owning customer or an admin while the
    /// order has not shipped. If the payment already completed a refund is
    /// attempted best-effort: a gateway failure is logged and the
    /// cancellation stands.
    #[instrument(skip(self, user))]
    pub async fn cancel_order(
        &self,
        user: &AuthenticatedUser,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.load_order(order_id).await?;
        if !user.can_access(order.customer_id) {
            return Err(ServiceError::Forbidden(
                "cannot cancel another customer's order".into(),
            ));
        }
        if !order.status.is_cancellable() {
            return Err(ServiceError::InvalidOperation(format!(
                "a {} order cannot be cancelled",
                order.status
            )));
        }

        let had_completed_payment = order.payment_status == PaymentStatus::Completed;

        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(OrderStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        let mut order = active.update(&*self.db).await?;

        append_history(
            &*self.db,
            order.id,
            OrderStatus::Cancelled,
            reason.as_deref().or(Some("cancelled by request")),
        )
        .await?;

        if had_completed_payment {
            order = self.attempt_best_effort_refund(order).await?;
        }

        self.event_sender
            .send(Event::OrderCancelled {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_email: order.customer_email.clone(),
            })
            .await;

        self.build_response(order).await
    }

    async fn attempt_best_effort_refund(
        &self,
        order: order::Model,
    ) -> Result<order::Model, ServiceError> {
        let Some(transaction_id) = gateway_transaction_id(&order) else {
            warn!(order_id = %order.id, "no gateway transaction recorded, skipping refund");
            return Ok(order);
        };

        match self.gateway.create_refund(&transaction_id).await {
            Ok(outcome) => {
                info!(order_id = %order.id, refund_id = %outcome.refund_id, "refund issued");
                let mut active: order::ActiveModel = order.clone().into();
                active.payment_status = Set(PaymentStatus::Refunded);
                active.updated_at = Set(Utc::now());
                let order = active.update(&*self.db).await?;
                append_history(
                    &*self.db,
                    order.id,
                    OrderStatus::Cancelled,
                    Some("payment refunded"),
                )
                .await?;
                self.mark_payment_rows_refunded(order.id).await?;
                Ok(order)
            }
            Err(e) => {
                // Cancellation stands regardless; the refund is retried by
                // support tooling.
                error!(order_id = %order.id, error = %e, "refund attempt failed");
                Ok(order)
            }
        }
    }

    /// Explicit refund flow. Requires a completed payment on an order that is
    /// confirmed, processing or delivered; the gateway call must succeed
    /// before any state changes.
    #[instrument(skip(self, user))]
    pub async fn refund_order(
        &self,
        user: &AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.load_order(order_id).await?;
        if !user.can_access(order.customer_id) {
            return Err(ServiceError::Forbidden(
                "cannot refund another customer's order".into(),
            ));
        }
        if order.payment_status != PaymentStatus::Completed {
            return Err(ServiceError::InvalidOperation(
                "refund requires a completed payment".into(),
            ));
        }
        if !order.status.is_refundable() {
            return Err(ServiceError::InvalidOperation(format!(
                "a {} order cannot be refunded",
                order.status
            )));
        }

        let transaction_id = gateway_transaction_id(&order).ok_or_else(|| {
            ServiceError::InvalidOperation("no gateway transaction recorded for this order".into())
        })?;

        // Gateway failure propagates here and the order is left untouched.
        let outcome = self.gateway.create_refund(&transaction_id).await?;
        info!(order_id = %order.id, refund_id = %outcome.refund_id, "refund created");

        let mut active: order::ActiveModel = order.clone().into();
        active.payment_status = Set(PaymentStatus::Refunded);
        active.status = Set(OrderStatus::Refunded);
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        append_history(
            &*self.db,
            order.id,
            OrderStatus::Refunded,
            Some("refund issued"),
        )
        .await?;
        self.mark_payment_rows_refunded(order.id).await?;

        self.event_sender
            .send(Event::OrderRefunded {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_email: order.customer_email.clone(),
                total: order.total,
                currency: order.currency.clone(),
            })
            .await;

        self.build_response(order).await
    }

    /// Admin-only fulfilment progression. Moves forward along
    /// pending → confirmed → processing → shipped → delivered and appends to
    /// the history; cancel and refund have their own flows.
    #[instrument(skip(self, user))]
    pub async fn update_status(
        &self,
        user: &AuthenticatedUser,
        order_id: Uuid,
        request: UpdateStatusRequest,
    ) -> Result<OrderResponse, ServiceError> {
        user.require_admin()?;

        let order = self.load_order(order_id).await?;

        let Some(new_rank) = request.status.fulfilment_rank() else {
            return Err(ServiceError::InvalidOperation(
                "use the cancel or refund endpoints for terminal states".into(),
            ));
        };
        let Some(current_rank) = order.status.fulfilment_rank() else {
            return Err(ServiceError::InvalidOperation(format!(
                "a {} order cannot change status",
                order.status
            )));
        };
        if new_rank <= current_rank {
            return Err(ServiceError::InvalidOperation(format!(
                "status can only move forward (current: {})",
                order.status
            )));
        }

        let old_status = order.status;
        let mut active: order::ActiveModel = order.clone().into();
        active.status = Set(request.status);
        active.updated_at = Set(Utc::now());
        let order = active.update(&*self.db).await?;

        append_history(&*self.db, order.id, request.status, request.note.as_deref()).await?;

        self.event_sender
            .send(Event::OrderStatusChanged {
                order_id: order.id,
                order_number: order.order_number.clone(),
                customer_email: order.customer_email.clone(),
                old_status: old_status.to_string(),
                new_status: order.status.to_string(),
            })
            .await;

        self.build_response(order).await
    }

    pub async fn get_order(
        &self,
        user: &AuthenticatedUser,
        order_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let order = self.load_order(order_id).await?;
        if !user.can_access(order.customer_id) {
            return Err(ServiceError::Forbidden(
                "cannot view another customer's order".into(),
            ));
        }
        self.build_response(order).await
    }

    /// Customers see their own orders; admins see everything.
    #[instrument(skip(self, user))]
    pub async fn list_orders(
        &self,
        user: &AuthenticatedUser,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let mut query = Order::find().order_by_desc(order::Column::CreatedAt);
        if !user.is_admin() {
            query = query.filter(order::Column::CustomerId.eq(user.customer_id));
        }

        let paginator = query.paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(orders.len());
        for order in orders {
            responses.push(self.build_response(order).await?);
        }

        Ok(OrderListResponse {
            orders: responses,
            total,
            page,
            per_page,
        })
    }

    async fn load_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))
    }

    async fn load_order_by_reference(&self, reference: &str) -> Result<order::Model, ServiceError> {
        Order::find()
            .filter(order::Column::PaymentReference.eq(reference))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no order with payment reference {reference}"))
            })
    }

    async fn mark_payment_rows_refunded(&self, order_id: Uuid) -> Result<(), ServiceError> {
        payment::Entity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(sea_orm::Value::from("refunded")),
            )
            .filter(payment::Column::OrderId.eq(order_id))
            .filter(payment::Column::Status.eq("success"))
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn build_response(&self, order: order::Model) -> Result<OrderResponse, ServiceError> {
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|item| OrderItemResponse {
                product_id: item.product_id,
                product_name: item.product_name,
                sku: item.sku,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
            })
            .collect();

        let status_history = OrderStatusHistory::find()
            .filter(order_status_history::Column::OrderId.eq(order.id))
            .order_by_asc(order_status_history::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|entry| StatusHistoryEntry {
                status: entry.status,
                note: entry.note,
                created_at: entry.created_at,
            })
            .collect();

        Ok(OrderResponse {
            id: order.id,
            order_number: order.order_number,
            payment_reference: order.payment_reference,
            customer_id: order.customer_id,
            customer_email: order.customer_email,
            currency: order.currency,
            subtotal: order.subtotal,
            tax: order.tax,
            shipping_cost: order.shipping_cost,
            discount: order.discount,
            total: order.total,
            coupon_code: order.coupon_code,
            status: order.status,
            payment_status: order.payment_status,
            shipping_address: order.shipping_address,
            billing_address: order.billing_address,
            payment_details: order.payment_details,
            items,
            status_history,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}

/// Append a row to the order's audit trail. Insert-only; nothing ever
/// updates or deletes history rows.
async fn append_history<C: sea_orm::ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: OrderStatus,
    note: Option<&str>,
) -> Result<(), ServiceError> {
    order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status),
        note: Set(note.map(str::to_string)),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

/// Write-once-then-merge of gateway metadata into the order's detail bag.
fn merge_payment_details(
    existing: Option<serde_json::Value>,
    charge: &ChargeVerification,
) -> serde_json::Value {
    let mut details = match existing {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    if let Some(id) = &charge.transaction_id {
        details.insert("transaction_id".into(), serde_json::json!(id));
    }
    if let Some(channel) = &charge.channel {
        details.insert("channel".into(), serde_json::json!(channel));
    }
    if let Some(brand) = &charge.card_brand {
        details.insert("card_brand".into(), serde_json::json!(brand));
    }
    if let Some(last4) = &charge.card_last4 {
        details.insert("card_last4".into(), serde_json::json!(last4));
    }
    if let Some(paid_at) = &charge.paid_at {
        details.insert("paid_at".into(), serde_json::json!(paid_at.to_rfc3339()));
    }
    details.insert(
        "amount_minor".into(),
        serde_json::json!(charge.amount_minor),
    );

    serde_json::Value::Object(details)
}

fn gateway_transaction_id(order: &order::Model) -> Option<String> {
    order
        .payment_details
        .as_ref()
        .and_then(|d| d.get("transaction_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn next_order_number(now: DateTime<Utc>) -> String {
    let seq = ORDER_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("ORD-{}-{seq:04}", now.format("%Y%m%d%H%M%S"))
}

fn new_payment_reference(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("PSK-{}-{}", now.timestamp_millis(), suffix.to_lowercase())
}
