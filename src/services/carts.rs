use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::CheckoutConfig,
    entities::{cart, cart_item, product, Cart, CartItem, Product},
    errors::ServiceError,
    services::{
        coupons::{CouponService, ScopeItem},
        pricing::{self, Totals},
    },
};

#[derive(Debug, Deserialize)]
pub struct CreateCartInput {
    pub customer_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartInput {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

/// Cart line enriched with live catalog data for display.
#[derive(Debug, Serialize)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: rust_decimal::Decimal,
    pub line_total: rust_decimal::Decimal,
}

/// Cart plus a non-binding totals preview computed from current catalog
/// prices; checkout recomputes everything server-side.
#[derive(Debug, Serialize)]
pub struct CartDetail {
    pub cart: cart::Model,
    pub items: Vec<CartLine>,
    pub totals: Totals,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    coupons: Arc<CouponService>,
    checkout: CheckoutConfig,
}

impl CartService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: Arc<CouponService>,
        checkout: CheckoutConfig,
    ) -> Self {
        Self {
            db,
            coupons,
            checkout,
        }
    }

    #[instrument(skip(self, input))]
    pub async fn create_cart(&self, input: CreateCartInput) -> Result<cart::Model, ServiceError> {
        if input.customer_id.is_none() && input.session_id.is_none() {
            return Err(ServiceError::ValidationError(
                "a cart needs a customer id or a guest session id".into(),
            ));
        }

        // One live cart per customer: hand back the existing one if present.
        if let Some(customer_id) = input.customer_id {
            if let Some(existing) = Cart::find()
                .filter(cart::Column::CustomerId.eq(customer_id))
                .one(&*self.db)
                .await?
            {
                debug!(cart_id = %existing.id, "returning existing customer cart");
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let model = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(input.customer_id),
            session_id: Set(input.session_id),
            coupon_code: Set(None),
            currency: Set(input
                .currency
                .unwrap_or_else(|| self.checkout.currency.clone())),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        info!(cart_id = %created.id, "cart created");
        Ok(created)
    }

    pub async fn get_cart(&self, cart_id: Uuid) -> Result<CartDetail, ServiceError> {
        let cart = self.find_cart(cart_id).await?;
        self.detail(cart).await
    }

    #[instrument(skip(self, input), fields(product_id = %input.product_id))]
    pub async fn add_item(
        &self,
        cart_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartDetail, ServiceError> {
        input.validate()?;

        let cart = self.find_cart(cart_id).await?;
        let product = Product::find_by_id(input.product_id)
            .one(&*self.db)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {} not found", input.product_id))
            })?;

        let existing = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .filter(cart_item::Column::ProductId.eq(input.product_id))
            .one(&*self.db)
            .await?;

        let requested = input.quantity + existing.as_ref().map_or(0, |i| i.quantity);
        if product.stock_quantity < requested {
            return Err(ServiceError::InsufficientStock(format!(
                "only {} of {} in stock",
                product.stock_quantity, product.name
            )));
        }

        let now = Utc::now();
        match existing {
            Some(item) => {
                let mut active: cart_item::ActiveModel = item.into();
                active.quantity = Set(requested);
                active.unit_price = Set(product.selling_price());
                active.updated_at = Set(now);
                active.update(&*self.db).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart_id),
                    product_id: Set(input.product_id),
                    quantity: Set(input.quantity),
                    unit_price: Set(product.selling_price()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.touch(cart).await
    }

    /// Set a line's quantity; zero removes the line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        cart_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartDetail, ServiceError> {
        if quantity < 0 {
            return Err(ServiceError::ValidationError(
                "quantity cannot be negative".into(),
            ));
        }

        let cart = self.find_cart(cart_id).await?;
        let item = CartItem::find_by_id(item_id)
            .one(&*self.db)
            .await?
            .filter(|i| i.cart_id == cart_id)
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {item_id} not found")))?;

        if quantity == 0 {
            item.delete(&*self.db).await?;
            return self.touch(cart).await;
        }

        let product = Product::find_by_id(item.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("product no longer exists".into()))?;
        if product.stock_quantity < quantity {
            return Err(ServiceError::InsufficientStock(format!(
                "only {} of {} in stock",
                product.stock_quantity, product.name
            )));
        }

        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&*self.db).await?;

        self.touch(cart).await
    }

    #[instrument(skip(self))]
    pub async fn apply_coupon(&self, cart_id: Uuid, code: &str) -> Result<CartDetail, ServiceError> {
        let cart = self.find_cart(cart_id).await?;
        let (lines, scope, subtotal) = self.load_lines(cart_id).await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "cannot apply a coupon to an empty cart".into(),
            ));
        }

        let code = code.trim().to_uppercase();
        self.coupons.validate(&code, subtotal, &scope).await?;

        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(Some(code));
        active.updated_at = Set(Utc::now());
        let cart = active.update(&*self.db).await?;

        self.detail(cart).await
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, cart_id: Uuid) -> Result<CartDetail, ServiceError> {
        let cart = self.find_cart(cart_id).await?;
        let mut active: cart::ActiveModel = cart.into();
        active.coupon_code = Set(None);
        active.updated_at = Set(Utc::now());
        let cart = active.update(&*self.db).await?;
        self.detail(cart).await
    }

    /// Delete the customer's cart document outright. Invoked once an order is
    /// confirmed; missing carts are fine (guest checkout, repeat webhook).
    #[instrument(skip(self))]
    pub async fn delete_for_customer(&self, customer_id: Uuid) -> Result<(), ServiceError> {
        let deleted = Cart::delete_many()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .exec(&*self.db)
            .await?;
        debug!(%customer_id, rows = deleted.rows_affected, "customer cart cleared");
        Ok(())
    }

    async fn find_cart(&self, cart_id: Uuid) -> Result<cart::Model, ServiceError> {
        Cart::find_by_id(cart_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart {cart_id} not found")))
    }

    async fn touch(&self, cart: cart::Model) -> Result<CartDetail, ServiceError> {
        let mut active: cart::ActiveModel = cart.into();
        active.updated_at = Set(Utc::now());
        let cart = active.update(&*self.db).await?;
        self.detail(cart).await
    }

    async fn load_lines(
        &self,
        cart_id: Uuid,
    ) -> Result<(Vec<CartLine>, Vec<ScopeItem>, rust_decimal::Decimal), ServiceError> {
        let rows: Vec<(cart_item::Model, Option<product::Model>)> = CartItem::find()
            .find_also_related(Product)
            .filter(cart_item::Column::CartId.eq(cart_id))
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(rows.len());
        let mut scope = Vec::with_capacity(rows.len());
        let mut subtotal = rust_decimal::Decimal::ZERO;

        for (item, product) in rows {
            let product = product.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "cart item {} references a missing product",
                    item.id
                ))
            })?;
            let unit_price = product.selling_price();
            let line_total = unit_price * rust_decimal::Decimal::from(item.quantity);
            subtotal += line_total;
            scope.push(ScopeItem {
                product_id: product.id,
                category: product.category.clone(),
            });
            lines.push(CartLine {
                id: item.id,
                product_id: product.id,
                product_name: product.name,
                quantity: item.quantity,
                unit_price,
                line_total,
            });
        }

        Ok((lines, scope, subtotal))
    }

    async fn detail(&self, cart: cart::Model) -> Result<CartDetail, ServiceError> {
        let (items, scope, subtotal) = self.load_lines(cart.id).await?;

        // Preview the coupon; a stale code shows as zero discount rather than
        // blocking the cart read.
        let discount = match &cart.coupon_code {
            Some(code) => match self.coupons.validate(code, subtotal, &scope).await {
                Ok(coupon) => self.coupons.calculate_discount(&coupon, subtotal),
                Err(e) => {
                    debug!(code, error = %e, "cart coupon no longer valid");
                    rust_decimal::Decimal::ZERO
                }
            },
            None => rust_decimal::Decimal::ZERO,
        };

        let totals = pricing::compute_totals(&self.checkout, subtotal, discount);

        Ok(CartDetail {
            cart,
            items,
            totals,
        })
    }
}
