pub mod carts;
pub mod common;
pub mod coupons;
pub mod orders;
pub mod products;
pub mod webhooks;

use std::sync::Arc;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    services::{
        carts::CartService, coupons::CouponService, orders::OrderService,
        products::ProductCatalogService,
    },
};

/// Services layer that encapsulates business logic used by HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub products: Arc<ProductCatalogService>,
    pub carts: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DbPool>,
        cfg: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let products = Arc::new(ProductCatalogService::new(db.clone()));
        let coupons = Arc::new(CouponService::new(db.clone()));
        let carts = Arc::new(CartService::new(
            db.clone(),
            coupons.clone(),
            cfg.checkout.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db,
            gateway,
            coupons.clone(),
            products.clone(),
            carts.clone(),
            cfg.checkout.clone(),
            cfg.paystack.callback_url.clone(),
            event_sender,
        ));

        Self {
            products,
            carts,
            coupons,
            orders,
        }
    }
}
