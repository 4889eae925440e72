//! Test harness: an application state over in-memory SQLite plus a scripted
//! payment gateway double.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, Response, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, Set};
use sea_orm_migration::MigratorTrait;
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    auth::issue_token,
    config::{AppConfig, CheckoutConfig, EmailConfig, PaystackConfig},
    entities::{
        coupon,
        customer::{self, CustomerRole},
        product,
    },
    errors::ServiceError,
    events::EventSender,
    gateway::{
        ChargeStatus, ChargeVerification, InitializeRequest, PaymentGateway, PaymentSession,
        RefundOutcome,
    },
    handlers::AppServices,
    migrator::Migrator,
    AppState,
};

pub const JWT_SECRET: &str = "integration_test_secret_key_0123456789abcdef";
pub const WEBHOOK_SECRET: &str = "sk_test_webhook_secret";

/// Scripted stand-in for the Paystack client. Records every call and can be
/// told to fail initialization or refunds, or to answer verification with a
/// canned charge per reference.
#[derive(Default)]
pub struct ScriptedGateway {
    pub fail_initialize: AtomicBool,
    pub fail_refund: AtomicBool,
    pub initialize_calls: Mutex<Vec<InitializeRequest>>,
    pub refund_calls: Mutex<Vec<String>>,
    pub verify_responses: Mutex<HashMap<String, ChargeVerification>>,
}

impl ScriptedGateway {
    /// Default verification answer: a successful card charge.
    pub fn successful_charge(reference: &str) -> ChargeVerification {
        ChargeVerification {
            reference: reference.to_string(),
            status: ChargeStatus::Success,
            transaction_id: Some("4099260516".to_string()),
            amount_minor: 0,
            currency: "NGN".to_string(),
            channel: Some("card".to_string()),
            card_brand: Some("visa".to_string()),
            card_last4: Some("4081".to_string()),
            paid_at: Some(Utc::now()),
        }
    }

    pub fn script_verification(&self, reference: &str, charge: ChargeVerification) {
        self.verify_responses
            .lock()
            .unwrap()
            .insert(reference.to_string(), charge);
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initialize_transaction(
        &self,
        request: &InitializeRequest,
    ) -> Result<PaymentSession, ServiceError> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "initialize transaction: gateway unavailable".into(),
            ));
        }
        self.initialize_calls.lock().unwrap().push(request.clone());
        Ok(PaymentSession {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: format!("AC_{}", request.reference),
            reference: request.reference.clone(),
        })
    }

    async fn verify_transaction(
        &self,
        reference: &str,
    ) -> Result<ChargeVerification, ServiceError> {
        let scripted = self.verify_responses.lock().unwrap().get(reference).cloned();
        Ok(scripted.unwrap_or_else(|| Self::successful_charge(reference)))
    }

    async fn create_refund(&self, transaction_id: &str) -> Result<RefundOutcome, ServiceError> {
        if self.fail_refund.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayError(
                "create refund: gateway unavailable".into(),
            ));
        }
        self.refund_calls
            .lock()
            .unwrap()
            .push(transaction_id.to_string());
        Ok(RefundOutcome {
            refund_id: "90210".to_string(),
            status: "processed".to_string(),
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<ScriptedGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_string());
        // A single connection keeps every query on the same in-memory database.
        options
            .max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let db = Database::connect(options)
            .await
            .expect("in-memory sqlite connects");
        Migrator::up(&db, None).await.expect("migrations apply");
        let db = Arc::new(db);

        let cfg = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: JWT_SECRET.to_string(),
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            log_level: "warn".to_string(),
            log_json: false,
            auto_migrate: false,
            paystack: PaystackConfig {
                secret_key: WEBHOOK_SECRET.to_string(),
                webhook_secret: None,
                base_url: "http://paystack.invalid".to_string(),
                timeout_secs: 5,
                callback_url: Some("https://shop.test/checkout/complete".to_string()),
            },
            checkout: CheckoutConfig::default(),
            email: EmailConfig {
                from_address: "orders@test".to_string(),
                max_attempts: 1,
                retry_backoff_secs: 0,
            },
        };

        let gateway = Arc::new(ScriptedGateway::default());

        let (event_tx, mut event_rx) = mpsc::channel(64);
        // Drain events so senders never block; notification content is
        // covered by unit tests.
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        let event_sender = EventSender::new(event_tx);

        let services = AppServices::new(db.clone(), &cfg, gateway.clone(), event_sender.clone());
        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services,
        };
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
        }
    }

    pub async fn seed_customer(&self, email: &str, role: CustomerRole) -> (Uuid, String) {
        let id = Uuid::new_v4();
        customer::ActiveModel {
            id: Set(id),
            email: Set(email.to_string()),
            name: Set("Test Customer".to_string()),
            role: Set(role),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("customer inserts");

        let token = issue_token(id, email, role, JWT_SECRET, 3600).expect("token issues");
        (id, token)
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.seed_product_in_category(name, price, stock, None)
            .await
    }

    pub async fn seed_product_in_category(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        category: Option<&str>,
    ) -> product::Model {
        let id = Uuid::new_v4();
        let now = Utc::now();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            slug: Set(format!("{}-{}", name.to_lowercase().replace(' ', "-"), id)),
            sku: Set(format!("SKU-{id}")),
            description: Set(None),
            price: Set(price),
            discount_price: Set(None),
            stock_quantity: Set(stock),
            category: Set(category.map(str::to_string)),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("product inserts")
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        discount_type: coupon::DiscountType,
        value: Decimal,
        min_purchase: Option<Decimal>,
        max_discount: Option<Decimal>,
    ) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            description: Set(None),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            min_purchase_amount: Set(min_purchase),
            max_discount_amount: Set(max_discount),
            usage_limit: Set(None),
            usage_count: Set(0),
            starts_at: Set(now - chrono::Duration::days(1)),
            expires_at: Set(now + chrono::Duration::days(30)),
            is_active: Set(true),
            applicable_product_ids: Set(None),
            applicable_categories: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("coupon inserts")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .expect("request builds"),
            None => builder.body(Body::empty()).expect("request builds"),
        };

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router handles request")
    }
}

impl TestApp {
    /// Deliver a raw webhook body with an optional signature header.
    pub async fn post_webhook(&self, body: &str, signature: Option<&str>) -> Response<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/paystack")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-paystack-signature", signature);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("request builds");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router handles request")
    }
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected response status");
}

pub fn decimal_field(value: &Value, field: &str) -> Decimal {
    let raw = &value[field];
    if let Some(s) = raw.as_str() {
        s.parse().unwrap_or_else(|_| panic!("{field} parses: {s}"))
    } else {
        raw.to_string()
            .parse()
            .unwrap_or_else(|_| panic!("{field} parses: {raw}"))
    }
}
