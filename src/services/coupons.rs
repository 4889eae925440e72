use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        coupon::{self, DiscountType},
        Coupon,
    },
    errors::ServiceError,
};

/// A line the coupon scope is checked against: the product and its category.
#[derive(Debug, Clone)]
pub struct ScopeItem {
    pub product_id: Uuid,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 40))]
    pub code: String,
    pub description: Option<String>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub usage_limit: Option<i32>,
    pub starts_at: chrono::DateTime<Utc>,
    pub expires_at: chrono::DateTime<Utc>,
    #[serde(default)]
    pub applicable_product_ids: Vec<Uuid>,
    #[serde(default)]
    pub applicable_categories: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CouponPreview {
    pub code: String,
    pub discount: Decimal,
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validate a coupon code against an order's subtotal and line items.
    /// Every rule failure is a `ValidationError`; callers reject the whole
    /// order with no mutation.
    #[instrument(skip(self, items))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
        items: &[ScopeItem],
    ) -> Result<coupon::Model, ServiceError> {
        let coupon = Coupon::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::ValidationError(format!("unknown coupon: {code}")))?;

        if !coupon.is_active {
            return Err(ServiceError::ValidationError(format!(
                "coupon {code} is not active"
            )));
        }

        let now = Utc::now();
        if now < coupon.starts_at || now > coupon.expires_at {
            return Err(ServiceError::ValidationError(format!(
                "coupon {code} is outside its validity window"
            )));
        }

        if let Some(limit) = coupon.usage_limit {
            if coupon.usage_count >= limit {
                return Err(ServiceError::ValidationError(format!(
                    "coupon {code} has reached its usage limit"
                )));
            }
        }

        if let Some(min) = coupon.min_purchase_amount {
            if subtotal < min {
                return Err(ServiceError::ValidationError(format!(
                    "order subtotal is below the coupon minimum of {min}"
                )));
            }
        }

        if !Self::scope_matches(&coupon, items) {
            return Err(ServiceError::ValidationError(format!(
                "coupon {code} does not apply to any item in this order"
            )));
        }

        Ok(coupon)
    }

    /// Scope rule: an empty scope applies store-wide; otherwise at least one
    /// line must match the coupon's product or category lists.
    fn scope_matches(coupon: &coupon::Model, items: &[ScopeItem]) -> bool {
        let product_scope = coupon.product_scope();
        let category_scope = coupon.category_scope();

        if product_scope.is_empty() && category_scope.is_empty() {
            return true;
        }

        items.iter().any(|item| {
            product_scope.contains(&item.product_id)
                || item
                    .category
                    .as_ref()
                    .is_some_and(|c| category_scope.iter().any(|s| s.eq_ignore_ascii_case(c)))
        })
    }

    /// Discount for a validated coupon, clamped to `max_discount_amount` and
    /// never exceeding the subtotal.
    pub fn calculate_discount(&self, coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
        let discount = match coupon.discount_type {
            DiscountType::Percentage => {
                (subtotal * coupon.discount_value / dec!(100)).round_dp(2)
            }
            DiscountType::FixedAmount => coupon.discount_value,
        };

        let discount = match coupon.max_discount_amount {
            Some(cap) => discount.min(cap),
            None => discount,
        };

        discount.min(subtotal).max(Decimal::ZERO)
    }

    /// Bump the usage counter with a single atomic increment. Called exactly
    /// once per confirmed order, inside the confirmation winner's side-effect
    /// block, so the webhook/verify race cannot double-count.
    #[instrument(skip(self))]
    pub async fn increment_usage(&self, code: &str) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::UsageCount,
                Expr::col(coupon::Column::UsageCount).add(1),
            )
            .col_expr(
                coupon::Column::UpdatedAt,
                Expr::value(sea_orm::Value::from(Utc::now())),
            )
            .filter(coupon::Column::Code.eq(code))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            // The code was snapshotted on the order; the coupon being gone is
            // an audit curiosity, not an order failure.
            warn!(code, "coupon missing at usage increment");
        } else {
            debug!(code, "coupon usage incremented");
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CreateCouponInput) -> Result<coupon::Model, ServiceError> {
        input.validate()?;

        if input.discount_value <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "discount value must be positive".into(),
            ));
        }
        if input.expires_at <= input.starts_at {
            return Err(ServiceError::ValidationError(
                "expiry must be after the start date".into(),
            ));
        }
        if matches!(input.discount_type, DiscountType::Percentage)
            && input.discount_value > dec!(100)
        {
            return Err(ServiceError::ValidationError(
                "percentage discount cannot exceed 100".into(),
            ));
        }

        let now = Utc::now();
        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(input.code.to_uppercase()),
            description: Set(input.description),
            discount_type: Set(input.discount_type),
            discount_value: Set(input.discount_value),
            min_purchase_amount: Set(input.min_purchase_amount),
            max_discount_amount: Set(input.max_discount_amount),
            usage_limit: Set(input.usage_limit),
            usage_count: Set(0),
            starts_at: Set(input.starts_at),
            expires_at: Set(input.expires_at),
            is_active: Set(true),
            applicable_product_ids: Set(Some(serde_json::json!(input
                .applicable_product_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()))),
            applicable_categories: Set(Some(serde_json::json!(input.applicable_categories))),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(&*self.db).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon_fixture(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SAVE10".to_string(),
            description: None,
            discount_type,
            discount_value: value,
            min_purchase_amount: None,
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
            starts_at: now - Duration::days(1),
            expires_at: now + Duration::days(30),
            is_active: true,
            applicable_product_ids: None,
            applicable_categories: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn service() -> CouponService {
        CouponService::new(Arc::new(DatabaseConnection::Disconnected))
    }

    #[test]
    fn percentage_discount() {
        let coupon = coupon_fixture(DiscountType::Percentage, dec!(10));
        assert_eq!(service().calculate_discount(&coupon, dec!(60000)), dec!(6000));
    }

    #[test]
    fn percentage_discount_clamps_to_cap() {
        let mut coupon = coupon_fixture(DiscountType::Percentage, dec!(10));
        coupon.max_discount_amount = Some(dec!(1500));
        assert_eq!(service().calculate_discount(&coupon, dec!(60000)), dec!(1500));
    }

    #[test]
    fn fixed_discount_never_exceeds_subtotal() {
        let coupon = coupon_fixture(DiscountType::FixedAmount, dec!(5000));
        assert_eq!(service().calculate_discount(&coupon, dec!(1200)), dec!(1200));
    }

    #[test]
    fn empty_scope_applies_store_wide() {
        let coupon = coupon_fixture(DiscountType::Percentage, dec!(5));
        let items = [ScopeItem {
            product_id: Uuid::new_v4(),
            category: None,
        }];
        assert!(CouponService::scope_matches(&coupon, &items));
    }

    #[test]
    fn product_scope_requires_a_matching_line() {
        let in_scope = Uuid::new_v4();
        let mut coupon = coupon_fixture(DiscountType::Percentage, dec!(5));
        coupon.applicable_product_ids =
            Some(serde_json::json!([in_scope.to_string()]));

        let miss = [ScopeItem {
            product_id: Uuid::new_v4(),
            category: None,
        }];
        assert!(!CouponService::scope_matches(&coupon, &miss));

        let hit = [ScopeItem {
            product_id: in_scope,
            category: None,
        }];
        assert!(CouponService::scope_matches(&coupon, &hit));
    }

    #[test]
    fn category_scope_is_case_insensitive() {
        let mut coupon = coupon_fixture(DiscountType::Percentage, dec!(5));
        coupon.applicable_categories = Some(serde_json::json!(["Accessories"]));

        let items = [ScopeItem {
            product_id: Uuid::new_v4(),
            category: Some("accessories".to_string()),
        }];
        assert!(CouponService::scope_matches(&coupon, &items));
    }
}
