use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{product, Product},
    errors::ServiceError,
};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductInput {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub slug: Option<String>,
    #[validate(length(min = 1, max = 60))]
    pub sku: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub discount_price: Option<Decimal>,
    #[serde(default)]
    pub stock_quantity: i32,
    pub category: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateProductInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    /// `Some(None)` clears the promotional price.
    #[serde(default, with = "double_option")]
    pub discount_price: Option<Option<Decimal>>,
    pub stock_quantity: Option<i32>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

#[derive(Debug)]
pub struct ProductPage {
    pub products: Vec<product::Model>,
    pub total: u64,
}

#[derive(Clone)]
pub struct ProductCatalogService {
    db: Arc<DatabaseConnection>,
}

impl ProductCatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(sku = %input.sku))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;

        if input.price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "price must be positive".into(),
            ));
        }
        if let Some(discount) = input.discount_price {
            if discount <= Decimal::ZERO || discount >= input.price {
                return Err(ServiceError::ValidationError(
                    "discount price must be positive and below the list price".into(),
                ));
            }
        }
        if input.stock_quantity < 0 {
            return Err(ServiceError::ValidationError(
                "stock quantity cannot be negative".into(),
            ));
        }

        let slug = input.slug.unwrap_or_else(|| slugify(&input.name));
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            slug: Set(slug),
            sku: Set(input.sku),
            description: Set(input.description),
            price: Set(input.price),
            discount_price: Set(input.discount_price),
            stock_quantity: Set(input.stock_quantity),
            category: Set(input.category),
            is_active: Set(input.is_active),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let created = model.insert(&*self.db).await?;
        info!(product_id = %created.id, "product created");
        Ok(created)
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<product::Model, ServiceError> {
        let existing = self.get_product(id).await?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(price) = input.price {
            if price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "price must be positive".into(),
                ));
            }
            active.price = Set(price);
        }
        if let Some(discount_price) = input.discount_price {
            active.discount_price = Set(discount_price);
        }
        if let Some(stock) = input.stock_quantity {
            if stock < 0 {
                return Err(ServiceError::ValidationError(
                    "stock quantity cannot be negative".into(),
                ));
            }
            active.stock_quantity = Set(stock);
        }
        if let Some(category) = input.category {
            active.category = Set(Some(category));
        }
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Utc::now());

        Ok(active.update(&*self.db).await?)
    }

    pub async fn get_product(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        Product::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {id} not found")))
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<product::Model, ServiceError> {
        Product::find()
            .filter(product::Column::Slug.eq(slug))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {slug} not found")))
    }

    /// Storefront listing: active products only, newest first.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<ProductPage, ServiceError> {
        let paginator = Product::find()
            .filter(product::Column::IsActive.eq(true))
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok(ProductPage { products, total })
    }

    /// Atomically decrement stock with a floor check; returns `false` when
    /// the product had fewer than `quantity` units left (nothing is written).
    #[instrument(skip(self))]
    pub async fn decrement_stock(
        &self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let result = Product::update_many()
            .col_expr(
                product::Column::StockQuantity,
                Expr::col(product::Column::StockQuantity).sub(quantity),
            )
            .col_expr(
                product::Column::UpdatedAt,
                Expr::value(sea_orm::Value::from(Utc::now())),
            )
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::StockQuantity.gte(quantity))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            warn!(%product_id, quantity, "stock decrement refused by floor check");
            return Ok(false);
        }
        Ok(true)
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Aurora Desk Lamp"), "aurora-desk-lamp");
        assert_eq!(slugify("Café -- Chair! "), "caf-chair");
        assert_eq!(slugify("X"), "x");
    }
}
