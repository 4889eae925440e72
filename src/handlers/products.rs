use axum::{
    extract::{Json, Path, Query, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, PaginationParams},
    services::products::{CreateProductInput, UpdateProductInput},
    AppState,
};

/// Creates the router for catalog endpoints. Reads are public; writes are
/// admin-only.
pub fn products_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/:id", get(get_product).put(update_product))
        .route("/slug/:slug", get(get_product_by_slug))
}

/// List active products
async fn list_products(
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl IntoResponse, ServiceError> {
    let page = state
        .services
        .products
        .list_products(pagination.page, pagination.per_page)
        .await?;

    Ok(success_response(json!({
        "products": page.products,
        "total": page.total,
        "page": pagination.page,
        "per_page": pagination.per_page,
    })))
}

/// Fetch a product by id
async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.get_product(id).await?;
    Ok(success_response(product))
}

/// Fetch a product by slug
async fn get_product_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let product = state.services.products.get_by_slug(&slug).await?;
    Ok(success_response(product))
}

/// Create a product (admin)
async fn create_product(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let product = state.services.products.create_product(payload).await?;
    Ok(created_response(product))
}

/// Update a product (admin)
async fn update_product(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ServiceError> {
    user.require_admin()?;
    let product = state.services.products.update_product(id, payload).await?;
    Ok(success_response(product))
}
