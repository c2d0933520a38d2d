use super::common::{map_service_error, success_response};
use crate::auth::AuthenticatedShopper;
use crate::errors::ApiError;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AddItemParams {
    pub product_id: Uuid,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
    /// Required only when this add opens a new cart
    pub store_id: Option<Uuid>,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityParams {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct GetCartParams {
    /// When present, a missing active cart is created for this store
    pub store_id: Option<Uuid>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_item))
        .route("/update/{item_id}", put(update_item))
        .route("/remove/{item_id}", delete(remove_item))
        .route("/clear", delete(clear_cart))
        .route("/summary", get(cart_summary))
        .route("/checkout", post(checkout))
}

/// GET /api/v1/cart
async fn get_cart(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Query(params): Query<GetCartParams>,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .get_active_cart(shopper_id, params.store_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// POST /api/v1/cart/add
async fn add_item(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Query(params): Query<AddItemParams>,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .add_item(shopper_id, params.product_id, params.quantity, params.store_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// PUT /api/v1/cart/update/{item_id}
async fn update_item(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Path(item_id): Path<Uuid>,
    Query(params): Query<UpdateQuantityParams>,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .update_item_quantity(shopper_id, item_id, params.quantity)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// DELETE /api/v1/cart/remove/{item_id}
async fn remove_item(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .remove_item(shopper_id, item_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// DELETE /api/v1/cart/clear
async fn clear_cart(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .clear(shopper_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}

/// GET /api/v1/cart/summary
async fn cart_summary(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
) -> Result<Response, ApiError> {
    let summary = state
        .services
        .carts
        .summary(shopper_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(summary))
}

/// POST /api/v1/cart/checkout
async fn checkout(
    State(state): State<AppState>,
    AuthenticatedShopper(shopper_id): AuthenticatedShopper,
) -> Result<Response, ApiError> {
    let cart = state
        .services
        .carts
        .start_checkout(shopper_id)
        .await
        .map_err(map_service_error)?;
    Ok(success_response(cart))
}
