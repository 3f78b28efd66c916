//! Order lookup and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{OrderId, UserId};
use domain::{Order, OrderStatus};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::{AppState, CheckoutStore};

#[derive(Serialize)]
pub struct CancelResponse {
    pub order_id: OrderId,
    pub outcome: &'static str,
}

#[derive(Serialize)]
pub struct PaidResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
}

/// GET /orders/{id} — load an order with its items.
#[tracing::instrument(skip(state))]
pub async fn get<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(order))
}

/// GET /users/{id}/orders — a user's orders, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_for_user<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(user_id): Path<u64>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = state.orders.list_orders(UserId::new(user_id)).await?;
    Ok(Json(orders))
}

/// POST /orders/{id}/cancel — cancel a placed order and release its stock.
#[tracing::instrument(skip(state))]
pub async fn cancel<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let outcome = state.orders.cancel(order_id).await?;
    Ok(Json(CancelResponse {
        order_id,
        outcome: outcome.as_str(),
    }))
}

/// POST /orders/{id}/paid — record payment for a placed order.
#[tracing::instrument(skip(state))]
pub async fn mark_paid<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<PaidResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.orders.mark_paid(order_id).await?;
    Ok(Json(PaidResponse {
        order_id,
        status: OrderStatus::Paid,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid order id: {id}")))
}
