//! Checkout and order submission endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use checkout::{CheckoutItem, CheckoutRequest};
use common::{Money, OrderId, UserId};
use domain::{OrderStatus, ShippingAddress};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::{AppState, CheckoutStore};

// -- Request types --

#[derive(Deserialize)]
pub struct AddressRequest {
    pub name: String,
    pub street_address: String,
    pub city: String,
    pub zip_code: String,
}

#[derive(Deserialize)]
pub struct CheckoutBody {
    pub user_id: u64,
    pub email: String,
    pub shipping_address: Option<AddressRequest>,
    #[serde(default)]
    pub credit_card: String,
}

impl CheckoutBody {
    fn into_request(self) -> Result<CheckoutRequest, ApiError> {
        let address = self
            .shipping_address
            .ok_or_else(|| ApiError::BadRequest("shipping_address is required".to_string()))?;
        Ok(CheckoutRequest {
            user_id: UserId::new(self.user_id),
            email: self.email,
            shipping_address: ShippingAddress {
                name: address.name,
                street_address: address.street_address,
                city: address.city,
                zip_code: address.zip_code,
            },
            instrument: self.credit_card,
        })
    }
}

// -- Response types --

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_id: OrderId,
    pub total_amount: Money,
    pub trade_no: String,
    pub items: Vec<CheckoutItem>,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub total_amount: Money,
}

// -- Handlers --

/// POST /checkout — turn the user's cart into a paid order.
#[tracing::instrument(skip(state, body), fields(user_id = body.user_id))]
pub async fn checkout<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    let receipt = state.checkout.checkout(body.into_request()?).await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id: receipt.order_id,
            total_amount: receipt.total,
            trade_no: receipt.trade_no,
            items: receipt.items,
        }),
    ))
}

/// POST /orders — accept the user's cart as an order to be persisted
/// asynchronously and paid later.
#[tracing::instrument(skip(state, body), fields(user_id = body.user_id))]
pub async fn submit<S: CheckoutStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let order = state.checkout.submit_order(body.into_request()?).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            order_id: order.order_id,
            status: order.status,
            total_amount: order.total,
        }),
    ))
}
