//! Payment service trait and implementations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::{Money, OrderId, Snowflake, UserId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CheckoutError;

/// A charge for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    /// Card number as entered by the user.
    pub instrument: String,
}

/// Proof of a successful charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub trade_no: String,
}

/// Trait for payment processing.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the instrument. Refusals are [`CheckoutError::PaymentDeclined`].
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt, CheckoutError>;
}

/// Card payments: validates the card number and issues a trade number.
///
/// No money moves; a valid request always succeeds.
#[derive(Debug, Clone)]
pub struct CardPaymentService {
    ids: Arc<Snowflake>,
}

impl CardPaymentService {
    pub fn new(ids: Arc<Snowflake>) -> Self {
        Self { ids }
    }
}

#[async_trait]
impl PaymentService for CardPaymentService {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt, CheckoutError> {
        if request.order_id.as_u64() == 0 || request.user_id.is_zero() {
            return Err(CheckoutError::Validation(
                "order_id and user_id are required".to_string(),
            ));
        }
        if !request.amount.is_positive() {
            return Err(CheckoutError::PaymentDeclined(format!(
                "invalid amount {}",
                request.amount
            )));
        }
        if request.instrument.trim().is_empty() {
            return Err(CheckoutError::PaymentDeclined(
                "credit card is required".to_string(),
            ));
        }
        if !is_valid_card_number(&request.instrument) {
            return Err(CheckoutError::PaymentDeclined("invalid credit card".to_string()));
        }

        let trade_no = self.ids.generate().to_string();
        tracing::info!(%trade_no, amount = %request.amount, "Payment charged");
        Ok(PaymentReceipt { trade_no })
    }
}

/// Checks a card number: 13 to 19 digits once spaces and dashes are
/// removed, with a valid Luhn checksum.
pub fn is_valid_card_number(card: &str) -> bool {
    let mut digits = Vec::with_capacity(card.len());
    for ch in card.chars() {
        match ch {
            '0'..='9' => digits.push(ch as u32 - '0' as u32),
            ' ' | '-' => {}
            _ => return false,
        }
    }
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    charges: HashMap<String, PaymentRequest>,
    next_id: u32,
    fail_on_charge: bool,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<InMemoryPaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the service to decline every charge.
    pub async fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().await.fail_on_charge = fail;
    }

    /// Returns the number of successful charges.
    pub async fn charge_count(&self) -> usize {
        self.state.read().await.charges.len()
    }

    /// Returns the charge recorded under a trade number.
    pub async fn charge(&self, trade_no: &str) -> Option<PaymentRequest> {
        self.state.read().await.charges.get(trade_no).cloned()
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn pay(&self, request: &PaymentRequest) -> Result<PaymentReceipt, CheckoutError> {
        let mut state = self.state.write().await;

        if state.fail_on_charge {
            return Err(CheckoutError::PaymentDeclined("Payment declined".to_string()));
        }

        state.next_id += 1;
        let trade_no = format!("PAY-{:04}", state.next_id);
        state.charges.insert(trade_no.clone(), request.clone());

        Ok(PaymentReceipt { trade_no })
    }
}
