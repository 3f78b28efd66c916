//! Order commands.

use common::{Money, SkuId, UserId};
use store::ShippingAddress;

use crate::error::{DomainError, Result};

/// One line to place, with name and price already taken from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub sku_id: SkuId,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(sku_id: SkuId, name: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            sku_id,
            name: name.into(),
            price,
            quantity,
        }
    }
}

/// Command to place a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    /// The purchasing user.
    pub user_id: UserId,

    /// Contact address for the order.
    pub email: String,

    /// Where the order ships to.
    pub shipping_address: ShippingAddress,

    /// Lines in the order they appear on the order.
    pub lines: Vec<OrderLine>,
}

impl PlaceOrder {
    /// Creates a new PlaceOrder command.
    pub fn new(
        user_id: UserId,
        email: impl Into<String>,
        shipping_address: ShippingAddress,
        lines: Vec<OrderLine>,
    ) -> Self {
        Self {
            user_id,
            email: email.into(),
            shipping_address,
            lines,
        }
    }

    /// Checks the command's shape before anything is locked or written.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_zero() {
            return Err(DomainError::Validation("user_id is required".to_string()));
        }
        if self.lines.is_empty() {
            return Err(DomainError::Validation("order has no items".to_string()));
        }
        for line in &self.lines {
            if line.sku_id.is_zero() {
                return Err(DomainError::Validation("sku_id is required".to_string()));
            }
            if line.quantity == 0 {
                return Err(DomainError::Validation(format!(
                    "quantity for sku {} must be greater than 0",
                    line.sku_id
                )));
            }
        }
        Ok(())
    }
}
