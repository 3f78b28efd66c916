//! Persisted records.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, SkuId, UserId};
use serde::{Deserialize, Serialize};

/// A catalog row carrying the stock counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub sku_id: SkuId,
    pub name: String,
    pub price: Money,
    pub available_stock: i64,
    pub locked_stock: i64,
    pub version: i64,
    pub sale_count: i64,
}

impl Sku {
    /// Creates a SKU with `stock` units available and nothing locked.
    pub fn new(sku_id: SkuId, name: impl Into<String>, price: Money, stock: i64) -> Self {
        Self {
            sku_id,
            name: name.into(),
            price,
            available_stock: stock,
            locked_stock: 0,
            version: 1,
            sale_count: 0,
        }
    }

    pub fn stock_level(&self) -> StockLevel {
        StockLevel {
            available: self.available_stock,
            locked: self.locked_stock,
            version: self.version,
        }
    }
}

/// Snapshot of a SKU's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub available: i64,
    pub locked: i64,
    pub version: i64,
}

impl StockLevel {
    /// Units the ledger accounts for; unchanged by matched deduct/release pairs.
    pub fn total(&self) -> i64 {
        self.available + self.locked
    }
}

/// Lifecycle status of an order.
///
/// ```text
/// Placed ──┬──► Paid
///          └──► Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Stock is locked, awaiting payment.
    #[default]
    Placed,

    /// Payment captured (terminal state).
    Paid,

    /// Order abandoned or compensated, stock released (terminal state).
    Canceled,
}

impl OrderStatus {
    /// Returns true if payment may be recorded in this state.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Placed)
    }

    /// Returns true if the order can be canceled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Placed)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Canceled)
    }

    /// Returns the status as stored in the `orders.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Paid => "paid",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "placed" => Ok(OrderStatus::Placed),
            "paid" => Ok(OrderStatus::Paid),
            "canceled" => Ok(OrderStatus::Canceled),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub street_address: String,
    pub city: String,
    pub zip_code: String,
}

/// A line of an order. Name and price are copied from the catalog when the
/// order is created and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl OrderItem {
    /// Unit price times quantity, unrounded.
    pub fn line_total(&self) -> Money {
        self.price.multiply(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub email: String,
    pub shipping_address: ShippingAddress,
    pub status: OrderStatus,
    pub total: Money,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

impl Order {
    /// Sums the line totals and rounds once.
    pub fn total_of(items: &[OrderItem]) -> Money {
        items
            .iter()
            .map(OrderItem::line_total)
            .sum::<Money>()
            .round_total()
    }
}

/// One entry of a user's cart as stored; quantities are not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku_id: SkuId,
    pub quantity: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: &str, quantity: u32) -> OrderItem {
        OrderItem {
            order_id: OrderId::new(1),
            sku_id: SkuId::new(100),
            name: "widget".to_string(),
            price: price.parse().unwrap(),
            quantity,
        }
    }

    #[test]
    fn test_default_status_is_placed() {
        assert_eq!(OrderStatus::default(), OrderStatus::Placed);
    }

    #[test]
    fn test_only_placed_can_transition() {
        assert!(OrderStatus::Placed.can_mark_paid());
        assert!(!OrderStatus::Paid.can_mark_paid());
        assert!(!OrderStatus::Canceled.can_mark_paid());

        assert!(OrderStatus::Placed.can_cancel());
        assert!(!OrderStatus::Paid.can_cancel());
        assert!(!OrderStatus::Canceled.can_cancel());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!OrderStatus::Placed.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_status_string_forms_agree() {
        for status in [OrderStatus::Placed, OrderStatus::Paid, OrderStatus::Canceled] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("shipped".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_total_rounds_once() {
        assert_eq!(Order::total_of(&[item("19.99", 2)]).to_string(), "39.98");
        assert_eq!(
            Order::total_of(&[item("0.005", 1), item("0.005", 1), item("0.005", 1)]).to_string(),
            "0.02"
        );
        assert!(Order::total_of(&[]).is_zero());
    }

    #[test]
    fn test_stock_level_total() {
        let sku = Sku::new(SkuId::new(1), "a", Money::from_cents(100), 5);
        let level = sku.stock_level();
        assert_eq!(level.total(), 5);
        assert_eq!(level.version, 1);
    }
}
