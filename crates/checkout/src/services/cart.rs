//! Cart lookup.

use async_trait::async_trait;
use common::UserId;
use store::{CartLine, CartStore};

use crate::error::CheckoutError;

/// Reads a user's cart.
#[async_trait]
pub trait CartService: Send + Sync {
    /// Returns the cart lines as stored, duplicates included.
    async fn get_cart(&self, user_id: UserId) -> Result<Vec<CartLine>, CheckoutError>;
}

/// Cart service backed by a [`CartStore`].
#[derive(Debug, Clone)]
pub struct StoreCartService<S> {
    store: S,
}

impl<S: CartStore> StoreCartService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: CartStore> CartService for StoreCartService<S> {
    async fn get_cart(&self, user_id: UserId) -> Result<Vec<CartLine>, CheckoutError> {
        self.store
            .cart_lines(user_id)
            .await
            .map_err(|e| CheckoutError::RemoteCall {
                step: "get_cart",
                reason: e.to_string(),
            })
    }
}
