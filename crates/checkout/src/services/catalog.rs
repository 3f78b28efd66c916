//! Live SKU lookup.

use std::collections::HashMap;

use async_trait::async_trait;
use common::SkuId;
use store::{Sku, SkuCatalog};

use crate::error::CheckoutError;

/// Batch lookup of current SKU name, price and stock.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Returns the SKUs that exist; missing ids are simply absent.
    async fn get_skus_by_ids(&self, sku_ids: &[SkuId])
    -> Result<HashMap<SkuId, Sku>, CheckoutError>;
}

/// Catalog service backed by a [`SkuCatalog`].
#[derive(Debug, Clone)]
pub struct StoreCatalogService<S> {
    store: S,
}

impl<S: SkuCatalog> StoreCatalogService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: SkuCatalog> CatalogService for StoreCatalogService<S> {
    async fn get_skus_by_ids(
        &self,
        sku_ids: &[SkuId],
    ) -> Result<HashMap<SkuId, Sku>, CheckoutError> {
        self.store
            .get_skus_by_ids(sku_ids)
            .await
            .map_err(|e| CheckoutError::RemoteCall {
                step: "get_skus",
                reason: e.to_string(),
            })
    }
}
