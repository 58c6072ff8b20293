//! Stock Ledger
//!
//! Reservation resolves and checks every requested line first, then applies
//! the whole batch through one conditional store call, so a multi-line
//! checkout either takes all of its stock or none of it.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{OrderItem, Product, ProductVariant};
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::domain::value_objects::VariantSelection;
use crate::publisher::EventPublisher;
use crate::store::{CatalogStore, StockMovement};
use crate::{EcommerceError, Result};

/// Quantity of a product, optionally narrowed to a variant by attributes.
#[derive(Clone, Debug)]
pub struct StockRequest {
    pub product_id: Uuid,
    pub quantity: u32,
    pub selection: VariantSelection,
}

impl StockRequest {
    pub fn new(product_id: Uuid, quantity: u32, selection: VariantSelection) -> Self {
        Self { product_id, quantity, selection }
    }
}

impl From<&OrderItem> for StockRequest {
    fn from(item: &OrderItem) -> Self { Self::new(item.product_id, item.quantity, item.selection()) }
}

/// A request with its product and variant looked up.
#[derive(Clone, Debug)]
pub struct ResolvedLine {
    pub product: Product,
    pub variant: Option<ProductVariant>,
    pub quantity: u32,
}

impl ResolvedLine {
    pub fn label(&self) -> String {
        match &self.variant {
            Some(v) => v.label(&self.product.name),
            None => self.product.name.clone(),
        }
    }

    /// Stock sufficiency against the snapshot read during resolution.
    pub fn check(&self) -> Result<()> {
        if self.quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
        if self.product.total_stock < self.quantity {
            return Err(EcommerceError::InsufficientStock {
                item: self.product.name.clone(), requested: self.quantity, available: self.product.total_stock,
            });
        }
        if let Some(v) = &self.variant {
            if !v.is_active { return Err(EcommerceError::ProductUnavailable(self.label())); }
            if v.stock_quantity < self.quantity {
                return Err(EcommerceError::InsufficientStock {
                    item: self.label(), requested: self.quantity, available: v.stock_quantity,
                });
            }
        }
        Ok(())
    }

    fn movement(&self) -> StockMovement {
        StockMovement {
            product_id: self.product.id,
            variant_id: self.variant.as_ref().map(|v| v.id),
            quantity: self.quantity,
            label: self.label(),
        }
    }
}

#[derive(Clone)]
pub struct StockLedger {
    catalog: Arc<dyn CatalogStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl StockLedger {
    pub fn new(catalog: Arc<dyn CatalogStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { catalog, publisher }
    }

    pub async fn resolve(&self, request: &StockRequest) -> Result<ResolvedLine> {
        let product = self.catalog.find_product(request.product_id).await?
            .ok_or(EcommerceError::ProductNotFound(request.product_id))?;
        let variant = match request.selection.key() {
            Some(key) => Some(self.catalog.find_variant(product.id, &key).await?.ok_or_else(|| {
                EcommerceError::VariantNotFound { product: product.name.clone(), key: key.to_string() }
            })?),
            None if request.selection.is_blank() => None,
            None => {
                return Err(EcommerceError::VariantNotFound {
                    product: product.name.clone(),
                    key: request.selection.to_string(),
                })
            }
        };
        Ok(ResolvedLine { product, variant, quantity: request.quantity })
    }

    /// Resolve and check every request without changing stock.
    pub async fn check(&self, requests: &[StockRequest]) -> Result<Vec<ResolvedLine>> {
        let mut lines = Vec::with_capacity(requests.len());
        for request in requests {
            let line = self.resolve(request).await?;
            line.check()?;
            lines.push(line);
        }
        Ok(lines)
    }

    /// Take stock for every request, or for none of them.
    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn reserve(&self, requests: &[StockRequest]) -> Result<Vec<StockMovement>> {
        let lines = self.check(requests).await?;
        let batch: Vec<StockMovement> = lines.iter().map(ResolvedLine::movement).collect();
        self.catalog.decrement_stock(&batch).await?;
        for m in &batch {
            self.publisher.publish(&DomainEvent::Inventory(InventoryEvent::Reserved {
                product_id: m.product_id, variant_id: m.variant_id, quantity: m.quantity,
            })).await;
        }
        Ok(batch)
    }

    /// Put stock back. Lines whose product or variant no longer exists are
    /// logged and skipped; this never fails.
    #[tracing::instrument(skip(self, requests), fields(lines = requests.len()))]
    pub async fn release(&self, requests: &[StockRequest]) -> usize {
        let mut batch = Vec::with_capacity(requests.len());
        for request in requests {
            match self.resolve(request).await {
                Ok(line) => batch.push(line.movement()),
                Err(e) => tracing::warn!(product_id = %request.product_id, error = %e, "skipping stock release"),
            }
        }
        let skipped = match self.catalog.increment_stock(&batch).await {
            Ok(skipped) => skipped,
            Err(e) => {
                tracing::warn!(error = %e, "stock release failed");
                return 0;
            }
        };
        for m in &skipped {
            tracing::warn!(product_id = %m.product_id, item = %m.label, "stock row vanished before release");
        }
        let mut released = 0;
        for m in batch.iter().filter(|m| !skipped.contains(m)) {
            released += 1;
            self.publisher.publish(&DomainEvent::Inventory(InventoryEvent::Released {
                product_id: m.product_id, variant_id: m.variant_id, quantity: m.quantity,
            })).await;
        }
        released
    }
}
