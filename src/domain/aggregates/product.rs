//! Product, Variant and Category Aggregates

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::value_objects::VariantKey;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus { #[default] Active, Inactive, Blocked }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Active => "active", Self::Inactive => "inactive", Self::Blocked => "blocked" }
    }

    pub fn parse(value: &str) -> Self {
        match value { "active" => Self::Active, "blocked" => Self::Blocked, _ => Self::Inactive }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub base_price: Decimal,
    /// Zero means no product-level offer.
    pub base_offer_price: Decimal,
    /// Cached sum of active variant stock.
    pub total_stock: u32,
    pub available_colors: Vec<String>,
    pub available_sizes: Vec<String>,
    pub status: ProductStatus,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, base_price: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(), name: name.into(), category_id: None, base_price,
            base_offer_price: Decimal::ZERO, total_stock: 0, available_colors: vec![],
            available_sizes: vec![], status: ProductStatus::Active, updated_at: Utc::now(),
        }
    }

    pub fn is_purchasable(&self) -> bool { self.status == ProductStatus::Active }

    /// Recompute the derived stock and attribute caches from this product's variants.
    pub fn refresh_from_variants(&mut self, variants: &[ProductVariant]) {
        let mut colors: Vec<String> = vec![];
        let mut sizes: Vec<String> = vec![];
        let mut total: u32 = 0;
        for v in variants.iter().filter(|v| v.product_id == self.id && v.is_active) {
            total = total.saturating_add(v.stock_quantity);
            if v.stock_quantity == 0 { continue; }
            if !colors.iter().any(|c| c == v.key.color()) { colors.push(v.key.color().to_string()); }
            if !sizes.iter().any(|s| s == v.key.size()) { sizes.push(v.key.size().to_string()); }
        }
        self.total_stock = total;
        self.available_colors = colors;
        self.available_sizes = sizes;
        self.updated_at = Utc::now();
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub key: VariantKey,
    pub stock_quantity: u32,
    pub price: Option<Decimal>,
    pub offer_price: Option<Decimal>,
    pub is_active: bool,
}

impl ProductVariant {
    pub fn new(product_id: Uuid, key: VariantKey, stock_quantity: u32) -> Self {
        Self { id: Uuid::new_v4(), product_id, key, stock_quantity, price: None, offer_price: None, is_active: true }
    }

    pub fn is_purchasable(&self) -> bool { self.is_active && self.stock_quantity > 0 }

    pub fn label(&self, product_name: &str) -> String { format!("{} ({})", product_name, self.key) }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    /// Percentage off the base price.
    pub category_offer: Option<Decimal>,
    pub offer_start: Option<DateTime<Utc>>,
    pub offer_end: Option<DateTime<Utc>>,
    pub is_offer_active: bool,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), name: name.into(), category_offer: None, offer_start: None, offer_end: None, is_offer_active: false }
    }

    /// The offer percentage in effect at `now`, if any. Missing bounds are open.
    pub fn active_offer(&self, now: DateTime<Utc>) -> Option<Decimal> {
        if !self.is_offer_active { return None; }
        let pct = self.category_offer.filter(|p| *p > Decimal::ZERO)?;
        if self.offer_start.is_some_and(|start| now < start) { return None; }
        if self.offer_end.is_some_and(|end| now > end) { return None; }
        Some(pct)
    }
}
