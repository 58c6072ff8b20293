//! Effective sale price for a product and optional variant.
//!
//! The lowest of the base price, the product/variant offer price and the
//! category offer price wins.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::aggregates::{Category, Product, ProductVariant};
use crate::domain::value_objects::round_money;
use crate::store::CatalogStore;
use crate::Result;

fn positive(value: Option<Decimal>) -> Option<Decimal> { value.filter(|v| *v > Decimal::ZERO) }

pub fn effective_price(
    product: &Product,
    variant: Option<&ProductVariant>,
    category: Option<&Category>,
    now: DateTime<Utc>,
) -> Decimal {
    let base = positive(variant.and_then(|v| v.price)).unwrap_or(product.base_price);
    let offer = positive(variant.and_then(|v| v.offer_price)).or_else(|| positive(Some(product.base_offer_price)));
    let category_price = category
        .and_then(|c| c.active_offer(now))
        .map(|pct| base * (Decimal::ONE - pct / Decimal::ONE_HUNDRED));

    let lowest = [offer, category_price].into_iter().flatten().fold(base, Decimal::min);
    round_money(lowest.max(Decimal::ZERO))
}

#[derive(Clone)]
pub struct PricingResolver { catalog: Arc<dyn CatalogStore> }

impl PricingResolver {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self { Self { catalog } }

    pub async fn resolve(&self, product: &Product, variant: Option<&ProductVariant>) -> Result<Decimal> {
        let category = match product.category_id {
            Some(id) => self.catalog.find_category(id).await?,
            None => None,
        };
        Ok(effective_price(product, variant, category.as_ref(), Utc::now()))
    }
}
