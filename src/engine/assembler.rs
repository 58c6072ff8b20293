//! Order Assembler
//!
//! Builds a priced, stock-checked [`OrderDraft`] from either a single product
//! or the user's cart. Nothing is reserved or consumed here.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{CartLineSelector, ItemStatus, OrderItem, ShippingAddress};
use crate::domain::value_objects::{round_money, VariantSelection};
use crate::engine::stock::{ResolvedLine, StockRequest};
use crate::engine::OrderEngine;
use crate::{EcommerceError, Result};

#[derive(Clone, Debug)]
pub enum CheckoutSource {
    /// Buy one product directly.
    Product { product_id: Uuid, quantity: u32, selection: VariantSelection },
    /// Buy from the cart; an empty list takes every line.
    Cart { product_ids: Vec<Uuid> },
}

#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub source: CheckoutSource,
    pub coupon_code: Option<String>,
    pub shipping_address: ShippingAddress,
}

#[derive(Clone, Debug, Serialize)]
pub struct AppliedCoupon {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount: Decimal,
}

/// A checkout that has been priced and checked but not yet committed.
#[derive(Clone, Debug, Serialize)]
pub struct OrderDraft {
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub coupon: Option<AppliedCoupon>,
    pub total_amount: Decimal,
    pub shipping_address: ShippingAddress,
    /// Cart lines to drop once the order is confirmed.
    #[serde(skip)]
    pub consumed_cart_lines: Vec<CartLineSelector>,
}

impl OrderDraft {
    pub fn coupon_code(&self) -> Option<&str> { self.coupon.as_ref().map(|c| c.code.as_str()) }
}

fn order_item(line: &ResolvedLine, price: Decimal) -> OrderItem {
    let (color, size, gender) = match &line.variant {
        Some(v) => (Some(v.key.color().to_string()), Some(v.key.size().to_string()), v.key.gender().map(str::to_string)),
        None => (None, None, None),
    };
    OrderItem {
        id: Uuid::now_v7(),
        product_id: line.product.id,
        variant_id: line.variant.as_ref().map(|v| v.id),
        product_name: line.product.name.clone(),
        category_id: line.product.category_id,
        color,
        size,
        gender,
        price,
        quantity: line.quantity,
        status: ItemStatus::Pending,
        cancel_reason: None,
        return_reason: None,
        refund: None,
        delivered_at: None,
        updated_at: Utc::now(),
    }
}

impl OrderEngine {
    #[tracing::instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn assemble_order(&self, request: CheckoutRequest) -> Result<OrderDraft> {
        let CheckoutRequest { user_id, source, coupon_code, shipping_address } = request;

        let (requests, consumed_cart_lines) = match source {
            CheckoutSource::Product { product_id, quantity, selection } => {
                if quantity == 0 { return Err(EcommerceError::InvalidQuantity); }
                (vec![StockRequest::new(product_id, quantity, selection)], vec![])
            }
            CheckoutSource::Cart { product_ids } => {
                let cart = self.repos.carts.find_cart(user_id).await?
                    .filter(|c| !c.is_empty())
                    .ok_or(EcommerceError::EmptyCart)?;
                let lines: Vec<_> = cart.lines.into_iter()
                    .filter(|l| product_ids.is_empty() || product_ids.contains(&l.product_id))
                    .collect();
                if lines.is_empty() { return Err(EcommerceError::EmptyCart); }
                let requests = lines.iter().map(|l| StockRequest::new(l.product_id, l.quantity, l.selection())).collect();
                (requests, lines.iter().map(|l| l.selector()).collect())
            }
        };

        let mut items = Vec::with_capacity(requests.len());
        for request in &requests {
            let line = self.stock.resolve(request).await?;
            if !line.product.is_purchasable() {
                return Err(EcommerceError::ProductUnavailable(line.product.name.clone()));
            }
            line.check()?;
            let price = self.pricing.resolve(&line.product, line.variant.as_ref()).await?;
            items.push(order_item(&line, price));
        }

        let subtotal = round_money(items.iter().map(OrderItem::line_total).sum());
        let coupon = match coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let (coupon, discount) = self.coupons.quote(code, user_id, &items).await?;
                Some(AppliedCoupon { coupon_id: coupon.id, code: coupon.code, discount: discount.min(subtotal) })
            }
            None => None,
        };
        let discount = coupon.as_ref().map(|c| c.discount).unwrap_or(Decimal::ZERO);

        Ok(OrderDraft {
            user_id,
            items,
            subtotal,
            coupon,
            total_amount: round_money(subtotal - discount),
            shipping_address,
            consumed_cart_lines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::aggregates::{Cart, CartLine, Category, Coupon, Product, ProductStatus, ProductVariant};
    use crate::domain::value_objects::VariantKey;
    use crate::publisher::LogPublisher;
    use crate::store::{MemoryStore, Repositories};
    use chrono::Duration;
    use std::sync::Arc;

    fn engine(store: &Arc<MemoryStore>) -> OrderEngine {
        OrderEngine::new(Repositories::from_backend(store.clone()), EngineConfig::new("secret"), Arc::new(LogPublisher))
    }

    fn single(user_id: Uuid, product_id: Uuid, quantity: u32, selection: VariantSelection) -> CheckoutRequest {
        CheckoutRequest {
            user_id,
            source: CheckoutSource::Product { product_id, quantity, selection },
            coupon_code: None,
            shipping_address: ShippingAddress::default(),
        }
    }

    #[tokio::test]
    async fn test_single_product_uses_effective_price() {
        let store = Arc::new(MemoryStore::new());
        let mut category = Category::new("Shirts");
        category.category_offer = Some(Decimal::new(20, 0));
        category.is_offer_active = true;
        let mut product = Product::new("Shirt", Decimal::new(1000, 0));
        product.base_offer_price = Decimal::new(900, 0);
        product.category_id = Some(category.id);
        let variant = ProductVariant::new(product.id, VariantKey::new("red", "m", None), 5);
        let id = product.id;
        store.put_category(category).await;
        store.put_product(product).await;
        store.put_variants(vec![variant]).await;

        let draft = engine(&store)
            .assemble_order(single(Uuid::new_v4(), id, 2, VariantSelection::new(Some(" Red "), Some("m"), None)))
            .await
            .unwrap();
        assert_eq!(draft.items[0].price, Decimal::new(800, 0));
        assert_eq!(draft.items[0].color.as_deref(), Some("red"));
        assert_eq!(draft.items[0].size.as_deref(), Some("M"));
        assert_eq!(draft.subtotal, Decimal::new(1600, 0));
        assert_eq!(store.product(id).await.unwrap().total_stock, 5);
    }

    #[tokio::test]
    async fn test_rejects_inactive_product_and_zero_quantity() {
        let store = Arc::new(MemoryStore::new());
        let mut product = Product::new("Hat", Decimal::new(200, 0));
        product.total_stock = 4;
        product.status = ProductStatus::Blocked;
        let id = product.id;
        store.put_product(product).await;
        let e = engine(&store);
        assert!(matches!(
            e.assemble_order(single(Uuid::new_v4(), id, 1, VariantSelection::default())).await,
            Err(EcommerceError::ProductUnavailable(_))
        ));
        assert!(matches!(
            e.assemble_order(single(Uuid::new_v4(), id, 0, VariantSelection::default())).await,
            Err(EcommerceError::InvalidQuantity)
        ));
    }

    #[tokio::test]
    async fn test_cart_checkout_filters_lines_and_applies_coupon() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let mut a = Product::new("A", Decimal::new(300, 0));
        a.total_stock = 10;
        let mut b = Product::new("B", Decimal::new(100, 0));
        b.total_stock = 10;
        let (a_id, b_id) = (a.id, b.id);
        store.put_product(a).await;
        store.put_product(b).await;
        let mut cart = Cart::new(user);
        cart.add_line(CartLine::new(a_id, 1));
        cart.add_line(CartLine::new(b_id, 2));
        store.put_cart(cart).await;
        store.put_coupon(Coupon::new("SAVE10", Decimal::new(10, 0), Decimal::new(50, 0), Utc::now() + Duration::days(1))).await;

        let request = CheckoutRequest {
            user_id: user,
            source: CheckoutSource::Cart { product_ids: vec![a_id] },
            coupon_code: Some("save10".into()),
            shipping_address: ShippingAddress::default(),
        };
        let draft = engine(&store).assemble_order(request).await.unwrap();
        assert_eq!(draft.items.len(), 1);
        assert_eq!(draft.consumed_cart_lines.len(), 1);
        assert_eq!(draft.coupon.as_ref().unwrap().discount, Decimal::new(30, 0));
        assert_eq!(draft.total_amount, Decimal::new(270, 0));
    }

    #[tokio::test]
    async fn test_size_is_required_once_a_color_is_given() {
        let store = Arc::new(MemoryStore::new());
        let product = Product::new("Polo", Decimal::new(400, 0));
        let variant = ProductVariant::new(product.id, VariantKey::new("red", "m", None), 2);
        let id = product.id;
        store.put_product(product).await;
        store.put_variants(vec![variant]).await;

        let result = engine(&store)
            .assemble_order(single(Uuid::new_v4(), id, 2, VariantSelection::new(Some("blue"), None, None)))
            .await;
        assert!(matches!(result, Err(EcommerceError::VariantNotFound { .. })));
    }

    #[tokio::test]
    async fn test_unavailable_cart_line_fails_whole_checkout() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let mut ok = Product::new("Cup", Decimal::new(50, 0));
        ok.total_stock = 5;
        let mut gone = Product::new("Saucer", Decimal::new(20, 0));
        gone.total_stock = 5;
        gone.status = ProductStatus::Inactive;
        let (ok_id, gone_id) = (ok.id, gone.id);
        store.put_product(ok).await;
        store.put_product(gone).await;
        let mut cart = Cart::new(user);
        cart.add_line(CartLine::new(ok_id, 1));
        cart.add_line(CartLine::new(gone_id, 1));
        store.put_cart(cart).await;

        let request = CheckoutRequest {
            user_id: user,
            source: CheckoutSource::Cart { product_ids: vec![] },
            coupon_code: None,
            shipping_address: ShippingAddress::default(),
        };
        match engine(&store).assemble_order(request).await {
            Err(EcommerceError::ProductUnavailable(name)) => assert_eq!(name, "Saucer"),
            other => panic!("expected ProductUnavailable, got {:?}", other.map(|d| d.items.len())),
        }
    }

    #[tokio::test]
    async fn test_missing_cart_is_empty() {
        let store = Arc::new(MemoryStore::new());
        let request = CheckoutRequest {
            user_id: Uuid::new_v4(),
            source: CheckoutSource::Cart { product_ids: vec![] },
            coupon_code: None,
            shipping_address: ShippingAddress::default(),
        };
        assert!(matches!(engine(&store).assemble_order(request).await, Err(EcommerceError::EmptyCart)));
    }
}
