//! In-memory store
//!
//! All state sits behind one async mutex, so every trait call is a single
//! atomic step. Used by tests and for running without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CartStore, CatalogStore, CouponStore, OrderStore, PaymentStore, ReferralStore, StockMovement, WalletStore};
use crate::domain::aggregates::{
    Cart, CartLineSelector, Category, Coupon, ItemStatus, Order, Payment, Product, ProductVariant, RedeemOutcome,
    Referral, TransactionKind, Wallet, WalletStatus, WalletTransaction,
};
use crate::domain::value_objects::VariantKey;
use crate::{EcommerceError, Result};

#[derive(Default)]
struct State {
    products: HashMap<Uuid, Product>,
    variants: Vec<ProductVariant>,
    categories: HashMap<Uuid, Category>,
    carts: HashMap<Uuid, Cart>,
    coupons: HashMap<Uuid, Coupon>,
    wallets: HashMap<Uuid, Wallet>,
    transactions: Vec<WalletTransaction>,
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    referrals: HashMap<Uuid, Referral>,
}

#[derive(Default)]
pub struct MemoryStore { state: Mutex<State> }

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub async fn put_product(&self, product: Product) {
        self.state.lock().await.products.insert(product.id, product);
    }

    /// Insert variants and refresh the owning products' stock caches.
    pub async fn put_variants(&self, variants: Vec<ProductVariant>) {
        let mut state = self.state.lock().await;
        state.variants.extend(variants);
        let State { products, variants, .. } = &mut *state;
        let variants: &[ProductVariant] = variants;
        for product in products.values_mut().filter(|p| variants.iter().any(|v| v.product_id == p.id)) {
            product.refresh_from_variants(variants);
        }
    }

    pub async fn put_category(&self, category: Category) {
        self.state.lock().await.categories.insert(category.id, category);
    }

    pub async fn put_cart(&self, cart: Cart) {
        self.state.lock().await.carts.insert(cart.user_id, cart);
    }

    pub async fn put_coupon(&self, coupon: Coupon) {
        self.state.lock().await.coupons.insert(coupon.id, coupon);
    }

    pub async fn put_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.insert(wallet.user_id, wallet);
    }

    pub async fn put_referral(&self, referral: Referral) {
        self.state.lock().await.referrals.insert(referral.user_id, referral);
    }

    pub async fn product(&self, id: Uuid) -> Option<Product> { self.state.lock().await.products.get(&id).cloned() }

    pub async fn variant(&self, id: Uuid) -> Option<ProductVariant> {
        self.state.lock().await.variants.iter().find(|v| v.id == id).cloned()
    }

    pub async fn coupon(&self, id: Uuid) -> Option<Coupon> { self.state.lock().await.coupons.get(&id).cloned() }

    pub async fn wallet(&self, user_id: Uuid) -> Option<Wallet> { self.state.lock().await.wallets.get(&user_id).cloned() }

    pub async fn cart(&self, user_id: Uuid) -> Option<Cart> { self.state.lock().await.carts.get(&user_id).cloned() }

    pub async fn referral(&self, user_id: Uuid) -> Option<Referral> {
        self.state.lock().await.referrals.get(&user_id).cloned()
    }
}

fn shortfall(state: &State, batch: &[StockMovement]) -> Option<EcommerceError> {
    // Summed in u64 so repeated lines cannot overflow.
    let mut product_need: HashMap<Uuid, u64> = HashMap::new();
    let mut variant_need: HashMap<Uuid, u64> = HashMap::new();
    for m in batch {
        *product_need.entry(m.product_id).or_insert(0) += u64::from(m.quantity);
        if let Some(v) = m.variant_id { *variant_need.entry(v).or_insert(0) += u64::from(m.quantity); }
    }
    let insufficient = |m: &StockMovement, need: u64, available: u32| EcommerceError::InsufficientStock {
        item: m.label.clone(),
        requested: u32::try_from(need).unwrap_or(u32::MAX),
        available,
    };
    for m in batch {
        let available = state.products.get(&m.product_id).map(|p| p.total_stock).unwrap_or(0);
        let need = product_need[&m.product_id];
        if u64::from(available) < need { return Some(insufficient(m, need, available)); }
        if let Some(vid) = m.variant_id {
            let available = state.variants.iter().find(|v| v.id == vid).map(|v| v.stock_quantity).unwrap_or(0);
            let need = variant_need[&vid];
            if u64::from(available) < need { return Some(insufficient(m, need, available)); }
        }
    }
    None
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> { Ok(self.product(id).await) }

    async fn find_variant(&self, product_id: Uuid, key: &VariantKey) -> Result<Option<ProductVariant>> {
        let state = self.state.lock().await;
        Ok(state.variants.iter().find(|v| v.product_id == product_id && key.accepts(&v.key)).cloned())
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>> {
        Ok(self.state.lock().await.categories.get(&id).cloned())
    }

    async fn decrement_stock(&self, batch: &[StockMovement]) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(err) = shortfall(&state, batch) { return Err(err); }
        for m in batch {
            if let Some(p) = state.products.get_mut(&m.product_id) { p.total_stock -= m.quantity; }
            if let Some(vid) = m.variant_id {
                if let Some(v) = state.variants.iter_mut().find(|v| v.id == vid) { v.stock_quantity -= m.quantity; }
            }
        }
        Ok(())
    }

    async fn increment_stock(&self, batch: &[StockMovement]) -> Result<Vec<StockMovement>> {
        let mut state = self.state.lock().await;
        let mut skipped = vec![];
        for m in batch {
            let variant = match m.variant_id {
                Some(vid) => match state.variants.iter_mut().find(|v| v.id == vid) {
                    Some(v) => Some(v),
                    None => { skipped.push(m.clone()); continue; }
                },
                None => None,
            };
            if let Some(v) = variant { v.stock_quantity = v.stock_quantity.saturating_add(m.quantity); }
            match state.products.get_mut(&m.product_id) {
                Some(p) => p.total_stock = p.total_stock.saturating_add(m.quantity),
                None => skipped.push(m.clone()),
            }
        }
        Ok(skipped)
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>> { Ok(self.cart(user_id).await) }

    async fn remove_lines(&self, user_id: Uuid, selectors: &[CartLineSelector]) -> Result<usize> {
        let mut state = self.state.lock().await;
        Ok(state.carts.get_mut(&user_id).map(|c| c.remove_matching(selectors)).unwrap_or(0))
    }
}

#[async_trait]
impl CouponStore for MemoryStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let state = self.state.lock().await;
        Ok(state.coupons.values().find(|c| c.code.eq_ignore_ascii_case(code.trim())).cloned())
    }

    async fn redeem(&self, coupon_id: Uuid, user_id: Uuid) -> Result<Option<RedeemOutcome>> {
        let mut state = self.state.lock().await;
        Ok(state.coupons.get_mut(&coupon_id).map(|c| c.record_use(user_id)))
    }

    async fn release(&self, coupon_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.coupons.get_mut(&coupon_id).is_some_and(|c| c.release_use(user_id)))
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> { Ok(self.wallet(user_id).await) }

    async fn apply_credit(&self, txn: &WalletTransaction, ceiling: Decimal) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(wallet) = state.wallets.get_mut(&txn.user_id) else { return Ok(false) };
        if txn.kind != TransactionKind::Credit || wallet.status != WalletStatus::Active || wallet.balance + txn.amount > ceiling {
            return Ok(false);
        }
        wallet.balance += txn.amount;
        wallet.updated_at = Utc::now();
        state.transactions.push(txn.clone());
        Ok(true)
    }

    async fn apply_debit(&self, txn: &WalletTransaction) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(wallet) = state.wallets.get_mut(&txn.user_id) else { return Ok(false) };
        if txn.kind != TransactionKind::Debit || wallet.status != WalletStatus::Active || wallet.balance < txn.amount {
            return Ok(false);
        }
        wallet.balance -= txn.amount;
        wallet.updated_at = Utc::now();
        state.transactions.push(txn.clone());
        Ok(true)
    }

    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().filter(|t| t.user_id == user_id).cloned().collect())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut stored = order.clone();
        stored.take_events();
        self.state.lock().await.orders.insert(order.id, stored);
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn save_order(&self, order: &Order) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(current) = state.orders.get_mut(&order.id) else { return Err(EcommerceError::OrderNotFound(order.id)) };
        if current.version != order.version { return Ok(false); }
        let mut stored = order.clone();
        stored.take_events();
        stored.version += 1;
        *current = stored;
        Ok(true)
    }

    async fn count_delivered_orders(&self, user_id: Uuid) -> Result<u64> {
        let state = self.state.lock().await;
        let count = state.orders.values()
            .filter(|o| o.user_id == user_id && o.items.iter().any(|i| i.status == ItemStatus::Delivered))
            .count();
        Ok(count as u64)
    }

    async fn find_unpaid_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.values()
            .filter(|o| o.created_at < cutoff && o.items.iter().any(|i| i.status.is_unpaid()))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        self.state.lock().await.payments.insert(payment.order_id, payment.clone());
        Ok(())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&order_id).cloned())
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.payments.get_mut(&payment.order_id) {
            Some(existing) => { *existing = payment.clone(); Ok(()) }
            None => Err(EcommerceError::PaymentNotFound(payment.order_id)),
        }
    }
}

#[async_trait]
impl ReferralStore for MemoryStore {
    async fn find_referral(&self, user_id: Uuid) -> Result<Option<Referral>> { Ok(self.referral(user_id).await) }

    async fn claim(&self, user_id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.referrals.get_mut(&user_id) {
            Some(r) if !r.reward_claimed => { r.reward_claimed = true; Ok(true) }
            _ => Ok(false),
        }
    }

    async fn unclaim(&self, user_id: Uuid) -> Result<()> {
        if let Some(r) = self.state.lock().await.referrals.get_mut(&user_id) { r.reward_claimed = false; }
        Ok(())
    }
}
