//! Persistence boundary.
//!
//! Every mutation of a shared counter (stock, coupon usage, wallet balance,
//! referral claim) is a conditional operation evaluated by the store itself,
//! so two concurrent requests can never both pass a check against the same
//! stale read.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, CartLineSelector, Category, Coupon, Order, Payment, Product, ProductVariant, RedeemOutcome, Referral,
    Wallet, WalletTransaction,
};
use crate::domain::value_objects::VariantKey;
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// One product (and optionally variant) stock adjustment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: u32,
    /// Human readable item name for error messages.
    pub label: String,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>>;
    /// First variant of the product accepted by `key` (see [`VariantKey::accepts`]).
    async fn find_variant(&self, product_id: Uuid, key: &VariantKey) -> Result<Option<ProductVariant>>;
    async fn find_category(&self, id: Uuid) -> Result<Option<Category>>;
    /// Decrement every movement only if current stock covers it. All or nothing:
    /// on any shortfall nothing is applied and `InsufficientStock` is returned.
    async fn decrement_stock(&self, batch: &[StockMovement]) -> Result<()>;
    /// Increment stock; rows that no longer exist are skipped and returned.
    async fn increment_stock(&self, batch: &[StockMovement]) -> Result<Vec<StockMovement>>;
}

#[async_trait]
pub trait CartStore: Send + Sync {
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>>;
    /// Remove lines matching any selector; returns the number removed.
    async fn remove_lines(&self, user_id: Uuid, selectors: &[CartLineSelector]) -> Result<usize>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>>;
    /// Consume one use if the total and per-user caps still allow it.
    async fn redeem(&self, coupon_id: Uuid, user_id: Uuid) -> Result<Option<RedeemOutcome>>;
    /// Give back one use of `user_id`; false when there was nothing to give back.
    async fn release(&self, coupon_id: Uuid, user_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>>;
    /// Credit only if the wallet is active and stays within `ceiling`; records `txn`.
    async fn apply_credit(&self, txn: &WalletTransaction, ceiling: Decimal) -> Result<bool>;
    /// Debit only if the wallet is active and holds enough; records `txn`.
    async fn apply_debit(&self, txn: &WalletTransaction) -> Result<bool>;
    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<()>;
    async fn find_order(&self, id: Uuid) -> Result<Option<Order>>;
    /// Persist `order` if its stored version still equals `order.version`;
    /// returns false (and writes nothing) when another writer got there first.
    async fn save_order(&self, order: &Order) -> Result<bool>;
    /// Orders of the user with at least one delivered item.
    async fn count_delivered_orders(&self, user_id: Uuid) -> Result<u64>;
    /// Orders created before `cutoff` that still hold unpaid items.
    async fn find_unpaid_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<()>;
    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>>;
    async fn update_payment(&self, payment: &Payment) -> Result<()>;
}

#[async_trait]
pub trait ReferralStore: Send + Sync {
    async fn find_referral(&self, user_id: Uuid) -> Result<Option<Referral>>;
    /// Flip the claimed flag if it is still unset.
    async fn claim(&self, user_id: Uuid) -> Result<bool>;
    async fn unclaim(&self, user_id: Uuid) -> Result<()>;
}

/// Store handles injected into the engine.
#[derive(Clone)]
pub struct Repositories {
    pub catalog: Arc<dyn CatalogStore>,
    pub carts: Arc<dyn CartStore>,
    pub coupons: Arc<dyn CouponStore>,
    pub wallets: Arc<dyn WalletStore>,
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub referrals: Arc<dyn ReferralStore>,
}

impl Repositories {
    /// Use one backend for every collaborator.
    pub fn from_backend<S>(store: Arc<S>) -> Self
    where
        S: CatalogStore + CartStore + CouponStore + WalletStore + OrderStore + PaymentStore + ReferralStore + 'static,
    {
        Self {
            catalog: store.clone(),
            carts: store.clone(),
            coupons: store.clone(),
            wallets: store.clone(),
            orders: store.clone(),
            payments: store.clone(),
            referrals: store,
        }
    }
}
