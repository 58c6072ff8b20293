//! PostgreSQL store
//!
//! Counter mutations are single conditional `UPDATE ... WHERE` statements run
//! inside a transaction, so the database arbitrates concurrent requests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

use super::{CartStore, CatalogStore, CouponStore, OrderStore, PaymentStore, ReferralStore, StockMovement, WalletStore};
use crate::domain::aggregates::{
    Cart, CartLine, CartLineSelector, Category, Coupon, Order, OrderItem, Payment, PaymentMethod, PaymentStatus,
    Product, ProductStatus, ProductVariant, RedeemOutcome, Referral, ShippingAddress, TransactionKind,
    TransactionMethod, TransactionStatus, Wallet, WalletStatus, WalletTransaction,
};
use crate::domain::value_objects::VariantKey;
use crate::{EcommerceError, Result};

#[derive(Clone)]
pub struct PgStore { pool: PgPool }

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

fn to_i32(value: u32) -> Result<i32> { i32::try_from(value).map_err(|_| EcommerceError::InvalidQuantity) }

fn to_u32(value: i32) -> u32 { u32::try_from(value).unwrap_or(0) }

fn parse_column<T>(column: &str, value: &str, parsed: Option<T>) -> Result<T> {
    parsed.ok_or_else(|| EcommerceError::StorageError(format!("unexpected {} value: {}", column, value)))
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid, name: String, category_id: Option<Uuid>, base_price: Decimal, base_offer_price: Decimal,
    total_stock: i32, available_colors: Vec<String>, available_sizes: Vec<String>, status: String,
    updated_at: DateTime<Utc>,
}

impl From<ProductRow> for Product {
    fn from(r: ProductRow) -> Self {
        Product {
            id: r.id, name: r.name, category_id: r.category_id, base_price: r.base_price,
            base_offer_price: r.base_offer_price, total_stock: to_u32(r.total_stock),
            available_colors: r.available_colors, available_sizes: r.available_sizes,
            status: ProductStatus::parse(&r.status), updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VariantRow {
    id: Uuid, product_id: Uuid, color: String, size: String, gender: Option<String>, stock_quantity: i32,
    price: Option<Decimal>, offer_price: Option<Decimal>, is_active: bool,
}

impl From<VariantRow> for ProductVariant {
    fn from(r: VariantRow) -> Self {
        ProductVariant {
            id: r.id, product_id: r.product_id, key: VariantKey::new(&r.color, &r.size, r.gender.as_deref()),
            stock_quantity: to_u32(r.stock_quantity), price: r.price, offer_price: r.offer_price, is_active: r.is_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CategoryRow {
    id: Uuid, name: String, category_offer: Option<Decimal>, offer_start: Option<DateTime<Utc>>,
    offer_end: Option<DateTime<Utc>>, is_offer_active: bool,
}

impl From<CategoryRow> for Category {
    fn from(r: CategoryRow) -> Self {
        Category {
            id: r.id, name: r.name, category_offer: r.category_offer, offer_start: r.offer_start,
            offer_end: r.offer_end, is_offer_active: r.is_offer_active,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CartLineRow { product_id: Uuid, quantity: i32, color: Option<String>, size: Option<String>, gender: Option<String> }

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid, code: String, discount: Decimal, min_amount: Decimal, max_amount: Decimal, expiry: DateTime<Utc>,
    applicable_users: Vec<Uuid>, applicable_products: Vec<Uuid>, applicable_categories: Vec<Uuid>,
    usage_limit: Option<i32>, per_user_limit: i32,
}

#[derive(sqlx::FromRow)]
struct WalletRow { id: Uuid, user_id: Uuid, balance: Decimal, status: String, updated_at: DateTime<Utc> }

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid, user_id: Uuid, kind: String, amount: Decimal, description: String, order_id: Option<Uuid>,
    method: String, status: String, created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for WalletTransaction {
    type Error = EcommerceError;

    fn try_from(r: TransactionRow) -> Result<Self> {
        let kind = match r.kind.as_str() { "Credit" => Some(TransactionKind::Credit), "Debit" => Some(TransactionKind::Debit), _ => None };
        let method = match r.method.as_str() {
            "Refund" => Some(TransactionMethod::Refund),
            "Referral" => Some(TransactionMethod::Referral),
            "OrderPayment" => Some(TransactionMethod::OrderPayment),
            _ => None,
        };
        let status = match r.status.as_str() { "Completed" => Some(TransactionStatus::Completed), "Failed" => Some(TransactionStatus::Failed), _ => None };
        Ok(WalletTransaction {
            id: r.id, user_id: r.user_id, amount: r.amount, description: r.description, order_id: r.order_id,
            kind: parse_column("kind", &r.kind, kind)?,
            method: parse_column("method", &r.method, method)?,
            status: parse_column("status", &r.status, status)?,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, user_id: Uuid, items: Json<Vec<OrderItem>>, subtotal: Decimal, coupon_id: Option<Uuid>,
    coupon_discount: Decimal, coupon_reversed: bool, total_amount: Decimal, shipping_address: Json<ShippingAddress>,
    payment_method: String, version: i64, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = EcommerceError;

    fn try_from(r: OrderRow) -> Result<Self> {
        Ok(Order {
            id: r.id, user_id: r.user_id, items: r.items.0, subtotal: r.subtotal, coupon_id: r.coupon_id,
            coupon_discount: r.coupon_discount, coupon_reversed: r.coupon_reversed, total_amount: r.total_amount,
            shipping_address: r.shipping_address.0,
            payment_method: parse_column("payment_method", &r.payment_method, PaymentMethod::parse(&r.payment_method))?,
            version: r.version, created_at: r.created_at, updated_at: r.updated_at, events: vec![],
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid, order_id: Uuid, user_id: Uuid, method: String, status: String, amount: Decimal,
    gateway_order_id: Option<String>, gateway_payment_id: Option<String>, created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = EcommerceError;

    fn try_from(r: PaymentRow) -> Result<Self> {
        Ok(Payment {
            id: r.id, order_id: r.order_id, user_id: r.user_id,
            method: parse_column("method", &r.method, PaymentMethod::parse(&r.method))?,
            status: parse_column("status", &r.status, PaymentStatus::parse(&r.status))?,
            amount: r.amount, gateway_order_id: r.gateway_order_id, gateway_payment_id: r.gateway_payment_id,
            created_at: r.created_at, updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReferralRow { user_id: Uuid, referrer_id: Uuid, reward_claimed: bool }

// =============================================================================
// Catalog
// =============================================================================

#[async_trait]
impl CatalogStore for PgStore {
    async fn find_product(&self, id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Product::from))
    }

    async fn find_variant(&self, product_id: Uuid, key: &VariantKey) -> Result<Option<ProductVariant>> {
        let row = sqlx::query_as::<_, VariantRow>(
            "SELECT * FROM product_variants WHERE product_id = $1 AND LOWER(color) = $2 AND UPPER(size) = $3 \
             AND ($4::text IS NULL OR LOWER(gender) = LOWER($4)) ORDER BY id LIMIT 1",
        )
        .bind(product_id).bind(key.color()).bind(key.size()).bind(key.gender())
        .fetch_optional(&self.pool).await?;
        Ok(row.map(ProductVariant::from))
    }

    async fn find_category(&self, id: Uuid) -> Result<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>("SELECT * FROM categories WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(Category::from))
    }

    async fn decrement_stock(&self, batch: &[StockMovement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for m in batch {
            let qty = to_i32(m.quantity)?;
            let updated = sqlx::query(
                "UPDATE products SET total_stock = total_stock - $2, updated_at = NOW() WHERE id = $1 AND total_stock >= $2",
            )
            .bind(m.product_id).bind(qty).execute(&mut *tx).await?.rows_affected();
            if updated == 0 {
                let available: Option<i32> = sqlx::query_scalar("SELECT total_stock FROM products WHERE id = $1")
                    .bind(m.product_id).fetch_optional(&mut *tx).await?;
                tx.rollback().await?;
                return Err(EcommerceError::InsufficientStock {
                    item: m.label.clone(), requested: m.quantity, available: to_u32(available.unwrap_or(0)),
                });
            }
            let Some(variant_id) = m.variant_id else { continue };
            let updated = sqlx::query(
                "UPDATE product_variants SET stock_quantity = stock_quantity - $2 WHERE id = $1 AND stock_quantity >= $2",
            )
            .bind(variant_id).bind(qty).execute(&mut *tx).await?.rows_affected();
            if updated == 0 {
                let available: Option<i32> = sqlx::query_scalar("SELECT stock_quantity FROM product_variants WHERE id = $1")
                    .bind(variant_id).fetch_optional(&mut *tx).await?;
                tx.rollback().await?;
                return Err(EcommerceError::InsufficientStock {
                    item: m.label.clone(), requested: m.quantity, available: to_u32(available.unwrap_or(0)),
                });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn increment_stock(&self, batch: &[StockMovement]) -> Result<Vec<StockMovement>> {
        let mut tx = self.pool.begin().await?;
        let mut skipped = vec![];
        for m in batch {
            let qty = to_i32(m.quantity)?;
            if let Some(variant_id) = m.variant_id {
                let updated = sqlx::query("UPDATE product_variants SET stock_quantity = stock_quantity + $2 WHERE id = $1")
                    .bind(variant_id).bind(qty).execute(&mut *tx).await?.rows_affected();
                if updated == 0 { skipped.push(m.clone()); continue; }
            }
            let updated = sqlx::query("UPDATE products SET total_stock = total_stock + $2, updated_at = NOW() WHERE id = $1")
                .bind(m.product_id).bind(qty).execute(&mut *tx).await?.rows_affected();
            if updated == 0 { skipped.push(m.clone()); }
        }
        tx.commit().await?;
        Ok(skipped)
    }
}

// =============================================================================
// Cart
// =============================================================================

#[async_trait]
impl CartStore for PgStore {
    async fn find_cart(&self, user_id: Uuid) -> Result<Option<Cart>> {
        let rows = sqlx::query_as::<_, CartLineRow>(
            "SELECT product_id, quantity, color, size, gender FROM cart_lines WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id).fetch_all(&self.pool).await?;
        if rows.is_empty() { return Ok(None); }
        let lines = rows.into_iter()
            .map(|r| CartLine { product_id: r.product_id, quantity: to_u32(r.quantity), color: r.color, size: r.size, gender: r.gender })
            .collect();
        Ok(Some(Cart { user_id, lines }))
    }

    async fn remove_lines(&self, user_id: Uuid, selectors: &[CartLineSelector]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for s in selectors {
            removed += sqlx::query(
                "DELETE FROM cart_lines WHERE user_id = $1 AND product_id = $2 \
                 AND ($3::text IS NULL OR LOWER(color) = LOWER($3)) AND ($4::text IS NULL OR UPPER(size) = UPPER($4))",
            )
            .bind(user_id).bind(s.product_id).bind(s.color.as_deref()).bind(s.size.as_deref())
            .execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(removed as usize)
    }
}

// =============================================================================
// Coupons
// =============================================================================

#[async_trait]
impl CouponStore for PgStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let Some(r) = sqlx::query_as::<_, CouponRow>(
            "SELECT id, code, discount, min_amount, max_amount, expiry, applicable_users, applicable_products, \
             applicable_categories, usage_limit, per_user_limit FROM coupons WHERE UPPER(code) = UPPER($1)",
        )
        .bind(code.trim()).fetch_optional(&self.pool).await? else { return Ok(None) };

        let usage: Vec<(Uuid, i32)> = sqlx::query_as("SELECT user_id, uses FROM coupon_usages WHERE coupon_id = $1")
            .bind(r.id).fetch_all(&self.pool).await?;
        let usage: HashMap<Uuid, u32> = usage.into_iter().map(|(user, uses)| (user, to_u32(uses))).collect();

        let mut coupon = Coupon::new(r.code, r.discount, r.max_amount, r.expiry);
        coupon.id = r.id;
        coupon.min_amount = r.min_amount;
        coupon.applicable_users = r.applicable_users;
        coupon.applicable_products = r.applicable_products;
        coupon.applicable_categories = r.applicable_categories;
        coupon.usage_limit = r.usage_limit.map(to_u32);
        coupon.per_user_limit = to_u32(r.per_user_limit);
        Ok(Some(coupon.with_usage(usage)))
    }

    async fn redeem(&self, coupon_id: Uuid, user_id: Uuid) -> Result<Option<RedeemOutcome>> {
        let mut tx = self.pool.begin().await?;
        let per_user_limit: Option<i32> = sqlx::query_scalar("SELECT per_user_limit FROM coupons WHERE id = $1 FOR UPDATE")
            .bind(coupon_id).fetch_optional(&mut *tx).await?;
        let Some(per_user_limit) = per_user_limit else {
            tx.rollback().await?;
            return Ok(None);
        };

        let updated = sqlx::query(
            "UPDATE coupons SET usage_count = usage_count + 1 WHERE id = $1 AND (usage_limit IS NULL OR usage_count < usage_limit)",
        )
        .bind(coupon_id).execute(&mut *tx).await?.rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(Some(RedeemOutcome::UsageLimitReached));
        }

        let counted = if per_user_limit < 1 { 0 } else {
            sqlx::query(
                "INSERT INTO coupon_usages (coupon_id, user_id, uses) VALUES ($1, $2, 1) \
                 ON CONFLICT (coupon_id, user_id) DO UPDATE SET uses = coupon_usages.uses + 1 \
                 WHERE coupon_usages.uses < $3",
            )
            .bind(coupon_id).bind(user_id).bind(per_user_limit).execute(&mut *tx).await?.rows_affected()
        };
        if counted == 0 {
            tx.rollback().await?;
            return Ok(Some(RedeemOutcome::PerUserLimitReached));
        }
        tx.commit().await?;
        Ok(Some(RedeemOutcome::Redeemed))
    }

    async fn release(&self, coupon_id: Uuid, user_id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query("UPDATE coupon_usages SET uses = uses - 1 WHERE coupon_id = $1 AND user_id = $2 AND uses > 0")
            .bind(coupon_id).bind(user_id).execute(&mut *tx).await?.rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query("DELETE FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2 AND uses = 0")
            .bind(coupon_id).bind(user_id).execute(&mut *tx).await?;
        sqlx::query("UPDATE coupons SET usage_count = GREATEST(usage_count - 1, 0) WHERE id = $1")
            .bind(coupon_id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// Wallets
// =============================================================================

impl PgStore {
    async fn insert_transaction(tx: &mut sqlx::PgConnection, txn: &WalletTransaction) -> Result<()> {
        let kind = match txn.kind { TransactionKind::Credit => "Credit", TransactionKind::Debit => "Debit" };
        let status = match txn.status { TransactionStatus::Completed => "Completed", TransactionStatus::Failed => "Failed" };
        sqlx::query(
            "INSERT INTO wallet_transactions (id, user_id, kind, amount, description, order_id, method, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(txn.id).bind(txn.user_id).bind(kind).bind(txn.amount).bind(&txn.description).bind(txn.order_id)
        .bind(txn.method.as_str()).bind(status).bind(txn.created_at)
        .execute(tx).await?;
        Ok(())
    }
}

#[async_trait]
impl WalletStore for PgStore {
    async fn find_wallet(&self, user_id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Wallet {
            id: r.id, user_id: r.user_id, balance: r.balance, updated_at: r.updated_at,
            status: if r.status == "Active" { WalletStatus::Active } else { WalletStatus::Inactive },
        }))
    }

    async fn apply_credit(&self, txn: &WalletTransaction, ceiling: Decimal) -> Result<bool> {
        if txn.kind != TransactionKind::Credit { return Ok(false); }
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE wallets SET balance = balance + $2, updated_at = NOW() \
             WHERE user_id = $1 AND status = 'Active' AND balance + $2 <= $3",
        )
        .bind(txn.user_id).bind(txn.amount).bind(ceiling).execute(&mut *tx).await?.rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::insert_transaction(&mut tx, txn).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn apply_debit(&self, txn: &WalletTransaction) -> Result<bool> {
        if txn.kind != TransactionKind::Debit { return Ok(false); }
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE wallets SET balance = balance - $2, updated_at = NOW() \
             WHERE user_id = $1 AND status = 'Active' AND balance >= $2",
        )
        .bind(txn.user_id).bind(txn.amount).execute(&mut *tx).await?.rows_affected();
        if updated == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::insert_transaction(&mut tx, txn).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn transactions(&self, user_id: Uuid) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM wallet_transactions WHERE user_id = $1 ORDER BY created_at",
        )
        .bind(user_id).fetch_all(&self.pool).await?;
        rows.into_iter().map(WalletTransaction::try_from).collect()
    }
}

// =============================================================================
// Orders
// =============================================================================

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, items, subtotal, coupon_id, coupon_discount, coupon_reversed, total_amount, \
             shipping_address, payment_method, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(order.id).bind(order.user_id).bind(Json(&order.items)).bind(order.subtotal).bind(order.coupon_id)
        .bind(order.coupon_discount).bind(order.coupon_reversed).bind(order.total_amount)
        .bind(Json(&order.shipping_address)).bind(order.payment_method.as_str()).bind(order.version)
        .bind(order.created_at).bind(order.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_order(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        row.map(Order::try_from).transpose()
    }

    async fn save_order(&self, order: &Order) -> Result<bool> {
        let updated = sqlx::query(
            "UPDATE orders SET items = $2, coupon_reversed = $3, updated_at = $4, version = version + 1 \
             WHERE id = $1 AND version = $5",
        )
        .bind(order.id).bind(Json(&order.items)).bind(order.coupon_reversed).bind(order.updated_at).bind(order.version)
        .execute(&self.pool).await?.rows_affected();
        if updated == 1 { return Ok(true); }
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM orders WHERE id = $1)")
            .bind(order.id).fetch_one(&self.pool).await?;
        if !exists { return Err(EcommerceError::OrderNotFound(order.id)); }
        Ok(false)
    }

    async fn count_delivered_orders(&self, user_id: Uuid) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM orders WHERE user_id = $1 \
             AND EXISTS (SELECT 1 FROM jsonb_array_elements(items) AS item WHERE item->>'Status' = 'Delivered')",
        )
        .bind(user_id).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn find_unpaid_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE created_at < $1 \
             AND EXISTS (SELECT 1 FROM jsonb_array_elements(items) AS item \
                         WHERE item->>'Status' IN ('Pending', 'Payment Failed')) \
             ORDER BY created_at",
        )
        .bind(cutoff).fetch_all(&self.pool).await?;
        rows.into_iter().map(Order::try_from).collect()
    }
}

// =============================================================================
// Payments
// =============================================================================

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, user_id, method, status, amount, gateway_order_id, gateway_payment_id, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(payment.id).bind(payment.order_id).bind(payment.user_id).bind(payment.method.as_str())
        .bind(payment.status.as_str()).bind(payment.amount).bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id).bind(payment.created_at).bind(payment.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn find_by_order(&self, order_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE order_id = $1")
            .bind(order_id).fetch_optional(&self.pool).await?;
        row.map(Payment::try_from).transpose()
    }

    async fn update_payment(&self, payment: &Payment) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE payments SET status = $2, gateway_order_id = $3, gateway_payment_id = $4, updated_at = $5 \
             WHERE order_id = $1",
        )
        .bind(payment.order_id).bind(payment.status.as_str()).bind(&payment.gateway_order_id)
        .bind(&payment.gateway_payment_id).bind(payment.updated_at)
        .execute(&self.pool).await?.rows_affected();
        if updated == 0 { return Err(EcommerceError::PaymentNotFound(payment.order_id)); }
        Ok(())
    }
}

// =============================================================================
// Referrals
// =============================================================================

#[async_trait]
impl ReferralStore for PgStore {
    async fn find_referral(&self, user_id: Uuid) -> Result<Option<Referral>> {
        let row = sqlx::query_as::<_, ReferralRow>("SELECT * FROM referrals WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row.map(|r| Referral { user_id: r.user_id, referrer_id: r.referrer_id, reward_claimed: r.reward_claimed }))
    }

    async fn claim(&self, user_id: Uuid) -> Result<bool> {
        let updated = sqlx::query("UPDATE referrals SET reward_claimed = TRUE WHERE user_id = $1 AND reward_claimed = FALSE")
            .bind(user_id).execute(&self.pool).await?.rows_affected();
        Ok(updated == 1)
    }

    async fn unclaim(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE referrals SET reward_claimed = FALSE WHERE user_id = $1")
            .bind(user_id).execute(&self.pool).await?;
        Ok(())
    }
}
