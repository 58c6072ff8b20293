//! Storefront order engine
//!
//! Turns a cart or single-item purchase into a priced, stock-validated,
//! coupon-adjusted order, and reconciles stock, coupon usage and wallet
//! balances when order items are cancelled, returned or fail payment.
//!
//! ## Components
//! - Pricing resolver (base, offer and category-offer prices)
//! - Stock ledger (all-or-nothing reservation, best-effort release)
//! - Coupon engine (eligibility, discount, usage tracking and reversal)
//! - Order assembler and per-item state machine
//! - Refund, wallet and referral engine
//! - Payment bridge (cash on delivery, wallet, gateway signature checks)

pub mod config;
pub mod domain;
pub mod engine;
pub mod http;
pub mod publisher;
pub mod store;

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

pub use engine::OrderEngine;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum EcommerceError {
    #[error("Product not found: {0}")]
    ProductNotFound(Uuid),

    #[error("Product is not available for purchase: {0}")]
    ProductUnavailable(String),

    #[error("Variant {key} not found for product {product}")]
    VariantNotFound { product: String, key: String },

    #[error("Not enough stock for {item}: requested {requested}, available {available}")]
    InsufficientStock { item: String, requested: u32, available: u32 },

    #[error("Invalid coupon: {0}")]
    InvalidCoupon(String),

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon usage limit reached")]
    UsageLimitReached,

    #[error("You have already used this coupon the maximum number of times")]
    PerUserLimitReached,

    #[error("Coupon is not applicable for this user")]
    UserNotEligible,

    #[error("Minimum order amount of {required} not met")]
    MinimumAmountNotMet { required: Decimal },

    #[error("Coupon is not applicable to any item in this order")]
    NoEligibleItems,

    #[error("Wallet not found")]
    WalletNotFound,

    #[error("Wallet is inactive")]
    WalletInactive,

    #[error("Wallet balance cannot exceed {limit}")]
    WalletLimitExceeded { limit: Decimal },

    #[error("Insufficient wallet balance")]
    InsufficientBalance,

    #[error("Payment signature mismatch")]
    SignatureMismatch,

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order item not found: {0}")]
    OrderItemNotFound(Uuid),

    #[error("Payment not found for order {0}")]
    PaymentNotFound(Uuid),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Cannot move item from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Unknown item status: {0}")]
    UnknownStatus(String),

    #[error("No items in this order can be cancelled")]
    NothingToCancel,

    #[error("Order was modified concurrently, retry the request")]
    ConcurrentModification,

    #[error("Storage error: {0}")]
    StorageError(String),
}

impl EcommerceError {
    /// Units missing for an `InsufficientStock` failure.
    pub fn deficit(&self) -> Option<u32> {
        match self {
            Self::InsufficientStock { requested, available, .. } => Some(requested.saturating_sub(*available)),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for EcommerceError {
    fn from(e: sqlx::Error) -> Self { Self::StorageError(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, EcommerceError>;
