//! Aggregates module
pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;
pub mod wallet;

pub use cart::{Cart, CartLine, CartLineSelector};
pub use coupon::{Coupon, CouponLine, RedeemOutcome};
pub use order::{derive_order_status, ItemStatus, Order, OrderItem, OrderStatus, RefundRecord, RefundState, ShippingAddress, TransitionOrigin};
pub use product::{Category, Product, ProductStatus, ProductVariant};
pub use wallet::{
    Payment, PaymentMethod, PaymentStatus, Referral, TransactionKind, TransactionMethod, TransactionStatus, Wallet,
    WalletStatus, WalletTransaction,
};
