//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;
use crate::domain::aggregates::{ItemStatus, PaymentMethod, TransactionMethod};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "aggregate", content = "event")]
pub enum DomainEvent {
    Inventory(InventoryEvent),
    Order(OrderEvent),
    Coupon(CouponEvent),
    Wallet(WalletEvent),
}

impl DomainEvent {
    /// Subject suffix used when publishing.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inventory(InventoryEvent::Reserved { .. }) => "inventory.reserved",
            Self::Inventory(InventoryEvent::Released { .. }) => "inventory.released",
            Self::Order(OrderEvent::Placed { .. }) => "order.placed",
            Self::Order(OrderEvent::PaymentConfirmed { .. }) => "order.payment_confirmed",
            Self::Order(OrderEvent::PaymentFailed { .. }) => "order.payment_failed",
            Self::Order(OrderEvent::ItemStatusChanged { .. }) => "order.item_status_changed",
            Self::Coupon(CouponEvent::Redeemed { .. }) => "coupon.redeemed",
            Self::Coupon(CouponEvent::Released { .. }) => "coupon.released",
            Self::Wallet(WalletEvent::Credited { .. }) => "wallet.credited",
            Self::Wallet(WalletEvent::Debited { .. }) => "wallet.debited",
            Self::Wallet(WalletEvent::ReferralRewarded { .. }) => "wallet.referral_rewarded",
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum InventoryEvent {
    Reserved { product_id: Uuid, variant_id: Option<Uuid>, quantity: u32 },
    Released { product_id: Uuid, variant_id: Option<Uuid>, quantity: u32 },
}

#[derive(Clone, Debug, Serialize)]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: Uuid, total: Decimal, payment_method: PaymentMethod },
    PaymentConfirmed { order_id: Uuid, gateway_payment_id: String },
    PaymentFailed { order_id: Uuid },
    ItemStatusChanged { order_id: Uuid, item_id: Uuid, from: ItemStatus, to: ItemStatus },
}

#[derive(Clone, Debug, Serialize)]
pub enum CouponEvent {
    Redeemed { coupon_id: Uuid, user_id: Uuid, discount: Decimal },
    Released { coupon_id: Uuid, user_id: Uuid },
}

#[derive(Clone, Debug, Serialize)]
pub enum WalletEvent {
    Credited { user_id: Uuid, amount: Decimal, order_id: Option<Uuid>, method: TransactionMethod },
    Debited { user_id: Uuid, amount: Decimal, order_id: Option<Uuid> },
    ReferralRewarded { referrer_id: Uuid, referred_user_id: Uuid, amount: Decimal },
}
