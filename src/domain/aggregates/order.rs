//! Order Aggregate
//!
//! An order is a bag of independently progressing items. The order-level
//! status is always derived from the item statuses and never stored.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use crate::domain::aggregates::PaymentMethod;
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::{round_money, VariantSelection};
use crate::{EcommerceError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    #[default]
    Pending,
    #[serde(rename = "Order Placed")]
    OrderPlaced,
    Processing,
    Shipped,
    #[serde(rename = "Out for Delivery")]
    OutForDelivery,
    Delivered,
    Cancelled,
    Returned,
    #[serde(rename = "Payment Failed")]
    PaymentFailed,
}

/// Who is asking for a transition; only a payment retry may move backwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionOrigin { Fulfillment, PaymentRetry }

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::OrderPlaced => "Order Placed",
            Self::Processing => "Processing",
            Self::Shipped => "Shipped",
            Self::OutForDelivery => "Out for Delivery",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
            Self::Returned => "Returned",
            Self::PaymentFailed => "Payment Failed",
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Pending | Self::OrderPlaced | Self::Processing | Self::PaymentFailed)
    }

    /// Items whose stock is held but whose payment never completed.
    pub fn is_unpaid(&self) -> bool { matches!(self, Self::Pending | Self::PaymentFailed) }

    pub fn can_transition_to(&self, next: ItemStatus, origin: TransitionOrigin) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (PaymentFailed, Pending) => origin == TransitionOrigin::PaymentRetry,
            (_, Cancelled) => self.can_cancel(),
            (Pending, OrderPlaced) | (Pending, PaymentFailed) => true,
            (OrderPlaced, Processing) => true,
            (Processing, Shipped) => true,
            (Shipped, OutForDelivery) => true,
            (OutForDelivery, Delivered) => true,
            (Delivered, Returned) => true,
            _ => false,
        }
    }

    /// Position along the fulfillment path, used to pick the least advanced item.
    fn progress(&self) -> u8 {
        match self {
            Self::PaymentFailed => 0,
            Self::Pending => 1,
            Self::OrderPlaced => 2,
            Self::Processing => 3,
            Self::Shipped => 4,
            Self::OutForDelivery => 5,
            Self::Delivered => 6,
            Self::Cancelled | Self::Returned => 7,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl std::str::FromStr for ItemStatus {
    type Err = EcommerceError;

    fn from_str(s: &str) -> Result<Self> {
        let status = match s {
            "Pending" => Self::Pending,
            "Order Placed" | "Confirmed" => Self::OrderPlaced,
            "Processing" => Self::Processing,
            "Shipped" => Self::Shipped,
            "Out for Delivery" => Self::OutForDelivery,
            "Delivered" => Self::Delivered,
            "Cancelled" => Self::Cancelled,
            "Returned" => Self::Returned,
            "Payment Failed" => Self::PaymentFailed,
            other => return Err(EcommerceError::UnknownStatus(other.to_string())),
        };
        Ok(status)
    }
}

/// Display status of a whole order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderStatus {
    Item(ItemStatus),
    PartiallyCancelled,
    PartiallyDelivered,
    PartiallyReturned,
}

impl Serialize for OrderStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Item(s) => f.write_str(s.as_str()),
            Self::PartiallyCancelled => f.write_str("Partially Cancelled"),
            Self::PartiallyDelivered => f.write_str("Partially Delivered"),
            Self::PartiallyReturned => f.write_str("Partially Returned"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundState { Credited, Rejected, NotApplicable }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RefundRecord {
    pub amount: Decimal,
    pub state: RefundState,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub category_id: Option<Uuid>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub gender: Option<String>,
    #[serde(rename = "Price")]
    pub price: Decimal,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "Status")]
    pub status: ItemStatus,
    pub cancel_reason: Option<String>,
    pub return_reason: Option<String>,
    pub refund: Option<RefundRecord>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal { self.price * Decimal::from(self.quantity) }

    pub fn selection(&self) -> VariantSelection {
        VariantSelection::new(self.color.as_deref(), self.size.as_deref(), self.gender.as_deref())
    }

    pub fn label(&self) -> String {
        match (&self.color, &self.size) {
            (Some(c), Some(s)) => format!("{} ({}/{})", self.product_name, c, s),
            _ => self.product_name.clone(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub street1: String,
    pub street2: Option<String>,
    pub city: String,
    pub state: Option<String>,
    pub zip: String,
    pub country: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub coupon_id: Option<Uuid>,
    pub coupon_discount: Decimal,
    pub coupon_reversed: bool,
    #[serde(rename = "TotalAmount")]
    pub total_amount: Decimal,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Optimistic concurrency token, bumped by every successful save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

impl Order {
    pub fn create(
        user_id: Uuid,
        items: Vec<OrderItem>,
        coupon: Option<(Uuid, Decimal)>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
    ) -> Result<Self> {
        if items.is_empty() { return Err(EcommerceError::EmptyCart); }
        let now = Utc::now();
        let subtotal = round_money(items.iter().map(OrderItem::line_total).sum());
        let (coupon_id, coupon_discount) = match coupon {
            Some((id, discount)) => (Some(id), discount.min(subtotal)),
            None => (None, Decimal::ZERO),
        };
        let mut order = Self {
            id: Uuid::now_v7(), user_id, items, subtotal, coupon_id, coupon_discount, coupon_reversed: false,
            total_amount: round_money(subtotal - coupon_discount), shipping_address, payment_method,
            version: 0, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed {
            order_id: order.id, user_id, total: order.total_amount, payment_method,
        }));
        Ok(order)
    }

    pub fn status(&self) -> OrderStatus { derive_order_status(&self.items) }

    pub fn item(&self, item_id: Uuid) -> Result<&OrderItem> {
        self.items.iter().find(|i| i.id == item_id).ok_or(EcommerceError::OrderItemNotFound(item_id))
    }

    /// Move one item to `next`; returns its previous status.
    pub fn transition_item(&mut self, item_id: Uuid, next: ItemStatus, origin: TransitionOrigin) -> Result<ItemStatus> {
        let order_id = self.id;
        let now = Utc::now();
        let item = self.items.iter_mut().find(|i| i.id == item_id).ok_or(EcommerceError::OrderItemNotFound(item_id))?;
        let from = item.status;
        if !from.can_transition_to(next, origin) {
            return Err(EcommerceError::InvalidTransition { from: from.to_string(), to: next.to_string() });
        }
        item.status = next;
        item.updated_at = now;
        if next == ItemStatus::Delivered { item.delivered_at = Some(now); }
        self.updated_at = now;
        self.raise_event(DomainEvent::Order(OrderEvent::ItemStatusChanged { order_id, item_id, from, to: next }));
        Ok(from)
    }

    /// Move every item currently in `from` to `to`; returns the ids moved.
    pub fn transition_all(&mut self, from: ItemStatus, to: ItemStatus, origin: TransitionOrigin) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = self.items.iter().filter(|i| i.status == from).map(|i| i.id).collect();
        for id in &ids { self.transition_item(*id, to, origin)?; }
        Ok(ids)
    }

    pub fn set_reason(&mut self, item_id: Uuid, reason: Option<String>) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
            match item.status {
                ItemStatus::Returned => item.return_reason = reason,
                _ => item.cancel_reason = reason,
            }
        }
    }

    pub fn record_refund(&mut self, item_id: Uuid, refund: RefundRecord) {
        if let Some(item) = self.items.iter_mut().find(|i| i.id == item_id) {
            item.refund = Some(refund);
            self.updated_at = Utc::now();
        }
    }

    /// Every item is cancelled or returned.
    pub fn is_fully_reversed(&self) -> bool {
        self.items.iter().all(|i| matches!(i.status, ItemStatus::Cancelled | ItemStatus::Returned))
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    pub fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
}

pub fn derive_order_status(items: &[OrderItem]) -> OrderStatus {
    let Some(first) = items.first() else { return OrderStatus::Item(ItemStatus::Pending) };
    if items.iter().all(|i| i.status == first.status) { return OrderStatus::Item(first.status); }
    let any = |s: ItemStatus| items.iter().any(|i| i.status == s);
    if any(ItemStatus::Returned) { return OrderStatus::PartiallyReturned; }
    if any(ItemStatus::Delivered) { return OrderStatus::PartiallyDelivered; }
    if any(ItemStatus::Cancelled) { return OrderStatus::PartiallyCancelled; }
    let least = items.iter().map(|i| i.status).min_by_key(ItemStatus::progress);
    OrderStatus::Item(least.unwrap_or(ItemStatus::Pending))
}
