//! Order fulfillment: item status transitions, cancellation, returns and
//! reconciliation of abandoned unpaid orders.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::aggregates::{
    ItemStatus, Order, OrderItem, Payment, PaymentMethod, PaymentStatus, RefundRecord, RefundState,
    TransactionMethod, TransitionOrigin,
};
use crate::engine::refund::{compute_refund, refundable_balance};
use crate::engine::stock::StockRequest;
use crate::engine::OrderEngine;
use crate::{EcommerceError, Result};

const REFUND_SAVE_ATTEMPTS: usize = 3;
const UNPAID_CANCEL_REASON: &str = "Payment not completed";

/// Which items a reversal applies to.
#[derive(Clone, Copy, Debug)]
enum Reversal {
    Item(Uuid),
    Cancellable,
    Unpaid,
}

impl Reversal {
    fn select(&self, order: &Order) -> Vec<Uuid> {
        match self {
            Self::Item(id) => vec![*id],
            Self::Cancellable => order.items.iter().filter(|i| i.status.can_cancel()).map(|i| i.id).collect(),
            Self::Unpaid => order.items.iter().filter(|i| i.status.is_unpaid()).map(|i| i.id).collect(),
        }
    }
}

/// Whether money was actually taken for an item that was in `from`.
fn money_collected(order: &Order, from: ItemStatus, payment: Option<&Payment>) -> bool {
    match order.payment_method {
        PaymentMethod::CashOnDelivery => from == ItemStatus::Delivered,
        _ => payment.is_some_and(Payment::is_collected),
    }
}

impl OrderEngine {
    pub async fn get_order(&self, order_id: Uuid) -> Result<Order> {
        self.repos.orders.find_order(order_id).await?.ok_or(EcommerceError::OrderNotFound(order_id))
    }

    /// Save with the version check and publish the order's pending events.
    pub(crate) async fn store_order(&self, order: &mut Order) -> Result<()> {
        if !self.repos.orders.save_order(order).await? {
            tracing::warn!(order_id = %order.id, "order changed concurrently");
            return Err(EcommerceError::ConcurrentModification);
        }
        order.version += 1;
        self.publisher.publish_all(order.take_events()).await;
        Ok(())
    }

    /// Move one item to `next`, running the side effects that status implies.
    #[tracing::instrument(skip(self), fields(next = next.as_str()))]
    pub async fn transition_item_status(&self, order_id: Uuid, item_id: Uuid, next: ItemStatus) -> Result<Order> {
        match next {
            ItemStatus::Cancelled => self.cancel_item(order_id, item_id, None).await,
            ItemStatus::Returned => self.return_item(order_id, item_id, None).await,
            _ => {
                let mut order = self.get_order(order_id).await?;
                order.transition_item(item_id, next, TransitionOrigin::Fulfillment)?;
                self.store_order(&mut order).await?;
                if next == ItemStatus::Delivered { self.on_delivered(&order).await; }
                Ok(order)
            }
        }
    }

    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_item(&self, order_id: Uuid, item_id: Uuid, reason: Option<String>) -> Result<Order> {
        let (order, _) = self.reverse(order_id, Reversal::Item(item_id), ItemStatus::Cancelled, reason).await?;
        Ok(order)
    }

    #[tracing::instrument(skip(self, reason))]
    pub async fn return_item(&self, order_id: Uuid, item_id: Uuid, reason: Option<String>) -> Result<Order> {
        let (order, _) = self.reverse(order_id, Reversal::Item(item_id), ItemStatus::Returned, reason).await?;
        Ok(order)
    }

    /// Cancel every item that can still be cancelled.
    #[tracing::instrument(skip(self, reason))]
    pub async fn cancel_entire_order(&self, order_id: Uuid, reason: Option<String>) -> Result<Order> {
        let (order, _) = self.reverse(order_id, Reversal::Cancellable, ItemStatus::Cancelled, reason).await?;
        Ok(order)
    }

    /// Cancel unpaid items of orders older than the configured TTL.
    /// Returns the number of items released.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_unpaid(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - self.config.unpaid_order_ttl;
        let orders = self.repos.orders.find_unpaid_before(cutoff).await?;
        let mut released = 0;
        for order in orders {
            let reason = Some(UNPAID_CANCEL_REASON.to_string());
            match self.reverse(order.id, Reversal::Unpaid, ItemStatus::Cancelled, reason).await {
                Ok((order, ids)) => {
                    released += ids.len();
                    self.fail_pending_payment(&order).await;
                }
                Err(EcommerceError::NothingToCancel) => {}
                Err(e) => tracing::warn!(order_id = %order.id, error = %e, "failed to release unpaid order"),
            }
        }
        if released > 0 { tracing::info!(released, "released unpaid order items"); }
        Ok(released)
    }

    /// Transition the selected items to `target`, then release their stock,
    /// reverse the coupon once per order and refund what was collected.
    async fn reverse(
        &self,
        order_id: Uuid,
        reversal: Reversal,
        target: ItemStatus,
        reason: Option<String>,
    ) -> Result<(Order, Vec<Uuid>)> {
        let mut order = self.get_order(order_id).await?;
        let ids = reversal.select(&order);
        if ids.is_empty() { return Err(EcommerceError::NothingToCancel); }

        let mut previous = Vec::with_capacity(ids.len());
        for id in &ids {
            previous.push(order.transition_item(*id, target, TransitionOrigin::Fulfillment)?);
            order.set_reason(*id, reason.clone());
        }
        let coupon = order.coupon_id.filter(|_| !order.coupon_reversed);
        if coupon.is_some() { order.coupon_reversed = true; }
        self.store_order(&mut order).await?;

        let requests: Vec<StockRequest> = ids.iter()
            .filter_map(|id| order.item(*id).ok())
            .map(StockRequest::from)
            .collect();
        self.stock.release(&requests).await;
        if let Some(coupon_id) = coupon { self.coupons.reverse(coupon_id, order.user_id).await; }

        let payment = match self.repos.payments.find_by_order(order.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(order_id = %order.id, error = %e, "payment lookup failed, skipping refunds");
                None
            }
        };
        let refunds: Vec<(Uuid, bool)> = ids.iter().zip(&previous)
            .map(|(id, from)| (*id, money_collected(&order, *from, payment.as_ref())))
            .collect();
        self.refund_items(&mut order, &refunds).await;
        if let Some(payment) = payment { self.mark_refunded(&order, payment).await; }
        Ok((order, ids))
    }

    /// Credit refunds for `(item id, money collected)` pairs and record them on the order.
    pub(crate) async fn refund_items(&self, order: &mut Order, items: &[(Uuid, bool)]) {
        let mut records = Vec::with_capacity(items.len());
        let mut remaining = refundable_balance(order);
        for (id, collected) in items {
            let Ok(item) = order.item(*id).cloned() else { continue };
            let record = self.settle_refund(order, &item, *collected, remaining).await;
            if record.state == RefundState::Credited { remaining -= record.amount; }
            records.push((*id, record));
        }
        self.record_refunds(order, &records).await;
    }

    async fn settle_refund(&self, order: &Order, item: &OrderItem, collected: bool, remaining: Decimal) -> RefundRecord {
        let amount = if collected { compute_refund(order, item).min(remaining) } else { Decimal::ZERO };
        if amount.is_zero() {
            return RefundRecord { amount, state: RefundState::NotApplicable, at: Utc::now() };
        }
        let description = format!("Refund for {} in order {}", item.label(), order.id);
        let state = match self.wallet
            .credit_wallet(order.user_id, amount, &description, Some(order.id), TransactionMethod::Refund)
            .await
        {
            Ok(_) => RefundState::Credited,
            Err(e) => {
                tracing::warn!(order_id = %order.id, item_id = %item.id, error = %e, "refund rejected");
                RefundState::Rejected
            }
        };
        RefundRecord { amount, state, at: Utc::now() }
    }

    async fn record_refunds(&self, order: &mut Order, records: &[(Uuid, RefundRecord)]) {
        if records.is_empty() { return; }
        for _ in 0..REFUND_SAVE_ATTEMPTS {
            for (id, record) in records { order.record_refund(*id, record.clone()); }
            match self.repos.orders.save_order(order).await {
                Ok(true) => {
                    order.version += 1;
                    return;
                }
                Ok(false) => match self.get_order(order.id).await {
                    Ok(fresh) => *order = fresh,
                    Err(e) => {
                        tracing::warn!(order_id = %order.id, error = %e, "failed to reload order for refund records");
                        return;
                    }
                },
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "failed to save refund records");
                    return;
                }
            }
        }
        tracing::warn!(order_id = %order.id, "gave up saving refund records after repeated conflicts");
    }

    async fn mark_refunded(&self, order: &Order, mut payment: Payment) {
        if !order.is_fully_reversed() || payment.status != PaymentStatus::Successful { return; }
        payment.set_status(PaymentStatus::Refunded);
        if let Err(e) = self.repos.payments.update_payment(&payment).await {
            tracing::warn!(order_id = %order.id, error = %e, "failed to mark payment refunded");
        }
    }

    async fn fail_pending_payment(&self, order: &Order) {
        match self.repos.payments.find_by_order(order.id).await {
            Ok(Some(mut payment)) if payment.status == PaymentStatus::Pending => {
                payment.set_status(PaymentStatus::Failed);
                if let Err(e) = self.repos.payments.update_payment(&payment).await {
                    tracing::warn!(order_id = %order.id, error = %e, "failed to mark payment failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(order_id = %order.id, error = %e, "payment lookup failed"),
        }
    }

    async fn on_delivered(&self, order: &Order) {
        let settled = order.items.iter()
            .all(|i| matches!(i.status, ItemStatus::Delivered | ItemStatus::Cancelled | ItemStatus::Returned));
        if order.payment_method == PaymentMethod::CashOnDelivery && settled {
            match self.repos.payments.find_by_order(order.id).await {
                Ok(Some(mut payment)) if payment.status == PaymentStatus::Pending => {
                    payment.set_status(PaymentStatus::Successful);
                    if let Err(e) = self.repos.payments.update_payment(&payment).await {
                        tracing::warn!(order_id = %order.id, error = %e, "failed to record cash collection");
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(order_id = %order.id, error = %e, "payment lookup failed"),
            }
        }
        if let Err(e) = self.wallet.reward_referral(order.user_id).await {
            tracing::warn!(user_id = %order.user_id, error = %e, "referral reward failed");
        }
    }
}
