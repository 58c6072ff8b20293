//! Payment Bridge
//!
//! Commits an [`OrderDraft`] according to how it is being paid for, and
//! handles the gateway's success and failure callbacks. Gateway callbacks are
//! authenticated with an HMAC-SHA256 signature over `"<gateway order id>|<payment id>"`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::domain::aggregates::{
    ItemStatus, Order, Payment, PaymentMethod, PaymentStatus, RefundState, TransactionMethod, TransitionOrigin,
};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::engine::assembler::OrderDraft;
use crate::engine::stock::StockRequest;
use crate::engine::OrderEngine;
use crate::{EcommerceError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Hex encoded signature the gateway sends for a captured payment.
pub fn sign_gateway_payment(secret: &str, gateway_order_id: &str, payment_id: &str) -> String {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_gateway_signature(secret: &str, gateway_order_id: &str, payment_id: &str, signature: &str) -> bool {
    if signature.bytes().any(|b| b.is_ascii_uppercase()) { return false; }
    let Ok(expected) = hex::decode(signature) else { return false };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else { return false };
    mac.update(format!("{}|{}", gateway_order_id, payment_id).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// How a confirmed draft is being paid for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentOutcome {
    CashOnDelivery,
    Wallet,
    /// A gateway order was created and the customer is paying.
    GatewayPending { gateway_order_id: String },
    /// The gateway reported a failure before the order was committed.
    GatewayFailed { gateway_order_id: String },
}

impl PaymentOutcome {
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::CashOnDelivery => PaymentMethod::CashOnDelivery,
            Self::Wallet => PaymentMethod::Wallet,
            Self::GatewayPending { .. } | Self::GatewayFailed { .. } => PaymentMethod::Online,
        }
    }

    fn item_status(&self) -> ItemStatus {
        match self {
            Self::CashOnDelivery | Self::Wallet => ItemStatus::OrderPlaced,
            Self::GatewayPending { .. } => ItemStatus::Pending,
            Self::GatewayFailed { .. } => ItemStatus::PaymentFailed,
        }
    }

    fn payment_status(&self) -> PaymentStatus {
        match self {
            Self::CashOnDelivery | Self::GatewayPending { .. } => PaymentStatus::Pending,
            Self::Wallet => PaymentStatus::Successful,
            Self::GatewayFailed { .. } => PaymentStatus::Failed,
        }
    }

    fn gateway_order_id(&self) -> Option<&str> {
        match self {
            Self::GatewayPending { gateway_order_id } | Self::GatewayFailed { gateway_order_id } => Some(gateway_order_id),
            _ => None,
        }
    }
}

impl OrderEngine {
    /// Reserve stock, consume the coupon, take payment and persist the order.
    /// Every step that fails undoes the steps before it.
    #[tracing::instrument(skip(self, draft), fields(user_id = %draft.user_id, method = outcome.method().as_str()))]
    pub async fn confirm_order(&self, draft: OrderDraft, outcome: PaymentOutcome) -> Result<Order> {
        if draft.items.is_empty() { return Err(EcommerceError::EmptyCart); }
        if outcome == PaymentOutcome::Wallet {
            let wallet = self.repos.wallets.find_wallet(draft.user_id).await?.ok_or(EcommerceError::WalletNotFound)?;
            wallet.can_debit(draft.total_amount)?;
        }

        let requests: Vec<StockRequest> = draft.items.iter().map(StockRequest::from).collect();
        self.stock.reserve(&requests).await?;

        let coupon = match draft.coupon_code() {
            Some(code) => match self.coupons.validate(code, draft.user_id, &draft.items).await {
                Ok((coupon, discount)) => Some((coupon.id, discount)),
                Err(e) => {
                    self.stock.release(&requests).await;
                    return Err(e);
                }
            },
            None => None,
        };

        match self.commit_order(&draft, coupon, &outcome).await {
            Ok(order) => {
                if !draft.consumed_cart_lines.is_empty() {
                    if let Err(e) = self.repos.carts.remove_lines(draft.user_id, &draft.consumed_cart_lines).await {
                        tracing::warn!(order_id = %order.id, error = %e, "failed to clear purchased cart lines");
                    }
                }
                tracing::info!(order_id = %order.id, total = %order.total_amount, "order confirmed");
                Ok(order)
            }
            Err(e) => {
                if let Some((coupon_id, _)) = coupon { self.coupons.reverse(coupon_id, draft.user_id).await; }
                self.stock.release(&requests).await;
                Err(e)
            }
        }
    }

    async fn commit_order(
        &self,
        draft: &OrderDraft,
        coupon: Option<(Uuid, rust_decimal::Decimal)>,
        outcome: &PaymentOutcome,
    ) -> Result<Order> {
        let mut items = draft.items.clone();
        for item in &mut items { item.status = outcome.item_status(); }
        let mut order = Order::create(draft.user_id, items, coupon, draft.shipping_address.clone(), outcome.method())?;

        let debited = match outcome {
            PaymentOutcome::Wallet => {
                let description = format!("Payment for order {}", order.id);
                Some(self.wallet.debit_wallet(order.user_id, order.total_amount, &description, Some(order.id)).await?)
            }
            _ => None,
        };

        if let Err(e) = self.repos.orders.insert_order(&order).await {
            if let Some(txn) = debited {
                let description = format!("Reversal of payment for order {}", order.id);
                if let Err(credit) = self.wallet
                    .credit_wallet(txn.user_id, txn.amount, &description, Some(order.id), TransactionMethod::Refund)
                    .await
                {
                    tracing::error!(order_id = %order.id, error = %credit, "failed to return wallet payment");
                }
            }
            return Err(e);
        }

        let mut payment = Payment::new(order.id, order.user_id, outcome.method(), outcome.payment_status(), order.total_amount);
        payment.gateway_order_id = outcome.gateway_order_id().map(str::to_string);
        if let Err(e) = self.repos.payments.insert_payment(&payment).await {
            tracing::error!(order_id = %order.id, error = %e, "order stored without payment record");
        }

        self.publisher.publish_all(order.take_events()).await;
        Ok(order)
    }

    /// Gateway success callback.
    #[tracing::instrument(skip(self, signature))]
    pub async fn confirm_gateway_payment(&self, order_id: Uuid, payment_id: &str, signature: &str) -> Result<Order> {
        let mut payment = self.repos.payments.find_by_order(order_id).await?.ok_or(EcommerceError::PaymentNotFound(order_id))?;
        let gateway_order_id = payment.gateway_order_id.clone().ok_or(EcommerceError::SignatureMismatch)?;
        if !verify_gateway_signature(&self.config.gateway_secret, &gateway_order_id, payment_id, signature) {
            tracing::warn!("rejected gateway callback with bad signature");
            return Err(EcommerceError::SignatureMismatch);
        }

        let mut order = self.get_order(order_id).await?;
        if payment.status == PaymentStatus::Successful { return Ok(order); }

        order.transition_all(ItemStatus::PaymentFailed, ItemStatus::Pending, TransitionOrigin::PaymentRetry)?;
        let placed = order.transition_all(ItemStatus::Pending, ItemStatus::OrderPlaced, TransitionOrigin::Fulfillment)?;
        order.raise_event(DomainEvent::Order(OrderEvent::PaymentConfirmed {
            order_id, gateway_payment_id: payment_id.to_string(),
        }));
        self.store_order(&mut order).await?;

        payment.gateway_payment_id = Some(payment_id.to_string());
        payment.set_status(PaymentStatus::Successful);
        self.repos.payments.update_payment(&payment).await?;

        // Items cancelled while the payment was pending were never refunded.
        let uncollected: Vec<(Uuid, bool)> = order.items.iter()
            .filter(|i| i.status == ItemStatus::Cancelled)
            .filter(|i| i.refund.as_ref().map_or(true, |r| r.state != RefundState::Credited))
            .map(|i| (i.id, true))
            .collect();
        if !uncollected.is_empty() {
            tracing::info!(items = uncollected.len(), "refunding items cancelled before capture");
            self.refund_items(&mut order, &uncollected).await;
        }
        if placed.is_empty() && order.is_fully_reversed() {
            payment.set_status(PaymentStatus::Refunded);
            self.repos.payments.update_payment(&payment).await?;
        }
        Ok(order)
    }

    /// Gateway failure callback.
    #[tracing::instrument(skip(self))]
    pub async fn fail_payment(&self, order_id: Uuid) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let failed = order.transition_all(ItemStatus::Pending, ItemStatus::PaymentFailed, TransitionOrigin::Fulfillment)?;
        if failed.is_empty() { return Ok(order); }
        order.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id }));
        self.store_order(&mut order).await?;

        if let Some(mut payment) = self.repos.payments.find_by_order(order_id).await? {
            payment.set_status(PaymentStatus::Failed);
            self.repos.payments.update_payment(&payment).await?;
        }
        Ok(order)
    }

    /// Move failed items back to pending for a new gateway attempt.
    #[tracing::instrument(skip(self))]
    pub async fn retry_payment(&self, order_id: Uuid, gateway_order_id: &str) -> Result<Order> {
        let mut order = self.get_order(order_id).await?;
        let retried = order.transition_all(ItemStatus::PaymentFailed, ItemStatus::Pending, TransitionOrigin::PaymentRetry)?;
        if retried.is_empty() {
            return Err(EcommerceError::InvalidTransition {
                from: order.status().to_string(),
                to: ItemStatus::Pending.to_string(),
            });
        }
        self.store_order(&mut order).await?;

        let mut payment = self.repos.payments.find_by_order(order_id).await?.ok_or(EcommerceError::PaymentNotFound(order_id))?;
        payment.gateway_order_id = Some(gateway_order_id.to_string());
        payment.gateway_payment_id = None;
        payment.set_status(PaymentStatus::Pending);
        self.repos.payments.update_payment(&payment).await?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_round_trip() {
        let sig = sign_gateway_payment("topsecret", "order_123", "pay_456");
        assert_eq!(sig.len(), 64);
        assert!(verify_gateway_signature("topsecret", "order_123", "pay_456", &sig));
        assert!(!verify_gateway_signature("topsecret", "order_123", "pay_457", &sig));
        assert!(!verify_gateway_signature("other", "order_123", "pay_456", &sig));
    }

    #[test]
    fn test_signature_must_match_exactly() {
        let sig = sign_gateway_payment("topsecret", "order_123", "pay_456");
        assert!(!verify_gateway_signature("topsecret", "order_123", "pay_456", &sig.to_uppercase()));
        assert!(!verify_gateway_signature("topsecret", "order_123", "pay_456", &sig[..62]));
        assert!(!verify_gateway_signature("topsecret", "order_123", "pay_456", "not hex"));
    }

    #[test]
    fn test_outcome_statuses() {
        let pending = PaymentOutcome::GatewayPending { gateway_order_id: "g1".into() };
        assert_eq!(pending.item_status(), ItemStatus::Pending);
        assert_eq!(pending.payment_status(), PaymentStatus::Pending);
        assert_eq!(PaymentOutcome::Wallet.payment_status(), PaymentStatus::Successful);
        assert_eq!(PaymentOutcome::CashOnDelivery.item_status(), ItemStatus::OrderPlaced);
        let failed = PaymentOutcome::GatewayFailed { gateway_order_id: "g1".into() };
        assert_eq!(failed.item_status(), ItemStatus::PaymentFailed);
        assert_eq!(failed.method(), PaymentMethod::Online);
    }
}
