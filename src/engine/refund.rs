//! Refund, Wallet and Referral engine
//!
//! Refunds are credited to the customer's wallet. A coupon discount is spread
//! across the order in proportion to each line's share of the subtotal, so a
//! refunded item returns what was actually paid for it.

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{
    Order, OrderItem, RefundState, TransactionKind, TransactionMethod, WalletStatus, WalletTransaction,
};
use crate::domain::events::{DomainEvent, WalletEvent};
use crate::domain::value_objects::round_money;
use crate::publisher::EventPublisher;
use crate::store::{OrderStore, ReferralStore, WalletStore};
use crate::{EcommerceError, Result};

/// What was paid for `item`, net of its share of the order's coupon discount.
pub fn compute_refund(order: &Order, item: &OrderItem) -> Decimal {
    let gross = item.line_total();
    if order.coupon_id.is_none() || order.coupon_discount.is_zero() || order.subtotal.is_zero() {
        return round_money(gross);
    }
    let paid_share = Decimal::ONE - order.coupon_discount / order.subtotal;
    round_money(gross * paid_share).max(Decimal::ZERO)
}

/// Part of the order total not yet credited back. Per-item rounding can push
/// the sum of item refunds past what was paid, so refunds are capped by this.
pub fn refundable_balance(order: &Order) -> Decimal {
    let credited: Decimal = order.items.iter()
        .filter_map(|i| i.refund.as_ref())
        .filter(|r| r.state == RefundState::Credited)
        .map(|r| r.amount)
        .sum();
    (order.total_amount - credited).max(Decimal::ZERO)
}

#[derive(Clone)]
pub struct WalletEngine {
    wallets: Arc<dyn WalletStore>,
    referrals: Arc<dyn ReferralStore>,
    orders: Arc<dyn OrderStore>,
    publisher: Arc<dyn EventPublisher>,
    ceiling: Decimal,
    referral_bonus: Decimal,
}

impl WalletEngine {
    pub fn new(
        wallets: Arc<dyn WalletStore>,
        referrals: Arc<dyn ReferralStore>,
        orders: Arc<dyn OrderStore>,
        publisher: Arc<dyn EventPublisher>,
        ceiling: Decimal,
        referral_bonus: Decimal,
    ) -> Self {
        Self { wallets, referrals, orders, publisher, ceiling, referral_bonus }
    }

    /// Credit the user's wallet and record the transaction.
    #[tracing::instrument(skip(self, description), fields(%user_id, %amount))]
    pub async fn credit_wallet(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
        method: TransactionMethod,
    ) -> Result<WalletTransaction> {
        if amount <= Decimal::ZERO { return Err(EcommerceError::InvalidQuantity); }
        let wallet = self.wallets.find_wallet(user_id).await?.ok_or(EcommerceError::WalletNotFound)?;
        wallet.can_credit(amount, self.ceiling)?;

        let txn = WalletTransaction::new(user_id, TransactionKind::Credit, amount, description, order_id, method);
        if !self.wallets.apply_credit(&txn, self.ceiling).await? {
            // Lost a race; report what the wallet looks like now.
            let wallet = self.wallets.find_wallet(user_id).await?.ok_or(EcommerceError::WalletNotFound)?;
            wallet.can_credit(amount, self.ceiling)?;
            return Err(EcommerceError::WalletLimitExceeded { limit: self.ceiling });
        }
        self.publisher.publish(&DomainEvent::Wallet(WalletEvent::Credited { user_id, amount, order_id, method })).await;
        Ok(txn)
    }

    /// Take `amount` from the user's wallet and record the transaction.
    #[tracing::instrument(skip(self, description), fields(%user_id, %amount))]
    pub async fn debit_wallet(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: &str,
        order_id: Option<Uuid>,
    ) -> Result<WalletTransaction> {
        let wallet = self.wallets.find_wallet(user_id).await?.ok_or(EcommerceError::WalletNotFound)?;
        wallet.can_debit(amount)?;

        let txn = WalletTransaction::new(
            user_id, TransactionKind::Debit, amount, description, order_id, TransactionMethod::OrderPayment,
        );
        if !self.wallets.apply_debit(&txn).await? {
            let wallet = self.wallets.find_wallet(user_id).await?.ok_or(EcommerceError::WalletNotFound)?;
            if wallet.status != WalletStatus::Active { return Err(EcommerceError::WalletInactive); }
            return Err(EcommerceError::InsufficientBalance);
        }
        self.publisher.publish(&DomainEvent::Wallet(WalletEvent::Debited { user_id, amount, order_id })).await;
        Ok(txn)
    }

    /// Pay the referrer once the referred user's first order is delivered.
    /// Returns the referrer's credit when a reward was paid.
    #[tracing::instrument(skip(self))]
    pub async fn reward_referral(&self, user_id: Uuid) -> Result<Option<WalletTransaction>> {
        if self.orders.count_delivered_orders(user_id).await? != 1 { return Ok(None); }
        let Some(referral) = self.referrals.find_referral(user_id).await? else { return Ok(None) };
        if referral.reward_claimed || !self.referrals.claim(user_id).await? { return Ok(None); }

        let description = "Referral bonus";
        match self.credit_wallet(referral.referrer_id, self.referral_bonus, description, None, TransactionMethod::Referral).await {
            Ok(txn) => {
                tracing::info!(referrer_id = %referral.referrer_id, "referral bonus credited");
                self.publisher.publish(&DomainEvent::Wallet(WalletEvent::ReferralRewarded {
                    referrer_id: referral.referrer_id, referred_user_id: user_id, amount: self.referral_bonus,
                })).await;
                Ok(Some(txn))
            }
            Err(e) => {
                if let Err(unclaim) = self.referrals.unclaim(user_id).await {
                    tracing::warn!(error = %unclaim, "failed to reopen referral claim");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::order::tests::item;
    use crate::domain::aggregates::{PaymentMethod, RefundRecord, Referral, ShippingAddress, Wallet};
    use crate::publisher::LogPublisher;
    use crate::store::MemoryStore;

    fn engine(store: &Arc<MemoryStore>) -> WalletEngine {
        WalletEngine::new(
            store.clone(), store.clone(), store.clone(), Arc::new(LogPublisher),
            Decimal::new(100_000, 0), Decimal::new(100, 0),
        )
    }

    #[test]
    fn test_refund_shares_coupon_discount() {
        let o = Order::create(
            Uuid::new_v4(), vec![item(300, 1), item(200, 1)], Some((Uuid::new_v4(), Decimal::new(50, 0))),
            ShippingAddress::default(), PaymentMethod::Online,
        ).unwrap();
        assert_eq!(compute_refund(&o, &o.items[0]), Decimal::new(270, 0));
        assert_eq!(compute_refund(&o, &o.items[1]), Decimal::new(180, 0));
    }

    #[test]
    fn test_refund_without_coupon_is_line_total() {
        let o = Order::create(Uuid::new_v4(), vec![item(120, 3)], None, ShippingAddress::default(), PaymentMethod::Online).unwrap();
        assert_eq!(compute_refund(&o, &o.items[0]), Decimal::new(360, 0));
    }

    #[test]
    fn test_rounded_refunds_never_exceed_order_total() {
        let mut o = Order::create(
            Uuid::new_v4(), vec![item(100, 1), item(100, 1), item(100, 1)], Some((Uuid::new_v4(), Decimal::new(10, 0))),
            ShippingAddress::default(), PaymentMethod::Wallet,
        ).unwrap();
        assert_eq!(o.total_amount, Decimal::new(290, 0));
        assert_eq!(compute_refund(&o, &o.items[0]), Decimal::new(9667, 2));

        let ids: Vec<Uuid> = o.items.iter().map(|i| i.id).collect();
        for id in &ids[..2] {
            let refund = RefundRecord { amount: Decimal::new(9667, 2), state: RefundState::Credited, at: chrono::Utc::now() };
            o.record_refund(*id, refund);
        }
        o.record_refund(ids[2], RefundRecord { amount: Decimal::ONE, state: RefundState::Rejected, at: chrono::Utc::now() });
        assert_eq!(refundable_balance(&o), Decimal::new(9666, 2));
    }

    #[tokio::test]
    async fn test_credit_rejected_above_ceiling() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let mut wallet = Wallet::open(user);
        wallet.balance = Decimal::new(99_950, 0);
        store.put_wallet(wallet).await;
        let e = engine(&store);
        let err = e.credit_wallet(user, Decimal::new(100, 0), "Refund", None, TransactionMethod::Refund).await.unwrap_err();
        assert!(matches!(err, EcommerceError::WalletLimitExceeded { .. }));
        assert_eq!(store.wallet(user).await.unwrap().balance, Decimal::new(99_950, 0));
        assert!(store.transactions(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_inactive_wallets() {
        let store = Arc::new(MemoryStore::new());
        let e = engine(&store);
        let nobody = Uuid::new_v4();
        assert!(matches!(
            e.credit_wallet(nobody, Decimal::ONE, "Refund", None, TransactionMethod::Refund).await,
            Err(EcommerceError::WalletNotFound)
        ));
        let user = Uuid::new_v4();
        let mut wallet = Wallet::open(user);
        wallet.status = WalletStatus::Inactive;
        store.put_wallet(wallet).await;
        assert!(matches!(
            e.credit_wallet(user, Decimal::ONE, "Refund", None, TransactionMethod::Refund).await,
            Err(EcommerceError::WalletInactive)
        ));
    }

    #[tokio::test]
    async fn test_debit_requires_balance() {
        let store = Arc::new(MemoryStore::new());
        let user = Uuid::new_v4();
        let mut wallet = Wallet::open(user);
        wallet.balance = Decimal::new(50, 0);
        store.put_wallet(wallet).await;
        let e = engine(&store);
        assert!(matches!(
            e.debit_wallet(user, Decimal::new(80, 0), "Order payment", None).await,
            Err(EcommerceError::InsufficientBalance)
        ));
        e.debit_wallet(user, Decimal::new(20, 0), "Order payment", None).await.unwrap();
        assert_eq!(store.wallet(user).await.unwrap().balance, Decimal::new(30, 0));
    }

    #[tokio::test]
    async fn test_referral_needs_a_delivered_order() {
        let store = Arc::new(MemoryStore::new());
        let (user, referrer) = (Uuid::new_v4(), Uuid::new_v4());
        store.put_wallet(Wallet::open(referrer)).await;
        store.put_referral(Referral { user_id: user, referrer_id: referrer, reward_claimed: false }).await;
        let e = engine(&store);
        assert!(e.reward_referral(user).await.unwrap().is_none());
        assert!(!store.referral(user).await.unwrap().reward_claimed);
    }
}
