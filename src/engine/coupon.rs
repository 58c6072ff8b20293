//! Coupon engine: eligibility, discount computation and usage accounting.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, CouponLine, OrderItem, RedeemOutcome};
use crate::domain::events::{CouponEvent, DomainEvent};
use crate::publisher::EventPublisher;
use crate::store::CouponStore;
use crate::{EcommerceError, Result};

pub fn coupon_lines(items: &[OrderItem]) -> Vec<CouponLine> {
    items.iter()
        .map(|i| CouponLine { product_id: i.product_id, category_id: i.category_id, line_total: i.line_total() })
        .collect()
}

#[derive(Clone)]
pub struct CouponEngine {
    coupons: Arc<dyn CouponStore>,
    publisher: Arc<dyn EventPublisher>,
}

impl CouponEngine {
    pub fn new(coupons: Arc<dyn CouponStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { coupons, publisher }
    }

    /// Check the coupon and compute its discount without consuming a use.
    pub async fn quote(&self, code: &str, user_id: Uuid, items: &[OrderItem]) -> Result<(Coupon, Decimal)> {
        let coupon = self.coupons.find_by_code(code).await?
            .ok_or_else(|| EcommerceError::InvalidCoupon(code.to_string()))?;
        coupon.check_redeemable(user_id, Utc::now())?;
        let discount = coupon.discount_for(&coupon_lines(items))?;
        Ok((coupon, discount))
    }

    /// Check the coupon and consume one use for `user_id`.
    #[tracing::instrument(skip(self, items), fields(%user_id))]
    pub async fn validate(&self, code: &str, user_id: Uuid, items: &[OrderItem]) -> Result<(Coupon, Decimal)> {
        let (coupon, discount) = self.quote(code, user_id, items).await?;
        match self.coupons.redeem(coupon.id, user_id).await? {
            Some(RedeemOutcome::Redeemed) => {
                self.publisher.publish(&DomainEvent::Coupon(CouponEvent::Redeemed {
                    coupon_id: coupon.id, user_id, discount,
                })).await;
                Ok((coupon, discount))
            }
            Some(RedeemOutcome::UsageLimitReached) => Err(EcommerceError::UsageLimitReached),
            Some(RedeemOutcome::PerUserLimitReached) => Err(EcommerceError::PerUserLimitReached),
            None => Err(EcommerceError::InvalidCoupon(code.to_string())),
        }
    }

    /// Give back one use of the coupon. Never fails; problems are logged.
    #[tracing::instrument(skip(self))]
    pub async fn reverse(&self, coupon_id: Uuid, user_id: Uuid) {
        match self.coupons.release(coupon_id, user_id).await {
            Ok(true) => {
                self.publisher.publish(&DomainEvent::Coupon(CouponEvent::Released { coupon_id, user_id })).await;
            }
            Ok(false) => tracing::warn!("no coupon use recorded for user, nothing to reverse"),
            Err(e) => tracing::warn!(error = %e, "coupon reversal failed"),
        }
    }
}
