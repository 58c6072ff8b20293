//! Coupon Aggregate
//!
//! Usage is tracked as an explicit per-user counter; `usage_count` always
//! equals the sum of the per-user counts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use crate::domain::value_objects::round_money;
use crate::{EcommerceError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    /// Percentage off the eligible amount.
    pub discount: Decimal,
    pub min_amount: Decimal,
    /// Cap on the absolute discount.
    pub max_amount: Decimal,
    pub expiry: DateTime<Utc>,
    pub applicable_users: Vec<Uuid>,
    pub applicable_products: Vec<Uuid>,
    pub applicable_categories: Vec<Uuid>,
    pub usage_limit: Option<u32>,
    pub per_user_limit: u32,
    usage_count: u32,
    usage_by_user: HashMap<Uuid, u32>,
}

/// A priced line as seen by the coupon engine.
#[derive(Clone, Debug)]
pub struct CouponLine {
    pub product_id: Uuid,
    pub category_id: Option<Uuid>,
    pub line_total: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedeemOutcome { Redeemed, UsageLimitReached, PerUserLimitReached }

impl Coupon {
    pub fn new(code: impl Into<String>, discount: Decimal, max_amount: Decimal, expiry: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(), code: code.into(), discount, min_amount: Decimal::ZERO, max_amount, expiry,
            applicable_users: vec![], applicable_products: vec![], applicable_categories: vec![],
            usage_limit: None, per_user_limit: 1, usage_count: 0, usage_by_user: HashMap::new(),
        }
    }

    /// Rebuild a coupon from persisted usage rows.
    pub fn with_usage(mut self, usage_by_user: HashMap<Uuid, u32>) -> Self {
        self.usage_by_user = usage_by_user;
        self.usage_by_user.retain(|_, uses| *uses > 0);
        self.usage_count = self.usage_by_user.values().sum();
        self
    }

    pub fn usage_count(&self) -> u32 { self.usage_count }
    pub fn uses_by(&self, user_id: Uuid) -> u32 { self.usage_by_user.get(&user_id).copied().unwrap_or(0) }

    /// Expiry, usage caps and user eligibility, in that order.
    pub fn check_redeemable(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if now > self.expiry { return Err(EcommerceError::CouponExpired); }
        if self.usage_limit.is_some_and(|limit| self.usage_count >= limit) {
            return Err(EcommerceError::UsageLimitReached);
        }
        if self.uses_by(user_id) >= self.per_user_limit { return Err(EcommerceError::PerUserLimitReached); }
        if !self.applicable_users.is_empty() && !self.applicable_users.contains(&user_id) {
            return Err(EcommerceError::UserNotEligible);
        }
        Ok(())
    }

    fn is_restricted(&self) -> bool {
        !self.applicable_products.is_empty() || !self.applicable_categories.is_empty()
    }

    fn is_eligible(&self, line: &CouponLine) -> bool {
        let product_ok = self.applicable_products.is_empty() || self.applicable_products.contains(&line.product_id);
        let category_ok = self.applicable_categories.is_empty()
            || line.category_id.is_some_and(|c| self.applicable_categories.contains(&c));
        product_ok && category_ok
    }

    /// Discount over the eligible lines, capped at `max_amount`.
    pub fn discount_for(&self, lines: &[CouponLine]) -> Result<Decimal> {
        let total: Decimal = lines.iter().map(|l| l.line_total).sum();
        let eligible: Decimal = lines.iter().filter(|l| self.is_eligible(l)).map(|l| l.line_total).sum();
        if total < self.min_amount {
            return Err(EcommerceError::MinimumAmountNotMet { required: self.min_amount });
        }
        if self.is_restricted() && eligible.is_zero() { return Err(EcommerceError::NoEligibleItems); }
        let discount = eligible * self.discount / Decimal::ONE_HUNDRED;
        Ok(round_money(discount.min(self.max_amount)))
    }

    /// Consume one use for `user_id` if both caps allow it.
    pub fn record_use(&mut self, user_id: Uuid) -> RedeemOutcome {
        if self.usage_limit.is_some_and(|limit| self.usage_count >= limit) {
            return RedeemOutcome::UsageLimitReached;
        }
        if self.uses_by(user_id) >= self.per_user_limit { return RedeemOutcome::PerUserLimitReached; }
        *self.usage_by_user.entry(user_id).or_insert(0) += 1;
        self.usage_count += 1;
        RedeemOutcome::Redeemed
    }

    /// Give back exactly one use of `user_id`. Returns false when the user had none.
    pub fn release_use(&mut self, user_id: Uuid) -> bool {
        let Some(uses) = self.usage_by_user.get_mut(&user_id) else { return false };
        *uses -= 1;
        if *uses == 0 { self.usage_by_user.remove(&user_id); }
        self.usage_count = self.usage_count.saturating_sub(1);
        true
    }
}
