//! Wallet, Payment and Referral Aggregates

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::{EcommerceError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletStatus { #[default] Active, Inactive }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub status: WalletStatus,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn open(user_id: Uuid) -> Self {
        Self { id: Uuid::new_v4(), user_id, balance: Decimal::ZERO, status: WalletStatus::Active, updated_at: Utc::now() }
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.status != WalletStatus::Active { return Err(EcommerceError::WalletInactive); }
        Ok(())
    }

    pub fn can_credit(&self, amount: Decimal, ceiling: Decimal) -> Result<()> {
        self.ensure_active()?;
        if self.balance + amount > ceiling { return Err(EcommerceError::WalletLimitExceeded { limit: ceiling }); }
        Ok(())
    }

    pub fn can_debit(&self, amount: Decimal) -> Result<()> {
        self.ensure_active()?;
        if self.balance < amount { return Err(EcommerceError::InsufficientBalance); }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionKind { Credit, Debit }

/// Why money moved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMethod { Refund, Referral, OrderPayment }

impl TransactionMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Refund => "Refund", Self::Referral => "Referral", Self::OrderPayment => "OrderPayment" }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus { Completed, Failed }

/// Immutable audit row for every wallet movement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub description: String,
    pub order_id: Option<Uuid>,
    pub method: TransactionMethod,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn new(user_id: Uuid, kind: TransactionKind, amount: Decimal, description: impl Into<String>, order_id: Option<Uuid>, method: TransactionMethod) -> Self {
        Self {
            id: Uuid::now_v7(), user_id, kind, amount, description: description.into(), order_id, method,
            status: TransactionStatus::Completed, created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod { CashOnDelivery, Online, Wallet }

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self { Self::CashOnDelivery => "CashOnDelivery", Self::Online => "Online", Self::Wallet => "Wallet" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CashOnDelivery" | "COD" => Some(Self::CashOnDelivery),
            "Online" => Some(Self::Online),
            "Wallet" => Some(Self::Wallet),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus { #[default] Pending, Successful, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Pending => "Pending", Self::Successful => "Successful", Self::Failed => "Failed", Self::Refunded => "Refunded" }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(Self::Pending),
            "Successful" => Some(Self::Successful),
            "Failed" => Some(Self::Failed),
            "Refunded" => Some(Self::Refunded),
            _ => None,
        }
    }
}

/// One row per order payment attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(order_id: Uuid, user_id: Uuid, method: PaymentMethod, status: PaymentStatus, amount: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(), order_id, user_id, method, status, amount,
            gateway_order_id: None, gateway_payment_id: None, created_at: now, updated_at: now,
        }
    }

    /// Money has actually been collected for this order.
    pub fn is_collected(&self) -> bool { self.status == PaymentStatus::Successful }

    pub fn set_status(&mut self, status: PaymentStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A referred user and whether their referrer has been rewarded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Referral {
    pub user_id: Uuid,
    pub referrer_id: Uuid,
    pub reward_claimed: bool,
}
