//! Order engine
//!
//! [`OrderEngine`] wires the pricing resolver, stock ledger, coupon engine and
//! wallet engine over a set of [`Repositories`]. Checkout is split in two:
//! [`OrderEngine::assemble_order`] builds a priced draft without side effects,
//! then [`OrderEngine::confirm_order`] reserves stock, consumes the coupon,
//! takes payment and persists the order, compensating on failure.
//!
//! Item status changes go through [`OrderEngine::transition_item_status`] and
//! friends. The order is saved with an optimistic version check first, and
//! only the writer that wins the save performs stock, coupon and refund side
//! effects.

pub mod assembler;
pub mod coupon;
pub mod fulfillment;
pub mod payment;
pub mod pricing;
pub mod refund;
pub mod stock;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::publisher::EventPublisher;
use crate::store::Repositories;

pub use assembler::{AppliedCoupon, CheckoutRequest, CheckoutSource, OrderDraft};
pub use coupon::CouponEngine;
pub use payment::{sign_gateway_payment, verify_gateway_signature, PaymentOutcome};
pub use pricing::{effective_price, PricingResolver};
pub use refund::{compute_refund, refundable_balance, WalletEngine};
pub use stock::{ResolvedLine, StockLedger, StockRequest};

pub struct OrderEngine {
    repos: Repositories,
    config: EngineConfig,
    publisher: Arc<dyn EventPublisher>,
    pricing: PricingResolver,
    stock: StockLedger,
    coupons: CouponEngine,
    wallet: WalletEngine,
}

impl OrderEngine {
    pub fn new(repos: Repositories, config: EngineConfig, publisher: Arc<dyn EventPublisher>) -> Self {
        let pricing = PricingResolver::new(repos.catalog.clone());
        let stock = StockLedger::new(repos.catalog.clone(), publisher.clone());
        let coupons = CouponEngine::new(repos.coupons.clone(), publisher.clone());
        let wallet = WalletEngine::new(
            repos.wallets.clone(),
            repos.referrals.clone(),
            repos.orders.clone(),
            publisher.clone(),
            config.wallet_ceiling,
            config.referral_bonus,
        );
        Self { repos, config, publisher, pricing, stock, coupons, wallet }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn pricing(&self) -> &PricingResolver { &self.pricing }
    pub fn stock(&self) -> &StockLedger { &self.stock }
    pub fn coupons(&self) -> &CouponEngine { &self.coupons }
    pub fn wallet(&self) -> &WalletEngine { &self.wallet }
}
