//! Checkout, fulfillment and reversal flows against the in-memory store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use storefront_orders::config::EngineConfig;
use storefront_orders::domain::aggregates::{
    Cart, CartLine, Category, Coupon, ItemStatus, PaymentStatus, Product, ProductStatus, ProductVariant, Referral, RefundState,
    ShippingAddress, TransactionMethod, Wallet,
};
use storefront_orders::domain::events::DomainEvent;
use storefront_orders::domain::value_objects::{VariantKey, VariantSelection};
use storefront_orders::engine::{sign_gateway_payment, CheckoutRequest, CheckoutSource, PaymentOutcome, StockRequest};
use storefront_orders::publisher::EventPublisher;
use storefront_orders::store::{MemoryStore, PaymentStore, Repositories};
use storefront_orders::{EcommerceError, OrderEngine};

const SECRET: &str = "gateway-test-secret";

#[derive(Default)]
struct RecordingPublisher { kinds: Mutex<Vec<&'static str>> }

impl RecordingPublisher {
    fn count(&self, kind: &str) -> usize { self.kinds.lock().unwrap().iter().filter(|k| **k == kind).count() }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) { self.kinds.lock().unwrap().push(event.kind()); }
}

struct Shop {
    store: Arc<MemoryStore>,
    events: Arc<RecordingPublisher>,
    engine: OrderEngine,
}

fn shop() -> Shop {
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(RecordingPublisher::default());
    let engine = OrderEngine::new(Repositories::from_backend(store.clone()), EngineConfig::new(SECRET), events.clone());
    Shop { store, events, engine }
}

async fn stocked(shop: &Shop, name: &str, price: i64, stock: u32) -> Uuid {
    let mut p = Product::new(name, Decimal::new(price, 0));
    p.total_stock = stock;
    let id = p.id;
    shop.store.put_product(p).await;
    id
}

fn coupon(code: &str, pct: i64, max: i64) -> Coupon {
    Coupon::new(code, Decimal::new(pct, 0), Decimal::new(max, 0), Utc::now() + Duration::days(7))
}

fn buy(user_id: Uuid, product_id: Uuid, quantity: u32, coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        source: CheckoutSource::Product { product_id, quantity, selection: VariantSelection::default() },
        coupon_code: coupon_code.map(str::to_string),
        shipping_address: ShippingAddress::default(),
    }
}

fn from_cart(user_id: Uuid, coupon_code: Option<&str>) -> CheckoutRequest {
    CheckoutRequest {
        user_id,
        source: CheckoutSource::Cart { product_ids: vec![] },
        coupon_code: coupon_code.map(str::to_string),
        shipping_address: ShippingAddress::default(),
    }
}

async fn deliver(shop: &Shop, order_id: Uuid, item_id: Uuid) {
    for next in [ItemStatus::Processing, ItemStatus::Shipped, ItemStatus::OutForDelivery, ItemStatus::Delivered] {
        shop.engine.transition_item_status(order_id, item_id, next).await.unwrap();
    }
}

#[tokio::test]
async fn category_offer_beats_product_offer() {
    let shop = shop();
    let mut category = Category::new("Jackets");
    category.category_offer = Some(Decimal::new(20, 0));
    category.is_offer_active = true;
    let mut product = Product::new("Jacket", Decimal::new(1000, 0));
    product.base_offer_price = Decimal::new(900, 0);
    product.category_id = Some(category.id);
    product.total_stock = 2;
    let id = product.id;
    shop.store.put_category(category).await;
    shop.store.put_product(product).await;

    let draft = shop.engine.assemble_order(buy(Uuid::new_v4(), id, 1, None)).await.unwrap();
    assert_eq!(draft.items[0].price, Decimal::new(800, 0));
    assert_eq!(draft.total_amount, Decimal::new(800, 0));
}

#[tokio::test]
async fn oversized_reservation_leaves_stock_alone() {
    let shop = shop();
    let product = Product::new("Boot", Decimal::new(400, 0));
    let variant = ProductVariant::new(product.id, VariantKey::new("black", "42", None), 3);
    let (pid, vid) = (product.id, variant.id);
    shop.store.put_product(product).await;
    shop.store.put_variants(vec![variant]).await;

    let selection = VariantSelection::new(Some("Black"), Some("42"), None);
    let err = shop.engine.stock().reserve(&[StockRequest::new(pid, 5, selection.clone())]).await.unwrap_err();
    assert!(matches!(err, EcommerceError::InsufficientStock { requested: 5, available: 3, .. }));
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 3);

    shop.engine.stock().reserve(&[StockRequest::new(pid, 2, selection.clone())]).await.unwrap();
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 1);
    shop.engine.stock().release(&[StockRequest::new(pid, 2, selection)]).await;
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 3);
    assert_eq!(shop.store.product(pid).await.unwrap().total_stock, 3);
}

#[tokio::test]
async fn restricted_coupon_discounts_only_eligible_lines() {
    let shop = shop();
    let user = Uuid::new_v4();
    let eligible = stocked(&shop, "Eligible", 300, 5).await;
    let other = stocked(&shop, "Other", 100, 5).await;
    let mut c = coupon("PICK10", 10, 50);
    c.applicable_products = vec![eligible];
    shop.store.put_coupon(c).await;
    let mut cart = Cart::new(user);
    cart.add_line(CartLine::new(eligible, 1));
    cart.add_line(CartLine::new(other, 1));
    shop.store.put_cart(cart).await;

    let draft = shop.engine.assemble_order(from_cart(user, Some("PICK10"))).await.unwrap();
    assert_eq!(draft.subtotal, Decimal::new(400, 0));
    assert_eq!(draft.coupon.as_ref().unwrap().discount, Decimal::new(30, 0));

    let mut cart = Cart::new(user);
    cart.add_line(CartLine::new(eligible, 2));
    cart.add_line(CartLine::new(other, 1));
    shop.store.put_cart(cart).await;
    let draft = shop.engine.assemble_order(from_cart(user, Some("PICK10"))).await.unwrap();
    assert_eq!(draft.coupon.as_ref().unwrap().discount, Decimal::new(50, 0));
}

#[tokio::test]
async fn unpaid_order_still_counts_against_per_user_limit() {
    let shop = shop();
    let user = Uuid::new_v4();
    let product = stocked(&shop, "Mug", 300, 10).await;
    shop.store.put_coupon(coupon("ONCE", 10, 50)).await;

    let draft = shop.engine.assemble_order(buy(user, product, 1, Some("ONCE"))).await.unwrap();
    let pending = PaymentOutcome::GatewayPending { gateway_order_id: "gw_unpaid".into() };
    shop.engine.confirm_order(draft, pending).await.unwrap();

    let err = shop.engine.assemble_order(buy(user, product, 1, Some("ONCE"))).await.unwrap_err();
    assert!(matches!(err, EcommerceError::PerUserLimitReached));
}

#[tokio::test]
async fn cart_checkout_consumes_stock_coupon_and_cart_lines() {
    let shop = shop();
    let user = Uuid::new_v4();
    let a = stocked(&shop, "A", 300, 5).await;
    let b = stocked(&shop, "B", 200, 5).await;
    let c = coupon("SAVE10", 10, 1000);
    let coupon_id = c.id;
    shop.store.put_coupon(c).await;
    let mut cart = Cart::new(user);
    cart.add_line(CartLine::new(a, 1));
    cart.add_line(CartLine::new(b, 2));
    shop.store.put_cart(cart).await;

    let draft = shop.engine.assemble_order(from_cart(user, Some("SAVE10"))).await.unwrap();
    let order = shop.engine.confirm_order(draft, PaymentOutcome::CashOnDelivery).await.unwrap();

    assert_eq!(order.subtotal, Decimal::new(700, 0));
    assert_eq!(order.total_amount, Decimal::new(630, 0));
    assert!(order.items.iter().all(|i| i.status == ItemStatus::OrderPlaced));
    assert_eq!(shop.store.product(a).await.unwrap().total_stock, 4);
    assert_eq!(shop.store.product(b).await.unwrap().total_stock, 3);
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 1);
    assert!(shop.store.cart(user).await.unwrap().is_empty());
    assert_eq!(shop.events.count("order.placed"), 1);
    assert_eq!(shop.events.count("inventory.reserved"), 2);
}

#[tokio::test]
async fn failed_wallet_payment_rolls_back_reservation_and_coupon() {
    let shop = shop();
    let user = Uuid::new_v4();
    let product = stocked(&shop, "Desk", 500, 2).await;
    let c = coupon("DESK", 10, 100);
    let coupon_id = c.id;
    shop.store.put_coupon(c).await;
    let mut wallet = Wallet::open(user);
    wallet.balance = Decimal::new(100, 0);
    shop.store.put_wallet(wallet).await;

    let draft = shop.engine.assemble_order(buy(user, product, 1, Some("DESK"))).await.unwrap();
    let err = shop.engine.confirm_order(draft, PaymentOutcome::Wallet).await.unwrap_err();
    assert!(matches!(err, EcommerceError::InsufficientBalance));
    assert_eq!(shop.store.product(product).await.unwrap().total_stock, 2);
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 0);
}

#[tokio::test]
async fn cancelled_items_refund_their_share_of_the_discount() {
    let shop = shop();
    let user = Uuid::new_v4();
    let a = stocked(&shop, "A", 300, 5).await;
    let b = stocked(&shop, "B", 200, 5).await;
    let c = coupon("TEN", 10, 1000);
    let coupon_id = c.id;
    shop.store.put_coupon(c).await;
    let mut wallet = Wallet::open(user);
    wallet.balance = Decimal::new(1000, 0);
    shop.store.put_wallet(wallet).await;
    let mut cart = Cart::new(user);
    cart.add_line(CartLine::new(a, 1));
    cart.add_line(CartLine::new(b, 1));
    shop.store.put_cart(cart).await;

    let draft = shop.engine.assemble_order(from_cart(user, Some("TEN"))).await.unwrap();
    let order = shop.engine.confirm_order(draft, PaymentOutcome::Wallet).await.unwrap();
    assert_eq!(order.total_amount, Decimal::new(450, 0));
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(550, 0));

    let first = order.items.iter().find(|i| i.product_id == a).unwrap().id;
    let second = order.items.iter().find(|i| i.product_id == b).unwrap().id;

    let order = shop.engine.cancel_item(order.id, first, None).await.unwrap();
    let refund = order.item(first).unwrap().refund.clone().unwrap();
    assert_eq!(refund.amount, Decimal::new(270, 0));
    assert_eq!(refund.state, RefundState::Credited);
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(820, 0));
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 0);

    shop.engine.cancel_item(order.id, second, None).await.unwrap();
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(1000, 0));
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 0);
    assert_eq!(shop.events.count("coupon.released"), 1);
    let payment = shop.store.find_by_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(shop.store.product(a).await.unwrap().total_stock, 5);
}

#[tokio::test]
async fn returned_item_restocks_variant_and_gives_back_coupon_use() {
    let shop = shop();
    let user = Uuid::new_v4();
    let product = Product::new("Sneaker", Decimal::new(800, 0));
    let variant = ProductVariant::new(product.id, VariantKey::new("white", "9", Some("men")), 4);
    let (pid, vid) = (product.id, variant.id);
    shop.store.put_product(product).await;
    shop.store.put_variants(vec![variant]).await;
    let c = coupon("KICKS", 10, 50);
    let coupon_id = c.id;
    shop.store.put_coupon(c).await;
    shop.store.put_wallet(Wallet::open(user)).await;

    let request = CheckoutRequest {
        user_id: user,
        source: CheckoutSource::Product {
            product_id: pid,
            quantity: 2,
            selection: VariantSelection::new(Some("WHITE"), Some("9"), None),
        },
        coupon_code: Some("KICKS".into()),
        shipping_address: ShippingAddress::default(),
    };
    let draft = shop.engine.assemble_order(request).await.unwrap();
    let order = shop.engine.confirm_order(draft, PaymentOutcome::CashOnDelivery).await.unwrap();
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 2);
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 1);

    let item = order.items[0].id;
    assert_eq!(order.items[0].gender.as_deref(), Some("Men"));
    deliver(&shop, order.id, item).await;
    let order = shop.engine.return_item(order.id, item, Some("too small".into())).await.unwrap();

    assert_eq!(order.items[0].status, ItemStatus::Returned);
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 4);
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 0);
    // 1600 less the 50 discount
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(1550, 0));
}

#[tokio::test]
async fn wallet_ceiling_is_enforced() {
    let shop = shop();
    let user = Uuid::new_v4();
    let mut wallet = Wallet::open(user);
    wallet.balance = Decimal::new(99_990, 0);
    shop.store.put_wallet(wallet).await;

    let err = shop.engine.wallet()
        .credit_wallet(user, Decimal::new(20, 0), "Refund", None, TransactionMethod::Refund)
        .await
        .unwrap_err();
    assert!(matches!(err, EcommerceError::WalletLimitExceeded { .. }));
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(99_990, 0));
}

#[tokio::test]
async fn gateway_payment_confirmation_requires_valid_signature() {
    let shop = shop();
    let user = Uuid::new_v4();
    let product = stocked(&shop, "Chair", 150, 3).await;
    let draft = shop.engine.assemble_order(buy(user, product, 1, None)).await.unwrap();
    let outcome = PaymentOutcome::GatewayPending { gateway_order_id: "gw_42".into() };
    let order = shop.engine.confirm_order(draft, outcome).await.unwrap();
    assert_eq!(order.items[0].status, ItemStatus::Pending);

    let forged = sign_gateway_payment("wrong-secret", "gw_42", "pay_1");
    let err = shop.engine.confirm_gateway_payment(order.id, "pay_1", &forged).await.unwrap_err();
    assert!(matches!(err, EcommerceError::SignatureMismatch));

    let signature = sign_gateway_payment(SECRET, "gw_42", "pay_1");
    let order = shop.engine.confirm_gateway_payment(order.id, "pay_1", &signature).await.unwrap();
    assert_eq!(order.items[0].status, ItemStatus::OrderPlaced);
    let payment = shop.store.find_by_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Successful);
    assert_eq!(payment.gateway_payment_id.as_deref(), Some("pay_1"));

    let again = shop.engine.confirm_gateway_payment(order.id, "pay_1", &signature).await.unwrap();
    assert_eq!(again.items[0].status, ItemStatus::OrderPlaced);
}

#[tokio::test]
async fn failed_gateway_payment_can_be_retried() {
    let shop = shop();
    let user = Uuid::new_v4();
    let product = stocked(&shop, "Shelf", 90, 3).await;
    let draft = shop.engine.assemble_order(buy(user, product, 1, None)).await.unwrap();
    let order = shop.engine
        .confirm_order(draft, PaymentOutcome::GatewayPending { gateway_order_id: "gw_1".into() })
        .await
        .unwrap();

    let order = shop.engine.fail_payment(order.id).await.unwrap();
    assert_eq!(order.items[0].status, ItemStatus::PaymentFailed);
    assert_eq!(shop.store.find_by_order(order.id).await.unwrap().unwrap().status, PaymentStatus::Failed);

    let order = shop.engine.retry_payment(order.id, "gw_2").await.unwrap();
    assert_eq!(order.items[0].status, ItemStatus::Pending);
    assert!(matches!(
        shop.engine.retry_payment(order.id, "gw_3").await,
        Err(EcommerceError::InvalidTransition { .. })
    ));

    let signature = sign_gateway_payment(SECRET, "gw_2", "pay_9");
    let order = shop.engine.confirm_gateway_payment(order.id, "pay_9", &signature).await.unwrap();
    assert_eq!(order.items[0].status, ItemStatus::OrderPlaced);
}

#[tokio::test]
async fn first_delivery_rewards_the_referrer_once() {
    let shop = shop();
    let (user, referrer) = (Uuid::new_v4(), Uuid::new_v4());
    shop.store.put_wallet(Wallet::open(referrer)).await;
    shop.store.put_referral(Referral { user_id: user, referrer_id: referrer, reward_claimed: false }).await;
    let product = stocked(&shop, "Pen", 10, 10).await;

    for _ in 0..2 {
        let draft = shop.engine.assemble_order(buy(user, product, 1, None)).await.unwrap();
        let order = shop.engine.confirm_order(draft, PaymentOutcome::CashOnDelivery).await.unwrap();
        deliver(&shop, order.id, order.items[0].id).await;
    }

    assert_eq!(shop.store.wallet(referrer).await.unwrap().balance, Decimal::new(100, 0));
    assert!(shop.store.referral(user).await.unwrap().reward_claimed);
    assert_eq!(shop.events.count("wallet.referral_rewarded"), 1);
}

#[tokio::test]
async fn cancelling_a_pending_gateway_item_refunds_after_late_capture() {
    let shop = shop();
    let user = Uuid::new_v4();
    shop.store.put_wallet(Wallet::open(user)).await;
    let product = stocked(&shop, "Rug", 120, 2).await;
    let draft = shop.engine.assemble_order(buy(user, product, 1, None)).await.unwrap();
    let order = shop.engine
        .confirm_order(draft, PaymentOutcome::GatewayPending { gateway_order_id: "gw_late".into() })
        .await
        .unwrap();

    let order = shop.engine.cancel_item(order.id, order.items[0].id, None).await.unwrap();
    assert_eq!(order.items[0].refund.as_ref().unwrap().state, RefundState::NotApplicable);

    let signature = sign_gateway_payment(SECRET, "gw_late", "pay_late");
    let order = shop.engine.confirm_gateway_payment(order.id, "pay_late", &signature).await.unwrap();
    assert_eq!(order.items[0].refund.as_ref().unwrap().state, RefundState::Credited);
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(120, 0));
    assert_eq!(shop.store.find_by_order(order.id).await.unwrap().unwrap().status, PaymentStatus::Refunded);
}

#[tokio::test]
async fn refunds_of_a_fully_cancelled_order_add_up_to_what_was_paid() {
    let shop = shop();
    let user = Uuid::new_v4();
    let mut wallet = Wallet::open(user);
    wallet.balance = Decimal::new(1000, 0);
    shop.store.put_wallet(wallet).await;
    shop.store.put_coupon(coupon("TEN", 10, 10)).await;
    let mut cart = Cart::new(user);
    for name in ["Fork", "Knife", "Spoon"] {
        cart.add_line(CartLine::new(stocked(&shop, name, 100, 5).await, 1));
    }
    shop.store.put_cart(cart).await;

    let draft = shop.engine.assemble_order(from_cart(user, Some("TEN"))).await.unwrap();
    let order = shop.engine.confirm_order(draft, PaymentOutcome::Wallet).await.unwrap();
    assert_eq!(order.total_amount, Decimal::new(290, 0));
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(710, 0));

    let order = shop.engine.cancel_entire_order(order.id, None).await.unwrap();
    let refunded: Decimal = order.items.iter().filter_map(|i| i.refund.as_ref()).map(|r| r.amount).sum();
    assert_eq!(refunded, Decimal::new(290, 0));
    assert_eq!(shop.store.wallet(user).await.unwrap().balance, Decimal::new(1000, 0));
}

#[tokio::test]
async fn color_without_size_is_not_bought_at_product_level() {
    let shop = shop();
    let product = Product::new("Tee", Decimal::new(200, 0));
    let variant = ProductVariant::new(product.id, VariantKey::new("red", "m", None), 2);
    let (pid, vid) = (product.id, variant.id);
    shop.store.put_product(product).await;
    shop.store.put_variants(vec![variant]).await;

    let request = CheckoutRequest {
        user_id: Uuid::new_v4(),
        source: CheckoutSource::Product {
            product_id: pid,
            quantity: 2,
            selection: VariantSelection::new(Some("blue"), None, None),
        },
        coupon_code: None,
        shipping_address: ShippingAddress::default(),
    };
    let err = shop.engine.assemble_order(request).await.unwrap_err();
    assert!(matches!(err, EcommerceError::VariantNotFound { .. }));
    assert_eq!(shop.store.product(pid).await.unwrap().total_stock, 2);
    assert_eq!(shop.store.variant(vid).await.unwrap().stock_quantity, 2);
}

#[tokio::test]
async fn unavailable_cart_product_blocks_the_whole_checkout() {
    let shop = shop();
    let user = Uuid::new_v4();
    let available = stocked(&shop, "Lamp", 300, 4).await;
    let mut blocked = Product::new("Shade", Decimal::new(80, 0));
    blocked.total_stock = 4;
    blocked.status = ProductStatus::Blocked;
    let blocked_id = blocked.id;
    shop.store.put_product(blocked).await;
    let c = coupon("LIGHT", 10, 100);
    let coupon_id = c.id;
    shop.store.put_coupon(c).await;
    let mut cart = Cart::new(user);
    cart.add_line(CartLine::new(available, 1));
    cart.add_line(CartLine::new(blocked_id, 1));
    shop.store.put_cart(cart).await;

    let err = shop.engine.assemble_order(from_cart(user, Some("LIGHT"))).await.unwrap_err();
    assert!(matches!(err, EcommerceError::ProductUnavailable(_)));
    assert_eq!(shop.store.product(available).await.unwrap().total_stock, 4);
    assert_eq!(shop.store.product(blocked_id).await.unwrap().total_stock, 4);
    assert_eq!(shop.store.coupon(coupon_id).await.unwrap().usage_count(), 0);
    assert_eq!(shop.store.cart(user).await.unwrap().lines.len(), 2);
    assert_eq!(shop.events.count("inventory.reserved"), 0);
}
