//! HTTP API
//!
//! Thin axum adapter over [`OrderEngine`]. Request bodies are checked with
//! `validator` before they reach the engine; engine errors map onto status
//! codes in [`AppError`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{ItemStatus, Order, OrderStatus, ShippingAddress};
use crate::domain::value_objects::VariantSelection;
use crate::engine::{CheckoutRequest, CheckoutSource, OrderDraft, OrderEngine, PaymentOutcome};
use crate::EcommerceError;

#[derive(Clone)]
pub struct AppState { pub engine: Arc<OrderEngine> }

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EcommerceError),

    #[error("Invalid request: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

pub fn status_for(err: &EcommerceError) -> StatusCode {
    use EcommerceError::*;
    match err {
        ProductNotFound(_) | VariantNotFound { .. } | OrderNotFound(_) | OrderItemNotFound(_) | PaymentNotFound(_)
        | WalletNotFound => StatusCode::NOT_FOUND,
        InsufficientStock { .. } | ProductUnavailable(_) | UsageLimitReached | PerUserLimitReached
        | WalletInactive | WalletLimitExceeded { .. } | InsufficientBalance | InvalidTransition { .. }
        | NothingToCancel | ConcurrentModification => StatusCode::CONFLICT,
        InvalidCoupon(_) | CouponExpired | UserNotEligible | MinimumAmountNotMet { .. } | NoEligibleItems
        | EmptyCart | InvalidQuantity | UnknownStatus(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SignatureMismatch => StatusCode::UNAUTHORIZED,
        StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, self.to_string()),
            Self::Engine(e @ EcommerceError::StorageError(_)) => {
                tracing::error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            Self::Engine(e) => (status_for(e), e.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

// =============================================================================
// Requests & responses
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ShippingAddressBody {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 7, max = 20))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub street1: String,
    pub street2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    pub state: Option<String>,
    #[validate(length(min = 3, max = 12))]
    pub zip: String,
    #[validate(length(min = 2))]
    pub country: String,
}

impl From<ShippingAddressBody> for ShippingAddress {
    fn from(b: ShippingAddressBody) -> Self {
        Self {
            name: b.name, phone: b.phone, street1: b.street1, street2: b.street2, city: b.city,
            state: b.state, zip: b.zip, country: b.country,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentChoice {
    CashOnDelivery,
    Wallet,
    Online {
        gateway_order_id: String,
        #[serde(default)]
        failed: bool,
    },
}

impl From<PaymentChoice> for PaymentOutcome {
    fn from(c: PaymentChoice) -> Self {
        match c {
            PaymentChoice::CashOnDelivery => Self::CashOnDelivery,
            PaymentChoice::Wallet => Self::Wallet,
            PaymentChoice::Online { gateway_order_id, failed: false } => Self::GatewayPending { gateway_order_id },
            PaymentChoice::Online { gateway_order_id, failed: true } => Self::GatewayFailed { gateway_order_id },
        }
    }
}

/// Checkout of a single product when `product_id` is set, otherwise of the cart.
#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    pub user_id: Uuid,
    pub product_id: Option<Uuid>,
    #[validate(range(min = 1, max = 100))]
    pub quantity: Option<u32>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub gender: Option<String>,
    #[serde(default)]
    pub cart_product_ids: Vec<Uuid>,
    #[validate(length(min = 1, max = 32))]
    pub coupon_code: Option<String>,
    pub payment: Option<PaymentChoice>,
    #[validate]
    pub shipping_address: ShippingAddressBody,
}

impl CheckoutBody {
    fn into_parts(self) -> (CheckoutRequest, Option<PaymentChoice>) {
        let source = match self.product_id {
            Some(product_id) => CheckoutSource::Product {
                product_id,
                quantity: self.quantity.unwrap_or(1),
                selection: VariantSelection::new(self.color.as_deref(), self.size.as_deref(), self.gender.as_deref()),
            },
            None => CheckoutSource::Cart { product_ids: self.cart_product_ids },
        };
        let request = CheckoutRequest {
            user_id: self.user_id,
            source,
            coupon_code: self.coupon_code,
            shipping_address: self.shipping_address.into(),
        };
        (request, self.payment)
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentBody {
    pub order_id: Uuid,
    #[validate(length(min = 1))]
    pub payment_id: String,
    #[validate(length(equal = 64))]
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentFailedBody { pub order_id: Uuid }

#[derive(Debug, Deserialize, Validate)]
pub struct RetryPaymentBody {
    #[validate(length(min = 1))]
    pub gateway_order_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusBody {
    #[validate(length(min = 1))]
    pub status: String,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ReasonBody {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub status: OrderStatus,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        let status = order.status();
        Self { order, status }
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront-orders"})) }))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/checkout/preview", post(preview_checkout))
        .route("/api/v1/payments/verify", post(verify_payment))
        .route("/api/v1/payments/failed", post(payment_failed))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/retry-payment", post(retry_payment))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/items/:item_id/status", put(update_item_status))
        .route("/api/v1/orders/:id/items/:item_id/cancel", post(cancel_item))
        .route("/api/v1/orders/:id/items/:item_id/return", post(return_item))
        .route("/api/v1/admin/reconcile", post(reconcile))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn preview_checkout(State(s): State<AppState>, Json(body): Json<CheckoutBody>) -> ApiResult<Json<OrderDraft>> {
    body.validate()?;
    let (request, _) = body.into_parts();
    Ok(Json(s.engine.assemble_order(request).await?))
}

async fn checkout(State(s): State<AppState>, Json(body): Json<CheckoutBody>) -> ApiResult<(StatusCode, Json<OrderResponse>)> {
    body.validate()?;
    let (request, payment) = body.into_parts();
    let outcome = payment.map(PaymentOutcome::from).unwrap_or(PaymentOutcome::CashOnDelivery);
    let draft = s.engine.assemble_order(request).await?;
    let order = s.engine.confirm_order(draft, outcome).await?;
    Ok((StatusCode::CREATED, Json(order.into())))
}

async fn verify_payment(State(s): State<AppState>, Json(body): Json<VerifyPaymentBody>) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    let order = s.engine.confirm_gateway_payment(body.order_id, &body.payment_id, &body.signature).await?;
    Ok(Json(order.into()))
}

async fn payment_failed(State(s): State<AppState>, Json(body): Json<PaymentFailedBody>) -> ApiResult<Json<OrderResponse>> {
    Ok(Json(s.engine.fail_payment(body.order_id).await?.into()))
}

async fn retry_payment(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RetryPaymentBody>,
) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    Ok(Json(s.engine.retry_payment(id, &body.gateway_order_id).await?.into()))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<OrderResponse>> {
    Ok(Json(s.engine.get_order(id).await?.into()))
}

async fn update_item_status(
    State(s): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    let next: ItemStatus = body.status.parse()?;
    Ok(Json(s.engine.transition_item_status(id, item_id, next).await?.into()))
}

async fn cancel_item(
    State(s): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    Ok(Json(s.engine.cancel_item(id, item_id, body.reason).await?.into()))
}

async fn return_item(
    State(s): State<AppState>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    Ok(Json(s.engine.return_item(id, item_id, body.reason).await?.into()))
}

async fn cancel_order(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReasonBody>,
) -> ApiResult<Json<OrderResponse>> {
    body.validate()?;
    Ok(Json(s.engine.cancel_entire_order(id, body.reason).await?.into()))
}

async fn reconcile(State(s): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let released = s.engine.reconcile_unpaid(Utc::now()).await?;
    Ok(Json(serde_json::json!({ "released": released })))
}
