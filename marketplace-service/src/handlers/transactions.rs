//! Transaction endpoints: the purchase flow plus the caller's history.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{
        ApiResponse, ConfirmPaymentRequest, CreatePaymentIntentRequest,
        CreatePaymentIntentResponse, ListTransactionsQuery, Pagination, PaymentFailedRequest,
        TransactionListResponse, TransactionResponse,
    },
    middleware::AuthUser,
    services::{PurchaseError, TransactionRole},
    AppState,
};

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(err.to_string())),
            PurchaseError::InvalidState(_) | PurchaseError::SelfPurchase => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            PurchaseError::Unauthorized(_) => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            PurchaseError::AlreadyProcessed => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            PurchaseError::Gateway(msg) => AppError::BadGateway(msg),
            PurchaseError::OutcomeUnknown => AppError::ServiceUnavailable,
            PurchaseError::Store(e) => AppError::DatabaseError(e),
        }
    }
}

/// Open a payment intent for a book the caller wants to buy.
pub async fn create_payment_intent(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<Json<CreatePaymentIntentResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        book_id = %payload.book_id,
        buyer_id = %caller.id,
        "Initiating purchase"
    );

    let intent = state
        .coordinator
        .initiate_purchase(payload.book_id, caller.id)
        .await?;

    let client_secret = intent.client_secret.ok_or_else(|| {
        AppError::BadGateway("Payment gateway returned no client secret".to_string())
    })?;

    Ok(Json(CreatePaymentIntentResponse {
        success: true,
        client_secret,
        payment_intent_id: intent.id,
    }))
}

/// Confirm a payment the gateway reports as succeeded.
pub async fn confirm_payment(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<ApiResponse<TransactionResponse>>, AppError> {
    payload.validate()?;

    tracing::info!(
        payment_intent_id = %payload.payment_intent_id,
        caller_id = %caller.id,
        "Confirming payment"
    );

    let transaction = state
        .coordinator
        .confirm_purchase(&payload.payment_intent_id, caller.id)
        .await?;

    Ok(Json(ApiResponse::ok(TransactionResponse::from(transaction))))
}

/// Record a client-reported payment failure.
pub async fn payment_failed(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Json(payload): Json<PaymentFailedRequest>,
) -> Result<Json<ApiResponse<TransactionResponse>>, AppError> {
    payload.validate()?;

    tracing::info!(
        payment_intent_id = %payload.payment_intent_id,
        caller_id = %caller.id,
        "Recording payment failure"
    );

    let transaction = state
        .coordinator
        .report_failure(&payload.payment_intent_id, caller.id, payload.error_message)
        .await?;

    Ok(Json(ApiResponse::ok(TransactionResponse::from(transaction))))
}

/// Refund a completed transaction. Admin only.
pub async fn refund_transaction(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransactionResponse>>, AppError> {
    tracing::info!(
        transaction_id = %transaction_id,
        caller_id = %caller.id,
        "Refund requested"
    );

    let transaction = state
        .coordinator
        .refund_purchase(transaction_id, caller.id)
        .await?;

    Ok(Json(ApiResponse::ok(TransactionResponse::from(transaction))))
}

/// Get one transaction; visible to buyer, seller, or admin.
pub async fn get_transaction(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<ApiResponse<TransactionResponse>>, AppError> {
    let transaction = state
        .coordinator
        .get_transaction(transaction_id, caller.id)
        .await?;

    Ok(Json(ApiResponse::ok(TransactionResponse::from(transaction))))
}

/// List the caller's transactions, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<(StatusCode, Json<TransactionListResponse>), AppError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit as u64;

    let role = match query.role.as_deref() {
        Some("buyer") => Some(TransactionRole::Buyer),
        Some("seller") => Some(TransactionRole::Seller),
        _ => None,
    };

    let (transactions, total) = state
        .coordinator
        .list_transactions(caller.id, role, query.status, limit, offset)
        .await?;

    let data: Vec<TransactionResponse> =
        transactions.into_iter().map(TransactionResponse::from).collect();

    Ok((
        StatusCode::OK,
        Json(TransactionListResponse {
            success: true,
            count: data.len(),
            total,
            pagination: Pagination {
                page,
                limit,
                total_pages: (total + limit as u64 - 1) / limit as u64,
            },
            data,
        }),
    ))
}
