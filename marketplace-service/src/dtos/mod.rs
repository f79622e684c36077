//! Request and response shapes for the transaction API.
//!
//! One canonical success envelope (`success` + payload) for every route;
//! clients never need shape-sniffing.

use crate::models::{Transaction, TransactionMetadata, TransactionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePaymentIntentRequest {
    pub book_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct CreatePaymentIntentResponse {
    pub success: bool,
    /// Handed to the browser checkout UI.
    pub client_secret: String,
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1))]
    pub payment_intent_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentFailedRequest {
    #[validate(length(min = 1))]
    pub payment_intent_id: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    pub page: Option<u64>,
    pub limit: Option<i64>,
    /// `buyer` or `seller`; anything else means both sides.
    pub role: Option<String>,
    pub status: Option<TransactionStatus>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub book: Uuid,
    pub buyer: Uuid,
    pub seller: Uuid,
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    pub payment_id: String,
    pub metadata: TransactionMetadata,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            book: t.book,
            buyer: t.buyer,
            seller: t.seller,
            amount: t.amount,
            currency: t.currency,
            status: t.status,
            payment_id: t.payment_id,
            metadata: t.metadata,
            created_at: t.created_at.to_string(),
            updated_at: t.updated_at.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: i64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize)]
pub struct TransactionListResponse {
    pub success: bool,
    pub count: usize,
    pub total: u64,
    pub pagination: Pagination,
    pub data: Vec<TransactionResponse>,
}
