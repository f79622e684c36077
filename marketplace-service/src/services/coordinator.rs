//! Transaction coordinator.
//!
//! Mediates the purchase of one book by one buyer through a two-phase
//! interaction with the payment gateway, and records a durable,
//! idempotent outcome:
//!
//! - `initiate_purchase` opens a gateway intent; nothing is written
//!   locally, so abandoned checkouts leave no state behind.
//! - `confirm_purchase` / `report_failure` create the transaction record
//!   directly in its terminal state, keyed by the gateway intent id.
//! - `refund_purchase` is the only post-creation transition
//!   (`completed -> refunded`).
//!
//! The store offers per-document atomicity only. Confirmation applies its
//! side effects in a fixed order (book compare-and-set, transaction
//! insert, user list updates) and compensates earlier steps when a later
//! one fails; anything the compensation itself fails to undo is logged
//! with enough context to reconcile by hand.

use crate::models::{
    amount_from_minor_units, price_to_minor_units, Book, BookStatus, Transaction,
    TransactionMetadata, TransactionStatus, UserRole,
};
use crate::services::metrics::{record_amount, record_transaction};
use crate::services::store::{MarketStore, StoreError, TransactionRole};
use crate::services::stripe::{
    GatewayError, IntentMetadata, PaymentGateway, PaymentIntent, INTENT_STATUS_SUCCEEDED,
};
use mongodb::bson::DateTime;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidState(String),

    #[error("You cannot purchase your own book")]
    SelfPurchase,

    #[error("{0}")]
    Unauthorized(String),

    #[error("This transaction has already been processed")]
    AlreadyProcessed,

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// The gateway call timed out; the payment outcome is unknown. No
    /// local record was touched, so retrying with the same intent id is
    /// safe.
    #[error("Payment outcome unknown, retry later")]
    OutcomeUnknown,

    #[error("Store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<StoreError> for PurchaseError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateKey => PurchaseError::AlreadyProcessed,
            StoreError::Other(e) => PurchaseError::Store(e),
        }
    }
}

impl From<GatewayError> for PurchaseError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Timeout => PurchaseError::OutcomeUnknown,
            GatewayError::Api(msg) => PurchaseError::Gateway(msg),
            GatewayError::Malformed(msg) => PurchaseError::Gateway(msg),
        }
    }
}

#[derive(Clone)]
pub struct TransactionCoordinator {
    store: Arc<dyn MarketStore>,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl TransactionCoordinator {
    pub fn new(store: Arc<dyn MarketStore>, gateway: Arc<dyn PaymentGateway>, currency: String) -> Self {
        Self {
            store,
            gateway,
            currency,
        }
    }

    /// Open a payment intent for a book.
    ///
    /// No transaction record is created and the book stays `available`;
    /// concurrent buyers may all hold open intents for the same book, and
    /// the first confirmation wins.
    pub async fn initiate_purchase(
        &self,
        book_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<PaymentIntent, PurchaseError> {
        let book = self
            .store
            .find_book(book_id)
            .await?
            .ok_or(PurchaseError::NotFound("Book"))?;

        if book.status != BookStatus::Available {
            return Err(PurchaseError::InvalidState(
                "Book is not available for purchase".to_string(),
            ));
        }

        if book.seller == buyer_id {
            return Err(PurchaseError::SelfPurchase);
        }

        let amount_minor = price_to_minor_units(book.price);
        let metadata = IntentMetadata {
            book_id: book.id,
            buyer_id,
            seller_id: book.seller,
        };

        let intent = self
            .gateway
            .create_intent(amount_minor, &self.currency, &metadata)
            .await?;

        tracing::info!(
            intent_id = %intent.id,
            book_id = %book_id,
            buyer_id = %buyer_id,
            amount_minor = amount_minor,
            "Payment intent opened"
        );

        Ok(intent)
    }

    /// Record a confirmed payment: create the completed transaction, mark
    /// the book sold, and update both parties.
    pub async fn confirm_purchase(
        &self,
        intent_id: &str,
        caller_id: Uuid,
    ) -> Result<Transaction, PurchaseError> {
        let intent = self.gateway.retrieve_intent(intent_id).await?;

        if intent.status != INTENT_STATUS_SUCCEEDED {
            return Err(PurchaseError::Gateway(format!(
                "Payment not successful. Status: {}",
                intent.status
            )));
        }

        let meta = IntentMetadata::from_map(&intent.metadata)?;

        if meta.buyer_id != caller_id {
            return Err(PurchaseError::Unauthorized(
                "You are not authorized to confirm this payment".to_string(),
            ));
        }

        if self
            .store
            .find_transaction_by_payment_id(&intent.id)
            .await?
            .is_some()
        {
            return Err(PurchaseError::AlreadyProcessed);
        }

        let book = self
            .store
            .find_book(meta.book_id)
            .await?
            .ok_or(PurchaseError::NotFound("Book"))?;

        // First contended step: whoever flips the book wins; a concurrent
        // confirmation for a different intent loses here, before any
        // record for it exists.
        if !self.store.mark_book_sold_if_available(book.id).await? {
            return Err(PurchaseError::InvalidState(
                "Book is no longer available for purchase".to_string(),
            ));
        }

        let transaction = self.new_transaction(&intent, &meta, TransactionStatus::Completed, None);

        if let Err(err) = self.store.insert_transaction(&transaction).await {
            self.rollback_book(book.id, &intent.id).await;
            return Err(err.into());
        }

        if let Err(err) = self.attach_purchase_to_parties(&transaction).await {
            // Money has moved; undo what we can and leave a trail for
            // reconciliation of the rest.
            tracing::error!(
                intent_id = %intent.id,
                book_id = %meta.book_id,
                buyer_id = %meta.buyer_id,
                error = %err,
                "Failed to update user records after successful payment; rolling back"
            );
            self.rollback_confirmation(&transaction).await;
            return Err(err.into());
        }

        record_transaction("completed");
        record_amount(&intent.currency, intent.amount);

        tracing::info!(
            transaction_id = %transaction.id,
            intent_id = %intent.id,
            book_id = %meta.book_id,
            buyer_id = %meta.buyer_id,
            amount = transaction.amount,
            "Purchase completed"
        );

        Ok(transaction)
    }

    /// Record a client-reported payment failure. The book is untouched
    /// and stays purchasable; a later retry uses a fresh intent. When the
    /// client gives no reason, the gateway's own `last_payment_error`
    /// message is used instead.
    pub async fn report_failure(
        &self,
        intent_id: &str,
        caller_id: Uuid,
        reason: Option<String>,
    ) -> Result<Transaction, PurchaseError> {
        let intent = self.gateway.retrieve_intent(intent_id).await?;
        let meta = IntentMetadata::from_map(&intent.metadata)?;

        let reason = reason.or_else(|| {
            intent
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone())
        });

        if meta.buyer_id != caller_id {
            return Err(PurchaseError::Unauthorized(
                "You are not authorized to report on this payment".to_string(),
            ));
        }

        if self
            .store
            .find_transaction_by_payment_id(&intent.id)
            .await?
            .is_some()
        {
            return Err(PurchaseError::AlreadyProcessed);
        }

        let transaction =
            self.new_transaction(&intent, &meta, TransactionStatus::Failed, reason.clone());

        self.store.insert_transaction(&transaction).await?;

        if let Err(err) = self.attach_to_parties(&transaction).await {
            self.store
                .delete_transaction(transaction.id)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!(
                        transaction_id = %transaction.id,
                        error = %e,
                        "Failed to roll back failure record"
                    );
                });
            return Err(err.into());
        }

        record_transaction("failed");

        tracing::info!(
            transaction_id = %transaction.id,
            intent_id = %intent.id,
            book_id = %meta.book_id,
            reason = ?reason,
            "Payment failure recorded"
        );

        Ok(transaction)
    }

    /// Refund a completed purchase. Privileged: the caller must be an
    /// admin. A gateway failure leaves the transaction `completed` and is
    /// surfaced to the caller unchanged. Once the refund is recorded, the
    /// book and buyer cleanup is best-effort: those writes cannot be
    /// rolled back against an issued refund, so failures are logged for
    /// reconciliation instead of failing the request.
    pub async fn refund_purchase(
        &self,
        transaction_id: Uuid,
        caller_id: Uuid,
    ) -> Result<Transaction, PurchaseError> {
        let caller = self
            .store
            .find_user(caller_id)
            .await?
            .ok_or_else(|| PurchaseError::Unauthorized("Unknown caller".to_string()))?;

        if caller.role != UserRole::Admin {
            return Err(PurchaseError::Unauthorized(
                "Admin privilege required to refund a transaction".to_string(),
            ));
        }

        let mut transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(PurchaseError::NotFound("Transaction"))?;

        if transaction.status != TransactionStatus::Completed {
            return Err(PurchaseError::InvalidState(
                "Transaction cannot be refunded".to_string(),
            ));
        }

        let refund = self.gateway.create_refund(&transaction.payment_id).await?;

        if let Err(err) = self
            .store
            .mark_transaction_refunded(transaction.id, &refund.id)
            .await
        {
            tracing::error!(
                transaction_id = %transaction.id,
                payment_id = %transaction.payment_id,
                refund_id = %refund.id,
                error = %err,
                "Refund issued at gateway but local record not updated"
            );
            return Err(err.into());
        }

        if let Err(err) = self.store.set_book_available(transaction.book).await {
            tracing::error!(
                transaction_id = %transaction.id,
                payment_id = %transaction.payment_id,
                book_id = %transaction.book,
                error = %err,
                "Refund recorded but book not returned to available"
            );
        }
        if let Err(err) = self
            .store
            .remove_purchased_book(transaction.buyer, transaction.book)
            .await
        {
            tracing::error!(
                transaction_id = %transaction.id,
                book_id = %transaction.book,
                buyer_id = %transaction.buyer,
                error = %err,
                "Refund recorded but book not removed from buyer's library"
            );
        }

        record_transaction("refunded");

        tracing::info!(
            transaction_id = %transaction.id,
            refund_id = %refund.id,
            book_id = %transaction.book,
            "Transaction refunded"
        );

        transaction.status = TransactionStatus::Refunded;
        transaction.metadata.refund_id = Some(refund.id);
        transaction.updated_at = DateTime::now();
        Ok(transaction)
    }

    /// Fetch a transaction, visible to its buyer, its seller, or an admin.
    pub async fn get_transaction(
        &self,
        transaction_id: Uuid,
        caller_id: Uuid,
    ) -> Result<Transaction, PurchaseError> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(PurchaseError::NotFound("Transaction"))?;

        if transaction.buyer != caller_id && transaction.seller != caller_id {
            let caller = self.store.find_user(caller_id).await?;
            let is_admin = caller.map(|u| u.role == UserRole::Admin).unwrap_or(false);
            if !is_admin {
                return Err(PurchaseError::Unauthorized(
                    "Not authorized to access this transaction".to_string(),
                ));
            }
        }

        Ok(transaction)
    }

    /// List the caller's transactions, newest first.
    pub async fn list_transactions(
        &self,
        caller_id: Uuid,
        role: Option<TransactionRole>,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), PurchaseError> {
        let result = self
            .store
            .list_transactions_for_user(caller_id, role, status, limit, offset)
            .await?;
        Ok(result)
    }

    fn new_transaction(
        &self,
        intent: &PaymentIntent,
        meta: &IntentMetadata,
        status: TransactionStatus,
        error_message: Option<String>,
    ) -> Transaction {
        let now = DateTime::now();
        Transaction {
            id: Uuid::new_v4(),
            book: meta.book_id,
            buyer: meta.buyer_id,
            seller: meta.seller_id,
            amount: amount_from_minor_units(intent.amount),
            currency: intent.currency.clone(),
            status,
            payment_id: intent.id.clone(),
            metadata: TransactionMetadata {
                error_message,
                refund_id: None,
            },
            created_at: now,
            updated_at: now,
        }
    }

    async fn attach_purchase_to_parties(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.store
            .record_purchase_for_buyer(tx.buyer, tx.book, tx.id)
            .await?;
        self.store
            .record_transaction_for_user(tx.seller, tx.id)
            .await?;
        Ok(())
    }

    async fn attach_to_parties(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.store.record_transaction_for_user(tx.buyer, tx.id).await?;
        self.store
            .record_transaction_for_user(tx.seller, tx.id)
            .await?;
        Ok(())
    }

    async fn rollback_book(&self, book_id: Uuid, intent_id: &str) {
        if let Err(e) = self.store.set_book_available(book_id).await {
            tracing::error!(
                book_id = %book_id,
                intent_id = %intent_id,
                error = %e,
                "Failed to roll back book status; needs reconciliation"
            );
        }
    }

    async fn rollback_confirmation(&self, tx: &Transaction) {
        if let Err(e) = self.store.remove_purchased_book(tx.buyer, tx.book).await {
            tracing::error!(buyer_id = %tx.buyer, error = %e, "Rollback: buyer record");
        }
        if let Err(e) = self.store.remove_transaction_from_user(tx.buyer, tx.id).await {
            tracing::error!(buyer_id = %tx.buyer, error = %e, "Rollback: buyer transactions");
        }
        if let Err(e) = self
            .store
            .remove_transaction_from_user(tx.seller, tx.id)
            .await
        {
            tracing::error!(seller_id = %tx.seller, error = %e, "Rollback: seller transactions");
        }
        if let Err(e) = self.store.delete_transaction(tx.id).await {
            tracing::error!(transaction_id = %tx.id, error = %e, "Rollback: transaction record");
        }
        self.rollback_book(tx.book, &tx.payment_id).await;
    }
}
