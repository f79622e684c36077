//! Persistent store gateway.
//!
//! The store gives per-document atomicity only; there are no
//! cross-document transactions. The coordinator composes these
//! operations and compensates on partial failure.

use crate::models::{Book, Transaction, TransactionStatus, User};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Collection, Database, IndexModel};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique-index violation, in practice the `payment_id` index.
    #[error("duplicate key")]
    DuplicateKey,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        let duplicate = matches!(
            err.kind.as_ref(),
            ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
        );
        if duplicate {
            StoreError::DuplicateKey
        } else {
            StoreError::Other(anyhow::Error::new(err))
        }
    }
}

impl From<mongodb::bson::ser::Error> for StoreError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        StoreError::Other(anyhow::Error::new(err))
    }
}

/// Which side of a transaction a user was on, for list filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionRole {
    Buyer,
    Seller,
}

#[async_trait]
pub trait MarketStore: Send + Sync {
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>, StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    /// Idempotency lookup: at most one transaction exists per gateway
    /// payment-intent id.
    async fn find_transaction_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Insert a transaction. Fails with [`StoreError::DuplicateKey`] if a
    /// record with the same `payment_id` already exists.
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Compensation path only: remove a transaction created by a
    /// partially-applied confirmation.
    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError>;

    /// Compare-and-set `available -> sold`. Returns false when the book
    /// was not available, which rejects the second winner of a
    /// concurrent-confirmation race deterministically.
    async fn mark_book_sold_if_available(&self, book_id: Uuid) -> Result<bool, StoreError>;

    async fn set_book_available(&self, book_id: Uuid) -> Result<(), StoreError>;

    /// Add the book and the transaction to the buyer's record.
    async fn record_purchase_for_buyer(
        &self,
        buyer_id: Uuid,
        book_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError>;

    /// Append a transaction id to a user's transaction list.
    async fn record_transaction_for_user(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn remove_purchased_book(&self, buyer_id: Uuid, book_id: Uuid)
        -> Result<(), StoreError>;

    /// Compensation path only: undo a `record_*` append.
    async fn remove_transaction_from_user(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn mark_transaction_refunded(
        &self,
        transaction_id: Uuid,
        refund_id: &str,
    ) -> Result<(), StoreError>;

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
        role: Option<TransactionRole>,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError>;
}

#[derive(Clone)]
pub struct MongoStore {
    books: Collection<Book>,
    users: Collection<User>,
    transactions: Collection<Transaction>,
}

impl MongoStore {
    pub fn new(db: &Database) -> Self {
        Self {
            books: db.collection("books"),
            users: db.collection("users"),
            transactions: db.collection("transactions"),
        }
    }

    /// Initialize database indexes.
    ///
    /// The unique index on `payment_id` is load-bearing: it backstops the
    /// idempotency check when two confirmations for the same intent race
    /// past the `find_one`.
    pub async fn init_indexes(&self) -> Result<(), StoreError> {
        let payment_id_index = IndexModel::builder()
            .keys(doc! { "payment_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_id_unique_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        let buyer_index = IndexModel::builder()
            .keys(doc! { "buyer": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("buyer_created_idx".to_string())
                    .build(),
            )
            .build();

        let seller_index = IndexModel::builder()
            .keys(doc! { "seller": 1, "created_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("seller_created_idx".to_string())
                    .build(),
            )
            .build();

        self.transactions
            .create_indexes([payment_id_index, buyer_index, seller_index], None)
            .await?;

        tracing::info!("Marketplace indexes initialized");
        Ok(())
    }
}

#[async_trait]
impl MarketStore for MongoStore {
    async fn find_book(&self, id: Uuid) -> Result<Option<Book>, StoreError> {
        let book = self
            .books
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(book)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = self
            .users
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(user)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let transaction = self
            .transactions
            .find_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(transaction)
    }

    async fn find_transaction_by_payment_id(
        &self,
        payment_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let transaction = self
            .transactions
            .find_one(doc! { "payment_id": payment_id }, None)
            .await?;
        Ok(transaction)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.transactions.insert_one(transaction, None).await?;
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<(), StoreError> {
        self.transactions
            .delete_one(doc! { "_id": id.to_string() }, None)
            .await?;
        Ok(())
    }

    async fn mark_book_sold_if_available(&self, book_id: Uuid) -> Result<bool, StoreError> {
        let result = self
            .books
            .update_one(
                doc! { "_id": book_id.to_string(), "status": "available" },
                doc! { "$set": { "status": "sold", "updated_at": DateTime::now() } },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    async fn set_book_available(&self, book_id: Uuid) -> Result<(), StoreError> {
        self.books
            .update_one(
                doc! { "_id": book_id.to_string() },
                doc! { "$set": { "status": "available", "updated_at": DateTime::now() } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn record_purchase_for_buyer(
        &self,
        buyer_id: Uuid,
        book_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError> {
        self.users
            .update_one(
                doc! { "_id": buyer_id.to_string() },
                doc! {
                    "$addToSet": {
                        "purchased_books": book_id.to_string(),
                        "transactions": transaction_id.to_string(),
                    },
                    "$set": { "updated_at": DateTime::now() }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn record_transaction_for_user(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError> {
        self.users
            .update_one(
                doc! { "_id": user_id.to_string() },
                doc! {
                    "$addToSet": { "transactions": transaction_id.to_string() },
                    "$set": { "updated_at": DateTime::now() }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn remove_purchased_book(
        &self,
        buyer_id: Uuid,
        book_id: Uuid,
    ) -> Result<(), StoreError> {
        self.users
            .update_one(
                doc! { "_id": buyer_id.to_string() },
                doc! {
                    "$pull": { "purchased_books": book_id.to_string() },
                    "$set": { "updated_at": DateTime::now() }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn remove_transaction_from_user(
        &self,
        user_id: Uuid,
        transaction_id: Uuid,
    ) -> Result<(), StoreError> {
        self.users
            .update_one(
                doc! { "_id": user_id.to_string() },
                doc! {
                    "$pull": { "transactions": transaction_id.to_string() },
                    "$set": { "updated_at": DateTime::now() }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn mark_transaction_refunded(
        &self,
        transaction_id: Uuid,
        refund_id: &str,
    ) -> Result<(), StoreError> {
        self.transactions
            .update_one(
                doc! { "_id": transaction_id.to_string() },
                doc! {
                    "$set": {
                        "status": "refunded",
                        "metadata.refund_id": refund_id,
                        "updated_at": DateTime::now(),
                    }
                },
                None,
            )
            .await?;
        Ok(())
    }

    async fn list_transactions_for_user(
        &self,
        user_id: Uuid,
        role: Option<TransactionRole>,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: u64,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let uid = user_id.to_string();
        let mut filter = match role {
            Some(TransactionRole::Buyer) => doc! { "buyer": &uid },
            Some(TransactionRole::Seller) => doc! { "seller": &uid },
            None => doc! { "$or": [ { "buyer": &uid }, { "seller": &uid } ] },
        };

        if let Some(status) = status {
            filter.insert("status", mongodb::bson::to_bson(&status)?);
        }

        let total = self
            .transactions
            .count_documents(filter.clone(), None)
            .await?;

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .skip(offset)
            .limit(limit)
            .build();

        let cursor = self.transactions.find(filter, Some(options)).await?;
        let transactions: Vec<Transaction> = cursor.try_collect().await?;

        Ok((transactions, total))
    }
}
