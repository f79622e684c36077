use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A book listing. Only the fields the purchase flow reads are modelled;
/// catalog management lives in a separate service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Book {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub author: String,
    /// Listing price in major currency units (e.g. 9.99 USD).
    pub price: f64,
    pub seller: Uuid,
    pub status: BookStatus,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Available,
    Sold,
    Unavailable,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    /// Books this user has bought. Mutated only by a completed purchase,
    /// and by the refund of that same purchase.
    #[serde(default)]
    pub purchased_books: Vec<Uuid>,
    /// Every transaction this user took part in, as buyer or seller.
    #[serde(default)]
    pub transactions: Vec<Uuid>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

/// A durable record of one real-world payment attempt.
///
/// Created only once a gateway outcome is known: straight to `Completed`
/// on a confirmed payment, straight to `Failed` on a reported decline.
/// `Completed -> Refunded` is the only post-creation transition.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub book: Uuid,
    pub buyer: Uuid,
    pub seller: Uuid,
    /// Amount in major currency units, equal to the book price at
    /// intent-creation time.
    pub amount: f64,
    pub currency: String,
    pub status: TransactionStatus,
    /// Gateway payment-intent id; unique, doubles as the idempotency key.
    pub payment_id: String,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Declared for wire compatibility; the coordinator never produces it.
    Pending,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TransactionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<String>,
}

/// Convert a major-unit price to the smallest currency unit the gateway
/// charges in (cents for USD). Rounded to absorb float representation
/// error in stored prices.
pub fn price_to_minor_units(price: f64) -> u64 {
    (price * 100.0).round() as u64
}

/// Convert a gateway amount in minor units back to major units.
pub fn amount_from_minor_units(minor: u64) -> f64 {
    minor as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_unit_round_trip() {
        assert_eq!(price_to_minor_units(9.99), 999);
        assert_eq!(amount_from_minor_units(999), 9.99);
        assert_eq!(price_to_minor_units(0.0), 0);
        assert_eq!(price_to_minor_units(100.0), 10_000);
        // 19.99 is not exactly representable; rounding must still land on 1999
        assert_eq!(price_to_minor_units(19.99), 1999);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&BookStatus::Available).unwrap(),
            "\"available\""
        );
        assert_eq!(
            serde_json::to_string(&TransactionStatus::Refunded).unwrap(),
            "\"refunded\""
        );
        assert_eq!(serde_json::to_string(&UserRole::Admin).unwrap(), "\"admin\"");
    }
}
