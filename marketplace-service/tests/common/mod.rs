#![allow(dead_code)]

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use marketplace_service::config::{
    AuthConfig, Config, DatabaseConfig, RedisConfig, ServerConfig, StripeConfig,
};
use marketplace_service::middleware::AccessTokenClaims;
use marketplace_service::models::{Book, BookStatus, User, UserRole};
use marketplace_service::Application;
use mongodb::bson::DateTime;
use secrecy::Secret;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_JWT_SECRET: &str = "test-jwt-secret";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db: mongodb::Database,
    pub db_name: String,
    pub stripe: MockServer,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let stripe = MockServer::start().await;
        let db_name = format!("marketplace_test_{}", Uuid::new_v4());

        let config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TEST_MONGODB_URI")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            redis: RedisConfig {
                url: Secret::new(
                    std::env::var("TEST_REDIS_URL")
                        .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
                ),
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(TEST_JWT_SECRET.to_string()),
            },
            stripe: StripeConfig {
                secret_key: Secret::new("sk_test_123".to_string()),
                api_base_url: stripe.uri(),
                currency: "usd".to_string(),
                timeout_seconds: 5,
            },
            service_name: "marketplace-service-test".to_string(),
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);
        let db = app.db().clone();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db,
            db_name,
            stripe,
        }
    }

    /// Mint a bearer token for `user_id`, signed with the test secret.
    pub fn token_for(&self, user_id: Uuid) -> String {
        let now = Utc::now().timestamp();
        let claims = AccessTokenClaims {
            sub: user_id.to_string(),
            exp: now + 3600,
            iat: now,
            jti: Uuid::new_v4().to_string(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("Failed to encode test token")
    }

    pub async fn seed_user(&self, role: UserRole) -> User {
        let now = DateTime::now();
        let user = User {
            id: Uuid::new_v4(),
            name: "Test User".to_string(),
            email: format!("{}@example.com", Uuid::new_v4()),
            role,
            purchased_books: vec![],
            transactions: vec![],
            created_at: now,
            updated_at: now,
        };
        self.db
            .collection::<User>("users")
            .insert_one(&user, None)
            .await
            .expect("Failed to seed user");
        user
    }

    pub async fn seed_book(&self, seller: Uuid, price: f64) -> Book {
        let now = DateTime::now();
        let book = Book {
            id: Uuid::new_v4(),
            title: "Test Book".to_string(),
            author: "Test Author".to_string(),
            price,
            seller,
            status: BookStatus::Available,
            created_at: now,
            updated_at: now,
        };
        self.db
            .collection::<Book>("books")
            .insert_one(&book, None)
            .await
            .expect("Failed to seed book");
        book
    }

    /// Mock a successful intent creation on the Stripe server.
    pub async fn mock_intent_created(&self, intent_id: &str, amount: u64) {
        Mock::given(method("POST"))
            .and(path("/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": intent_id,
                "client_secret": format!("{}_secret", intent_id),
                "status": "requires_payment_method",
                "amount": amount,
                "currency": "usd",
                "metadata": {}
            })))
            .mount(&self.stripe)
            .await;
    }

    /// Mock intent retrieval reporting `succeeded` with party metadata.
    pub async fn mock_intent_succeeded(
        &self,
        intent_id: &str,
        amount: u64,
        book: &Book,
        buyer_id: Uuid,
    ) {
        self.mock_intent_with_status(intent_id, amount, book, buyer_id, "succeeded")
            .await;
    }

    pub async fn mock_intent_with_status(
        &self,
        intent_id: &str,
        amount: u64,
        book: &Book,
        buyer_id: Uuid,
        status: &str,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/payment_intents/{}", intent_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": intent_id,
                "client_secret": null,
                "status": status,
                "amount": amount,
                "currency": "usd",
                "metadata": {
                    "book_id": book.id.to_string(),
                    "buyer_id": buyer_id.to_string(),
                    "seller_id": book.seller.to_string(),
                }
            })))
            .mount(&self.stripe)
            .await;
    }

    pub async fn mock_refund(&self, refund_id: &str) {
        Mock::given(method("POST"))
            .and(path("/refunds"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": refund_id,
                "status": "succeeded"
            })))
            .mount(&self.stripe)
            .await;
    }

    /// Cleanup test database after test completes.
    pub async fn cleanup(&self) {
        self.db
            .drop(None)
            .await
            .expect("Failed to drop test database");
    }
}
