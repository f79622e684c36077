mod common;

use common::TestApp;
use marketplace_service::models::{Book, BookStatus, User, UserRole};
use mongodb::bson::doc;
use reqwest::Client;
use serde_json::json;

async fn fetch_book(app: &TestApp, book: &Book) -> Book {
    app.db
        .collection::<Book>("books")
        .find_one(doc! { "_id": book.id.to_string() }, None)
        .await
        .expect("Failed to query book")
        .expect("Book missing")
}

async fn fetch_user(app: &TestApp, user: &User) -> User {
    app.db
        .collection::<User>("users")
        .find_one(doc! { "_id": user.id.to_string() }, None)
        .await
        .expect("Failed to query user")
        .expect("User missing")
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn create_payment_intent_returns_client_secret() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let book = app.seed_book(seller.id, 9.99).await;

    app.mock_intent_created("pi_flow_1", 999).await;

    let response = client
        .post(&format!("{}/transactions/create-payment-intent", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "book_id": book.id }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);
    assert_eq!(body["payment_intent_id"], "pi_flow_1");
    assert_eq!(body["client_secret"], "pi_flow_1_secret");

    // No local record until the gateway reports an outcome
    let count = app
        .db
        .collection::<mongodb::bson::Document>("transactions")
        .count_documents(None, None)
        .await
        .expect("Failed to count transactions");
    assert_eq!(count, 0);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn requests_without_token_are_rejected() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let response = client
        .get(&format!("{}/transactions", app.address))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 401);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn confirm_payment_completes_purchase() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let book = app.seed_book(seller.id, 9.99).await;

    app.mock_intent_succeeded("pi_confirm_1", 999, &book, buyer.id)
        .await;

    let response = client
        .post(&format!("{}/transactions/confirm-payment", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "payment_intent_id": "pi_confirm_1" }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["amount"], 9.99);
    assert_eq!(body["data"]["payment_id"], "pi_confirm_1");

    let sold_book = fetch_book(&app, &book).await;
    assert_eq!(sold_book.status, BookStatus::Sold);

    let buyer_after = fetch_user(&app, &buyer).await;
    assert!(buyer_after.purchased_books.contains(&book.id));
    assert_eq!(buyer_after.transactions.len(), 1);

    let seller_after = fetch_user(&app, &seller).await;
    assert_eq!(seller_after.transactions.len(), 1);
    assert!(seller_after.purchased_books.is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn duplicate_confirmation_returns_conflict() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let book = app.seed_book(seller.id, 9.99).await;

    app.mock_intent_succeeded("pi_dup_1", 999, &book, buyer.id)
        .await;

    let first = client
        .post(&format!("{}/transactions/confirm-payment", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "payment_intent_id": "pi_dup_1" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(first.status(), 200);

    let second = client
        .post(&format!("{}/transactions/confirm-payment", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "payment_intent_id": "pi_dup_1" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(second.status(), 409);

    let buyer_after = fetch_user(&app, &buyer).await;
    assert_eq!(buyer_after.transactions.len(), 1);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn payment_failure_keeps_book_available() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let book = app.seed_book(seller.id, 19.99).await;

    app.mock_intent_with_status("pi_fail_1", 1999, &book, buyer.id, "requires_payment_method")
        .await;

    let response = client
        .post(&format!("{}/transactions/payment-failed", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({
            "payment_intent_id": "pi_fail_1",
            "error_message": "Your card was declined."
        }))
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(
        body["data"]["metadata"]["error_message"],
        "Your card was declined."
    );

    let book_after = fetch_book(&app, &book).await;
    assert_eq!(book_after.status, BookStatus::Available);

    let buyer_after = fetch_user(&app, &buyer).await;
    assert!(buyer_after.purchased_books.is_empty());

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn refund_is_admin_only_and_restores_book() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let admin = app.seed_user(UserRole::Admin).await;
    let book = app.seed_book(seller.id, 9.99).await;

    app.mock_intent_succeeded("pi_refund_1", 999, &book, buyer.id)
        .await;
    app.mock_refund("re_1").await;

    let confirm = client
        .post(&format!("{}/transactions/confirm-payment", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "payment_intent_id": "pi_refund_1" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(confirm.status(), 200);
    let body: serde_json::Value = confirm.json().await.expect("Failed to parse JSON");
    let transaction_id = body["data"]["id"].as_str().expect("missing id").to_string();

    // Buyer may not refund
    let forbidden = client
        .post(&format!(
            "{}/transactions/{}/refund",
            app.address, transaction_id
        ))
        .bearer_auth(app.token_for(buyer.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(forbidden.status(), 403);

    let refund = client
        .post(&format!(
            "{}/transactions/{}/refund",
            app.address, transaction_id
        ))
        .bearer_auth(app.token_for(admin.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(refund.status(), 200);
    let body: serde_json::Value = refund.json().await.expect("Failed to parse JSON");
    assert_eq!(body["data"]["status"], "refunded");
    assert_eq!(body["data"]["metadata"]["refund_id"], "re_1");

    let book_after = fetch_book(&app, &book).await;
    assert_eq!(book_after.status, BookStatus::Available);

    let buyer_after = fetch_user(&app, &buyer).await;
    assert!(buyer_after.purchased_books.is_empty());

    // A second refund of the same transaction is rejected
    let repeat = client
        .post(&format!(
            "{}/transactions/{}/refund",
            app.address, transaction_id
        ))
        .bearer_auth(app.token_for(admin.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(repeat.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
#[ignore = "requires MongoDB and Redis"]
async fn transaction_listing_is_scoped_to_caller() {
    let app = TestApp::spawn().await;
    let client = Client::new();

    let seller = app.seed_user(UserRole::User).await;
    let buyer = app.seed_user(UserRole::User).await;
    let stranger = app.seed_user(UserRole::User).await;
    let book = app.seed_book(seller.id, 9.99).await;

    app.mock_intent_succeeded("pi_list_1", 999, &book, buyer.id)
        .await;

    let confirm = client
        .post(&format!("{}/transactions/confirm-payment", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .json(&json!({ "payment_intent_id": "pi_list_1" }))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(confirm.status(), 200);
    let body: serde_json::Value = confirm.json().await.expect("Failed to parse JSON");
    let transaction_id = body["data"]["id"].as_str().expect("missing id").to_string();

    let buyer_list = client
        .get(&format!("{}/transactions?role=buyer", app.address))
        .bearer_auth(app.token_for(buyer.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(buyer_list.status(), 200);
    let body: serde_json::Value = buyer_list.json().await.expect("Failed to parse JSON");
    assert_eq!(body["count"], 1);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["payment_id"], "pi_list_1");

    let stranger_list = client
        .get(&format!("{}/transactions", app.address))
        .bearer_auth(app.token_for(stranger.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(stranger_list.status(), 200);
    let body: serde_json::Value = stranger_list.json().await.expect("Failed to parse JSON");
    assert_eq!(body["count"], 0);

    // Single-transaction lookup is limited to the parties
    let stranger_get = client
        .get(&format!("{}/transactions/{}", app.address, transaction_id))
        .bearer_auth(app.token_for(stranger.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(stranger_get.status(), 403);

    let seller_get = client
        .get(&format!("{}/transactions/{}", app.address, transaction_id))
        .bearer_auth(app.token_for(seller.id))
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(seller_get.status(), 200);

    app.cleanup().await;
}
