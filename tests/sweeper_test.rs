mod common;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use common::{body_json, TestApp};
use guardflow_api::entities::{
    cart, cart::CartStatus, transaction, transaction::TransactionStatus, Cart, Shopper,
    Transaction,
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

async fn seed_cart_with_item(app: &TestApp, shopper_id: Uuid) -> Uuid {
    let store = app.seed_store().await;
    let product = app.seed_product("Produto Sweep", dec!(10.00)).await;
    let uri = format!(
        "/api/v1/cart/add?product_id={}&quantity=1&store_id={}",
        product.id, store.id
    );
    let response = app.request(Method::POST, &uri, Some(shopper_id), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    body["data"]["id"].as_str().unwrap().parse().unwrap()
}

async fn backdate_cart_expiry(app: &TestApp, cart_id: Uuid) {
    cart::ActiveModel {
        id: Set(cart_id),
        expires_at: Set(Some(Utc::now() - Duration::hours(1))),
        ..Default::default()
    }
    .update(&*app.state.db)
    .await
    .expect("failed to backdate cart expiry");
}

async fn backdate_pix_expiration(app: &TestApp, transaction_id: Uuid) {
    transaction::ActiveModel {
        id: Set(transaction_id),
        pix_expiration: Set(Utc::now() - Duration::minutes(5)),
        ..Default::default()
    }
    .update(&*app.state.db)
    .await
    .expect("failed to backdate pix expiration");
}

#[tokio::test]
async fn sweep_abandons_expired_carts() {
    let app = TestApp::new().await;
    let shopper = app.seed_shopper().await;
    let cart_id = seed_cart_with_item(&app, shopper.id).await;
    backdate_cart_expiry(&app, cart_id).await;

    let report = app
        .state
        .services
        .sweeper
        .sweep_once(Utc::now())
        .await
        .expect("sweep failed");
    assert_eq!(report.carts_abandoned, 1);

    let cart = Cart::find_by_id(cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Abandoned);

    // Nothing left to sweep on the second pass
    let report = app
        .state
        .services
        .sweeper
        .sweep_once(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.carts_abandoned, 0);
}

#[tokio::test]
async fn sweep_leaves_fresh_and_completed_carts_alone() {
    let app = TestApp::new().await;
    let shopper = app.seed_shopper().await;
    let cart_id = seed_cart_with_item(&app, shopper.id).await;

    // Fresh cart survives a sweep
    let report = app
        .state
        .services
        .sweeper
        .sweep_once(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.carts_abandoned, 0);

    // Complete the purchase
    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/create-pix",
            Some(shopper.id),
            None,
        )
        .await;
    let body = body_json(response).await;
    let transaction_id = body["data"]["id"].as_str().unwrap().to_string();
    let uri = format!("/api/v1/payment/confirm/{}", transaction_id);
    let response = app.request(Method::POST, &uri, Some(shopper.id), None).await;
    assert_eq!(response.status(), StatusCode::OK);

    // Even with a stale deadline the completed cart must stay completed
    backdate_cart_expiry(&app, cart_id).await;
    let report = app
        .state
        .services
        .sweeper
        .sweep_once(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.carts_abandoned, 0);

    let cart = Cart::find_by_id(cart_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cart.status, CartStatus::Completed);
}

#[tokio::test]
async fn sweep_rejects_stale_pending_transactions() {
    let app = TestApp::new().await;
    let shopper = app.seed_shopper().await;
    seed_cart_with_item(&app, shopper.id).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/create-pix",
            Some(shopper.id),
            None,
        )
        .await;
    let body = body_json(response).await;
    let transaction_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();
    backdate_pix_expiration(&app, transaction_id).await;

    let report = app
        .state
        .services
        .sweeper
        .sweep_once(Utc::now())
        .await
        .unwrap();
    assert_eq!(report.transactions_expired, 1);

    let transaction = Transaction::find_by_id(transaction_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Rejected);
    assert_eq!(
        transaction.failure_reason.as_deref(),
        Some("PIX charge expired")
    );

    // No rewards were credited for the expired charge
    let shopper_row = Shopper::find_by_id(shopper.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(shopper_row.purchases_count, 0);
}

#[tokio::test]
async fn confirming_expired_charge_fails_it() {
    let app = TestApp::new().await;
    let shopper = app.seed_shopper().await;
    seed_cart_with_item(&app, shopper.id).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/payment/create-pix",
            Some(shopper.id),
            None,
        )
        .await;
    let body = body_json(response).await;
    let transaction_id: Uuid = body["data"]["id"].as_str().unwrap().parse().unwrap();
    backdate_pix_expiration(&app, transaction_id).await;

    let uri = format!("/api/v1/payment/confirm/{}", transaction_id);
    let response = app.request(Method::POST, &uri, Some(shopper.id), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let transaction = Transaction::find_by_id(transaction_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Rejected);
}
