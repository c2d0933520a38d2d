use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use guardflow_api::{
    config::AppConfig,
    db,
    entities::{product, shopper, store},
    events::{self, EventSender},
    services::{AppServices, PaymentGateway, SimulatedPixGateway},
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

/// Test harness wrapping the full router over an in-memory SQLite
/// database. A single pooled connection keeps every statement on the
/// same in-memory instance.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// App with a gateway that never auto-approves, so transactions only
    /// change state when a test asks them to.
    pub async fn new() -> Self {
        Self::with_gateway(SimulatedPixGateway::new(30, 120, 0.0)).await
    }

    /// App with a specific simulated gateway, for tests that exercise
    /// the auto-approval window.
    pub async fn with_gateway(gateway: SimulatedPixGateway) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool)
            .await
            .expect("failed to bootstrap test schema");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway: Arc<dyn PaymentGateway> = Arc::new(gateway);
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            Arc::new(cfg.clone()),
            gateway,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = guardflow_api::app_router().with_state(state.clone());

        Self {
            router,
            state,
            _event_task: event_task,
        }
    }

    /// Send a request, optionally as a given shopper and with a JSON body.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        shopper: Option<Uuid>,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(shopper_id) = shopper {
            builder = builder.header("x-user-id", shopper_id.to_string());
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_shopper(&self) -> shopper::Model {
        let now = Utc::now();
        shopper::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(format!("shopper-{}@example.com", Uuid::new_v4().simple())),
            purchases_count: Set(0),
            total_spent: Set(Decimal::ZERO),
            loyalty_points: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed shopper")
    }

    pub async fn seed_store(&self) -> store::Model {
        let now = Utc::now();
        store::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Mercado Teste".to_string()),
            transactions_count: Set(0),
            total_revenue: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed store")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        self.seed_product_full(name, price, None, 70.0, false).await
    }

    pub async fn seed_product_full(
        &self,
        name: &str,
        price: Decimal,
        discount_price: Option<Decimal>,
        esg_score: f64,
        is_organic: bool,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            discount_price: Set(discount_price),
            esg_score: Set(esg_score),
            carbon_footprint_kg: Set(0.5),
            is_organic: Set(is_organic),
            is_local: Set(false),
            is_recyclable: Set(true),
            is_active: Set(true),
            is_available: Set(true),
            stock_quantity: Set(100),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product")
    }
}

/// Deserialize a response body into JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body is not valid json")
}
