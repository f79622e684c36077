pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use service_core::middleware::{metrics::metrics_middleware, tracing::request_id_middleware};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use config::Config;
use middleware::{auth_middleware, JwtVerifier, RedisBlacklist, TokenBlacklist};
use services::{MongoStore, StripeClient, TransactionCoordinator};

#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub coordinator: TransactionCoordinator,
    pub jwt: JwtVerifier,
    pub blacklist: Arc<dyn TokenBlacklist>,
}

pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    db: mongodb::Database,
}

impl Application {
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret()).await?;
        client_options.app_name = Some("marketplace-service".to_string());

        let client = Client::with_options(client_options)?;
        let db = client.database(&config.database.db_name);

        let store = MongoStore::new(&db);
        store.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            anyhow::anyhow!("index initialization failed: {}", e)
        })?;

        let stripe = StripeClient::new(config.stripe.clone());
        if stripe.is_configured() {
            tracing::info!("Stripe client initialized");
        } else {
            tracing::warn!("Stripe credentials not configured - purchases will fail");
        }

        let blacklist: Arc<dyn TokenBlacklist> =
            Arc::new(RedisBlacklist::connect(&config.redis.url).await?);

        let coordinator = TransactionCoordinator::new(
            Arc::new(store),
            Arc::new(stripe),
            config.stripe.currency.clone(),
        );

        let state = AppState {
            db: db.clone(),
            config: config.clone(),
            coordinator,
            jwt: JwtVerifier::new(&config.auth.jwt_secret),
            blacklist,
        };

        let protected = Router::new()
            .route(
                "/transactions",
                get(handlers::transactions::list_transactions),
            )
            .route(
                "/transactions/create-payment-intent",
                post(handlers::transactions::create_payment_intent),
            )
            .route(
                "/transactions/confirm-payment",
                post(handlers::transactions::confirm_payment),
            )
            .route(
                "/transactions/payment-failed",
                post(handlers::transactions::payment_failed),
            )
            .route(
                "/transactions/:id",
                get(handlers::transactions::get_transaction),
            )
            .route(
                "/transactions/:id/refund",
                post(handlers::transactions::refund_transaction),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware));

        let router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics))
            .merge(protected)
            .layer(from_fn(metrics_middleware))
            .layer(from_fn(request_id_middleware))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }),
            )
            .with_state(state);

        // Port 0 binds a random free port, which the test harness relies on.
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            db,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.db
    }

    pub async fn run_until_stopped(self) -> anyhow::Result<()> {
        tracing::info!("Listening on port {}", self.port);
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}
