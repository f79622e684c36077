use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub stripe: StripeConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RedisConfig {
    pub url: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AuthConfig {
    /// HS256 signing secret shared with the token issuer.
    pub jwt_secret: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    /// Charge currency for all listings (prices are in its major units).
    pub currency: String,
    pub timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env::var("MARKETPLACE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("MARKETPLACE_PORT")
            .unwrap_or_else(|_| "3004".to_string())
            .parse()?;

        let db_url =
            env::var("MARKETPLACE_DATABASE_URL").expect("MARKETPLACE_DATABASE_URL must be set");
        let db_name =
            env::var("MARKETPLACE_DATABASE_NAME").unwrap_or_else(|_| "marketplace_db".to_string());

        let redis_url = env::var("MARKETPLACE_REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let jwt_secret =
            env::var("MARKETPLACE_JWT_SECRET").expect("MARKETPLACE_JWT_SECRET must be set");

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_api_base_url = env::var("STRIPE_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string());
        let stripe_currency = env::var("STRIPE_CURRENCY").unwrap_or_else(|_| "usd".to_string());
        let stripe_timeout_seconds = env::var("STRIPE_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            redis: RedisConfig {
                url: Secret::new(redis_url),
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(jwt_secret),
            },
            stripe: StripeConfig {
                secret_key: Secret::new(stripe_secret_key),
                api_base_url: stripe_api_base_url,
                currency: stripe_currency,
                timeout_seconds: stripe_timeout_seconds,
            },
            service_name: "marketplace-service".to_string(),
        })
    }
}
