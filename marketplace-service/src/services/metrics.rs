use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static PURCHASE_TRANSACTIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PURCHASE_AMOUNT_MINOR_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    if METRICS_HANDLE.set(handle).is_err() {
        panic!("failed to set metrics handle: already initialized");
    }

    let registry = Registry::new();

    let transactions_counter = IntCounterVec::new(
        Opts::new(
            "purchase_transactions_total",
            "Recorded purchase outcomes by terminal status",
        ),
        &["status"],
    )
    .expect("Failed to create purchase_transactions_total metric");

    let amount_counter = IntCounterVec::new(
        Opts::new(
            "purchase_amount_minor_total",
            "Completed purchase volume by currency, in minor units",
        ),
        &["currency"],
    )
    .expect("Failed to create purchase_amount_minor_total metric");

    registry
        .register(Box::new(transactions_counter.clone()))
        .expect("Failed to register purchase_transactions_total");
    registry
        .register(Box::new(amount_counter.clone()))
        .expect("Failed to register purchase_amount_minor_total");

    PROMETHEUS_REGISTRY
        .set(registry)
        .expect("Failed to set prometheus registry");
    PURCHASE_TRANSACTIONS_TOTAL
        .set(transactions_counter)
        .expect("Failed to set purchase_transactions_total");
    PURCHASE_AMOUNT_MINOR_TOTAL
        .set(amount_counter)
        .expect("Failed to set purchase_amount_minor_total");
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        if let Ok(custom_metrics) = String::from_utf8(buffer) {
            output.push_str(&custom_metrics);
        }
    }

    output
}

/// Record a purchase outcome.
pub fn record_transaction(status: &str) {
    if let Some(counter) = PURCHASE_TRANSACTIONS_TOTAL.get() {
        counter.with_label_values(&[status]).inc();
    }
}

/// Record completed purchase volume.
pub fn record_amount(currency: &str, amount_minor: u64) {
    if let Some(counter) = PURCHASE_AMOUNT_MINOR_TOTAL.get() {
        counter.with_label_values(&[currency]).inc_by(amount_minor);
    }
}
