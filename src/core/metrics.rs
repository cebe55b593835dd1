use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;

use crate::core::config::Settings;

static INSTALLED: OnceLock<()> = OnceLock::new();

/// Installs the Prometheus recorder when enabled. Safe to call more than
/// once; only the first call installs.
pub fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry.metrics_enabled {
        return Ok(());
    }
    if INSTALLED.set(()).is_err() {
        return Ok(());
    }
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.telemetry.metrics_port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

pub fn claim_created() {
    metrics::counter!("claimflow_claims_created_total").increment(1);
}

pub fn claim_submitted() {
    metrics::counter!("claimflow_claims_submitted_total").increment(1);
}

pub fn claim_failed(kind: &'static str) {
    metrics::counter!("claimflow_claims_failed_total", "kind" => kind).increment(1);
}

pub fn poll_cycle_completed(polled: u64) {
    metrics::counter!("claimflow_poll_cycles_total").increment(1);
    metrics::counter!("claimflow_claims_polled_total").increment(polled);
}

pub fn submission_duration_seconds(seconds: f64) {
    metrics::histogram!("claimflow_submission_duration_seconds").record(seconds);
}
