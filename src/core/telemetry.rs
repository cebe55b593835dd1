use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

/// Installs the tracing subscriber. `RUST_LOG` overrides the default
/// filter; production emits JSON lines.
pub fn init(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    if settings.runtime.is_production() {
        fmt().with_env_filter(filter).json().with_current_span(false).init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}
