pub(crate) mod core;
pub mod db;
pub mod repositories;
pub mod resilience;
pub mod schemas;
pub mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::config::Settings;
use crate::core::state::AppState;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    core::telemetry::init(&settings);
    core::metrics::init(&settings)?;

    let pool = db::init_pool(&settings).await?;
    db::run_migrations(&pool).await?;
    tracing::info!("database ready");

    let state = AppState::new(settings, pool);
    tasks::scheduler::run(state).await
}
