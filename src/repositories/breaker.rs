use sqlx::PgPool;
use std::time::Duration;
use time::ext::NumericalDuration;

use crate::core::time::primitive_now_utc;
use crate::db::models::BreakerRecord;
use crate::resilience::BreakerSnapshot;

/// Persists breaker state so an open circuit survives a restart.
pub async fn upsert(
    pool: &PgPool,
    dependency: &str,
    snapshot: &BreakerSnapshot,
) -> anyhow::Result<()> {
    let open_until = snapshot
        .open_remaining
        .map(|d| primitive_now_utc() + (d.as_millis() as i64).milliseconds());

    sqlx::query(
        "INSERT INTO circuit_breakers (dependency, mode, consecutive_failures, open_until, updated_at) \
         VALUES ($1, $2, $3, $4, now()) \
         ON CONFLICT (dependency) DO UPDATE SET \
           mode = EXCLUDED.mode, \
           consecutive_failures = EXCLUDED.consecutive_failures, \
           open_until = EXCLUDED.open_until, \
           updated_at = now()",
    )
    .bind(dependency)
    .bind(snapshot.mode)
    .bind(snapshot.consecutive_failures as i32)
    .bind(open_until)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load(pool: &PgPool, dependency: &str) -> anyhow::Result<Option<BreakerSnapshot>> {
    let record = sqlx::query_as::<_, BreakerRecord>(
        "SELECT dependency, mode, consecutive_failures, open_until, updated_at \
         FROM circuit_breakers WHERE dependency = $1",
    )
    .bind(dependency)
    .fetch_optional(pool)
    .await?;

    let Some(record) = record else { return Ok(None) };
    let now = primitive_now_utc();
    let open_remaining = record
        .open_until
        .filter(|until| *until > now)
        .map(|until| {
            let remaining = until - now;
            Duration::from_millis(remaining.whole_milliseconds().max(0) as u64)
        });

    Ok(Some(BreakerSnapshot {
        mode: record.mode,
        consecutive_failures: record.consecutive_failures.max(0) as u32,
        open_remaining,
    }))
}
