use time::{OffsetDateTime, PrimitiveDateTime};

/// Current UTC wall clock as the naive type the schema stores.
pub fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}
