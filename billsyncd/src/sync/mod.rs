pub mod backoff;
pub mod engine;
pub mod queue;
pub mod store;

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
