//! Protocol services and background workers.

pub mod blueprint_engine;
pub mod checkin;
pub mod command;
pub mod connect;
pub mod dep_sync;
pub mod enroll;
pub mod push;
pub mod webhook;

use kv_store::KvStore;

use crate::error::Result;

/// Archive an event under its nanosecond timestamp, preserving insertion
/// order. Collisions are broken by appending a counter to the key.
pub(crate) async fn archive_event(
    kv: &KvStore,
    bucket: &str,
    nanos: i64,
    message: &[u8],
) -> Result<()> {
    let mut tx = kv.begin().await?;
    let mut key = nanos.to_string();
    let mut attempt = 0u32;
    while !tx.put_if_absent(bucket, key.as_bytes(), message).await? {
        attempt += 1;
        key = format!("{nanos}-{attempt}");
    }
    tx.commit().await?;
    Ok(())
}
