//! Check-in service: validates, archives and publishes device check-ins.
//!
//! The archive write happens before publish so a crash can lose the event
//! fan-out but never the durable record.

use event_bus::PubSub;
use kv_store::KvStore;

use crate::error::{Result, ServiceError};
use crate::models::events::{encode_checkin_event, topics, CheckinEvent};
use mdm_protocol::CheckinMessage;

pub const CHECKIN_BUCKET: &str = "mdm.Checkin.ARCHIVE";

#[derive(Clone)]
pub struct CheckinService {
    kv: KvStore,
    bus: PubSub,
}

impl CheckinService {
    pub async fn new(kv: KvStore, bus: PubSub) -> Result<Self> {
        kv.create_bucket_if_not_exists(CHECKIN_BUCKET).await?;
        Ok(Self { kv, bus })
    }

    pub async fn authenticate(&self, message: &CheckinMessage, raw: &[u8]) -> Result<()> {
        self.expect("Authenticate", message)?;
        self.archive_and_publish(topics::AUTHENTICATE, raw).await
    }

    pub async fn token_update(&self, message: &CheckinMessage, raw: &[u8]) -> Result<()> {
        self.expect("TokenUpdate", message)?;
        self.archive_and_publish(topics::TOKEN_UPDATE, raw).await
    }

    pub async fn check_out(&self, message: &CheckinMessage, raw: &[u8]) -> Result<()> {
        self.expect("CheckOut", message)?;
        self.archive_and_publish(topics::CHECKOUT, raw).await
    }

    fn expect(&self, expected: &'static str, message: &CheckinMessage) -> Result<()> {
        if message.message_type() != expected {
            return Err(ServiceError::BadRequest(format!(
                "expected {expected}, got {} MessageType",
                message.message_type()
            )));
        }
        Ok(())
    }

    async fn archive_and_publish(&self, topic: &str, raw: &[u8]) -> Result<()> {
        let event = CheckinEvent::new(raw.to_vec());
        let message = encode_checkin_event(&event);
        let nanos = event.time.timestamp_nanos_opt().unwrap_or_default();
        super::archive_event(&self.kv, CHECKIN_BUCKET, nanos, &message).await?;
        self.bus.publish(topic, &message);
        Ok(())
    }
}
