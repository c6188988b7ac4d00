//! Command service: turns admin requests into queued MDM payloads.

use event_bus::PubSub;
use kv_store::KvStore;

use crate::error::{Result, ServiceError};
use crate::models::events::{encode_command_event, topics, CommandEvent};
use mdm_protocol::{Command, CommandPayload};

pub const COMMAND_BUCKET: &str = "mdm.Command.ARCHIVE";

#[derive(Clone)]
pub struct CommandService {
    kv: KvStore,
    bus: PubSub,
}

impl CommandService {
    pub async fn new(kv: KvStore, bus: PubSub) -> Result<Self> {
        kv.create_bucket_if_not_exists(COMMAND_BUCKET).await?;
        Ok(Self { kv, bus })
    }

    /// Build the payload, archive the command event, then publish it for the
    /// queue. The archived payload bytes are exactly what the device will
    /// receive.
    pub async fn new_command(&self, udid: &str, command: Command) -> Result<CommandPayload> {
        if udid.is_empty() {
            return Err(ServiceError::BadRequest("empty CommandRequest".to_string()));
        }
        let payload = CommandPayload::new(command);
        let xml = payload.to_xml()?;

        let event = CommandEvent::new(udid.to_string(), payload.command_uuid.clone(), xml);
        let message = encode_command_event(&event);
        let nanos = event.time.timestamp_nanos_opt().unwrap_or_default();
        super::archive_event(&self.kv, COMMAND_BUCKET, nanos, &message).await?;
        self.bus.publish(topics::COMMAND, &message);
        Ok(payload)
    }
}
