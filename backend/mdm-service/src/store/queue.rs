//! Per-device command queue.
//!
//! Each device owns four ordered partitions: pending commands, NotNow
//! deferrals, completed and failed. A command UUID lives in exactly one
//! partition. Delivery rotates the pending head to the tail, so a command
//! stays queued until the device acknowledges or fails it (at-least-once).

use chrono::Utc;
use event_bus::PubSub;
use kv_store::KvStore;
use mdm_protocol::ConnectResponse;
use tracing::{error, info};

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_device_command, encode_device_command};
use crate::models::events::{self, topics, CommandQueued};
use crate::models::{DeviceCommand, QueuedCommand};

pub const DEVICE_COMMAND_BUCKET: &str = "mdm.DeviceCommands";

#[derive(Clone)]
pub struct CommandQueue {
    kv: KvStore,
    bus: PubSub,
}

impl CommandQueue {
    pub async fn new(kv: KvStore, bus: PubSub) -> Result<Self> {
        kv.create_bucket_if_not_exists(DEVICE_COMMAND_BUCKET).await?;
        Ok(Self { kv, bus })
    }

    pub async fn device_command(&self, udid: &str) -> Result<Option<DeviceCommand>> {
        let Some(raw) = self.kv.get(DEVICE_COMMAND_BUCKET, udid.as_bytes()).await? else {
            return Ok(None);
        };
        Ok(Some(decode_device_command(&raw)?))
    }

    pub async fn save(&self, dc: &DeviceCommand) -> Result<()> {
        let mut tx = self.kv.begin().await?;
        tx.put(
            DEVICE_COMMAND_BUCKET,
            dc.device_udid.as_bytes(),
            &encode_device_command(dc),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Apply a device response to the queue and hand back the next command
    /// to send, if any. One serializable transaction covers the read, the
    /// partition move and the rotation.
    pub async fn next(&self, response: &ConnectResponse) -> Result<Option<QueuedCommand>> {
        // user-level commands key off the user GUID instead of the UDID
        let key = response.queue_key();

        let mut tx = self.kv.begin().await?;
        let Some(raw) = tx.get(DEVICE_COMMAND_BUCKET, key.as_bytes()).await? else {
            return Ok(None);
        };
        let mut dc = decode_device_command(&raw)?;

        match response.status.as_str() {
            "NotNow" => {
                // try again once the device stops answering NotNow
                if let Some(mut cmd) = cut(&mut dc.commands, &response.command_uuid) {
                    cmd.last_status = response.status.clone();
                    dc.not_now.push(cmd);
                }
            }
            "Acknowledged" => {
                if let Some(mut cmd) = cut(&mut dc.commands, &response.command_uuid) {
                    cmd.last_status = response.status.clone();
                    cmd.acknowledged = Some(Utc::now());
                    dc.completed.push(cmd);
                }
            }
            "Error" | "CommandFormatError" => {
                if let Some(mut cmd) = cut(&mut dc.commands, &response.command_uuid) {
                    cmd.last_status = response.status.clone();
                    if let Ok(chain) = serde_json::to_vec(&response.error_chain) {
                        if !response.error_chain.is_empty() {
                            cmd.failure_message = chain;
                        }
                    }
                    dc.failed.push(cmd);
                }
            }
            "Idle" => {}
            other => {
                return Err(ServiceError::BadRequest(format!(
                    "unknown response status: {other}"
                )))
            }
        }

        // Pop the pending head and re-append it, so the device keeps seeing
        // it until a terminal status arrives. When the pending partition is
        // drained, promote a NotNow deferral -- but not while the device is
        // still answering NotNow.
        let mut next = pop_first(&mut dc.commands);
        if let Some(ref cmd) = next {
            dc.commands.push(cmd.clone());
        } else if response.status != "NotNow" {
            next = pop_first(&mut dc.not_now);
            if let Some(ref cmd) = next {
                dc.commands.push(cmd.clone());
            }
        }

        if let Some(ref mut cmd) = next {
            cmd.last_sent_at = Some(Utc::now());
            cmd.times_sent += 1;
            if let Some(queued) = dc.commands.last_mut() {
                queued.last_sent_at = cmd.last_sent_at;
                queued.times_sent = cmd.times_sent;
            }
        }

        tx.put(
            DEVICE_COMMAND_BUCKET,
            key.as_bytes(),
            &encode_device_command(&dc),
        )
        .await?;
        tx.commit().await?;

        Ok(next)
    }

    /// Append a command to a device's pending partition and announce it.
    async fn enqueue(&self, device_udid: &str, command_uuid: &str, payload: Vec<u8>) -> Result<()> {
        let mut tx = self.kv.begin().await?;
        let mut dc = match tx.get(DEVICE_COMMAND_BUCKET, device_udid.as_bytes()).await? {
            Some(raw) => decode_device_command(&raw)?,
            None => DeviceCommand {
                device_udid: device_udid.to_string(),
                ..Default::default()
            },
        };
        dc.commands.push(QueuedCommand {
            uuid: command_uuid.to_string(),
            payload,
            created_at: Some(Utc::now()),
            ..Default::default()
        });
        tx.put(
            DEVICE_COMMAND_BUCKET,
            device_udid.as_bytes(),
            &encode_device_command(&dc),
        )
        .await?;
        tx.commit().await?;

        info!(udid = %device_udid, command_uuid, "queued command for device");
        self.bus.publish(
            topics::COMMAND_QUEUED,
            &events::encode_command_queued(&CommandQueued {
                device_udid: device_udid.to_string(),
                command_uuid: command_uuid.to_string(),
            }),
        );
        Ok(())
    }
}

/// Subscribe the queue to newly created commands.
pub fn start_listener(queue: CommandQueue, bus: PubSub) {
    let mut commands = bus.subscribe("command-queue", topics::COMMAND);
    tokio::spawn(async move {
        while let Some(event) = commands.recv().await {
            let command_event = match events::decode_command_event(&event.message) {
                Ok(ev) => ev,
                Err(e) => {
                    error!(error = %e, "decode command event");
                    continue;
                }
            };
            if let Err(e) = queue
                .enqueue(
                    &command_event.device_udid,
                    &command_event.command_uuid,
                    command_event.payload,
                )
                .await
            {
                error!(error = %e, "enqueue command");
            }
        }
    });
}

fn pop_first(all: &mut Vec<QueuedCommand>) -> Option<QueuedCommand> {
    if all.is_empty() {
        return None;
    }
    Some(all.remove(0))
}

fn cut(all: &mut Vec<QueuedCommand>, uuid: &str) -> Option<QueuedCommand> {
    let index = all.iter().position(|cmd| cmd.uuid == uuid)?;
    Some(all.remove(index))
}
