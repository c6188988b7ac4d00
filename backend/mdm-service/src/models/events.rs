//! Event envelopes published on the bus.
//!
//! Envelopes carry metadata as tagged fields and the device-facing payload as
//! the canonical plist bytes, so the archive and every subscriber see exactly
//! the bytes that cross the wire.

use chrono::{DateTime, Utc};
use prost::Message;
use uuid::Uuid;

use super::codec::{from_nanos, nanos, DecodeError};

/// Stable pub/sub topic names.
pub mod topics {
    pub const AUTHENTICATE: &str = "mdm.Authenticate";
    pub const TOKEN_UPDATE: &str = "mdm.TokenUpdate";
    pub const CHECKOUT: &str = "mdm.CheckOut";
    pub const CONNECT: &str = "mdm.Connect";
    pub const COMMAND: &str = "mdm.Command";
    pub const COMMAND_QUEUED: &str = "mdm.CommandQueued";
    pub const DEVICE_ENROLLED: &str = "mdm.DeviceEnrolled";
    pub const DEP_SYNC: &str = "mdm.DepSync";
    pub const TOKEN_ADDED: &str = "mdm.TokenAdded";
    pub const CONFIG_UPDATED: &str = "mdm.ServerConfigUpdated";
}

/// An archived check-in message (Authenticate, TokenUpdate or CheckOut).
#[derive(Debug, Clone, PartialEq)]
pub struct CheckinEvent {
    pub id: String,
    pub time: DateTime<Utc>,
    /// The check-in plist exactly as the device sent it.
    pub raw: Vec<u8>,
}

impl CheckinEvent {
    pub fn new(raw: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            raw,
        }
    }

    pub fn message(&self) -> Result<mdm_protocol::CheckinMessage, mdm_protocol::ProtocolError> {
        mdm_protocol::CheckinMessage::parse(&self.raw)
    }
}

#[derive(Clone, PartialEq, Message)]
struct CheckinEventProto {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    time: i64,
    #[prost(bytes = "vec", tag = "3")]
    raw: Vec<u8>,
}

pub fn encode_checkin_event(event: &CheckinEvent) -> Vec<u8> {
    CheckinEventProto {
        id: event.id.clone(),
        time: nanos(&Some(event.time)),
        raw: event.raw.clone(),
    }
    .encode_to_vec()
}

pub fn decode_checkin_event(data: &[u8]) -> Result<CheckinEvent, DecodeError> {
    let pb = CheckinEventProto::decode(data)?;
    Ok(CheckinEvent {
        id: pb.id,
        time: from_nanos(pb.time).unwrap_or_default(),
        raw: pb.raw,
    })
}

/// A device response observed on the Connect endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectEvent {
    pub id: String,
    pub time: DateTime<Utc>,
    pub udid: String,
    pub user_id: Option<String>,
    pub status: String,
    pub command_uuid: String,
    pub request_type: String,
    /// The response plist exactly as the device sent it.
    pub raw: Vec<u8>,
}

impl ConnectEvent {
    pub fn new(response: &mdm_protocol::ConnectResponse, raw: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            udid: response.udid.clone(),
            user_id: response.user_id.clone(),
            status: response.status.clone(),
            command_uuid: response.command_uuid.clone(),
            request_type: response.request_type.clone(),
            raw,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct ConnectEventProto {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    time: i64,
    #[prost(string, tag = "3")]
    udid: String,
    #[prost(string, tag = "4")]
    user_id: String,
    #[prost(string, tag = "5")]
    status: String,
    #[prost(string, tag = "6")]
    command_uuid: String,
    #[prost(string, tag = "7")]
    request_type: String,
    #[prost(bytes = "vec", tag = "8")]
    raw: Vec<u8>,
}

pub fn encode_connect_event(event: &ConnectEvent) -> Vec<u8> {
    ConnectEventProto {
        id: event.id.clone(),
        time: nanos(&Some(event.time)),
        udid: event.udid.clone(),
        user_id: event.user_id.clone().unwrap_or_default(),
        status: event.status.clone(),
        command_uuid: event.command_uuid.clone(),
        request_type: event.request_type.clone(),
        raw: event.raw.clone(),
    }
    .encode_to_vec()
}

pub fn decode_connect_event(data: &[u8]) -> Result<ConnectEvent, DecodeError> {
    let pb = ConnectEventProto::decode(data)?;
    Ok(ConnectEvent {
        id: pb.id,
        time: from_nanos(pb.time).unwrap_or_default(),
        udid: pb.udid,
        user_id: if pb.user_id.is_empty() {
            None
        } else {
            Some(pb.user_id)
        },
        status: pb.status,
        command_uuid: pb.command_uuid,
        request_type: pb.request_type,
        raw: pb.raw,
    })
}

/// A freshly created command, addressed to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEvent {
    pub id: String,
    pub time: DateTime<Utc>,
    pub device_udid: String,
    pub command_uuid: String,
    /// The command plist exactly as the device will receive it.
    pub payload: Vec<u8>,
}

impl CommandEvent {
    pub fn new(device_udid: String, command_uuid: String, payload: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            device_udid,
            command_uuid,
            payload,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct CommandEventProto {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    time: i64,
    #[prost(string, tag = "3")]
    device_udid: String,
    #[prost(string, tag = "4")]
    command_uuid: String,
    #[prost(bytes = "vec", tag = "5")]
    payload: Vec<u8>,
}

pub fn encode_command_event(event: &CommandEvent) -> Vec<u8> {
    CommandEventProto {
        id: event.id.clone(),
        time: nanos(&Some(event.time)),
        device_udid: event.device_udid.clone(),
        command_uuid: event.command_uuid.clone(),
        payload: event.payload.clone(),
    }
    .encode_to_vec()
}

pub fn decode_command_event(data: &[u8]) -> Result<CommandEvent, DecodeError> {
    let pb = CommandEventProto::decode(data)?;
    Ok(CommandEvent {
        id: pb.id,
        time: from_nanos(pb.time).unwrap_or_default(),
        device_udid: pb.device_udid,
        command_uuid: pb.command_uuid,
        payload: pb.payload,
    })
}

/// Published by the queue once a command is durably enqueued.
#[derive(Clone, PartialEq, Message)]
pub struct CommandQueued {
    #[prost(string, tag = "1")]
    pub device_udid: String,
    #[prost(string, tag = "2")]
    pub command_uuid: String,
}

pub fn encode_command_queued(event: &CommandQueued) -> Vec<u8> {
    event.encode_to_vec()
}

pub fn decode_command_queued(data: &[u8]) -> Result<CommandQueued, DecodeError> {
    Ok(CommandQueued::decode(data)?)
}

/// A batch of devices reported by the DEP fetch/sync loop.
#[derive(Debug, Clone, PartialEq)]
pub struct DepSyncEvent {
    pub id: String,
    pub time: DateTime<Utc>,
    pub devices: Vec<dep_client::Device>,
}

impl DepSyncEvent {
    pub fn new(devices: Vec<dep_client::Device>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            time: Utc::now(),
            devices,
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct DepDeviceProto {
    #[prost(string, tag = "1")]
    serial_number: String,
    #[prost(string, tag = "2")]
    model: String,
    #[prost(string, tag = "3")]
    description: String,
    #[prost(string, tag = "4")]
    color: String,
    #[prost(string, tag = "5")]
    asset_tag: String,
    #[prost(string, tag = "6")]
    profile_status: String,
    #[prost(string, tag = "7")]
    profile_uuid: String,
    #[prost(int64, tag = "8")]
    profile_assign_time: i64,
    #[prost(int64, tag = "9")]
    profile_push_time: i64,
    #[prost(int64, tag = "10")]
    device_assigned_date: i64,
    #[prost(string, tag = "11")]
    device_assigned_by: String,
    #[prost(string, tag = "12")]
    op_type: String,
    #[prost(int64, tag = "13")]
    op_date: i64,
}

#[derive(Clone, PartialEq, Message)]
struct DepSyncEventProto {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(int64, tag = "2")]
    time: i64,
    #[prost(message, repeated, tag = "3")]
    devices: Vec<DepDeviceProto>,
}

pub fn encode_dep_sync_event(event: &DepSyncEvent) -> Vec<u8> {
    DepSyncEventProto {
        id: event.id.clone(),
        time: nanos(&Some(event.time)),
        devices: event
            .devices
            .iter()
            .map(|d| DepDeviceProto {
                serial_number: d.serial_number.clone(),
                model: d.model.clone(),
                description: d.description.clone(),
                color: d.color.clone(),
                asset_tag: d.asset_tag.clone(),
                profile_status: d.profile_status.clone(),
                profile_uuid: d.profile_uuid.clone(),
                profile_assign_time: nanos(&d.profile_assign_time),
                profile_push_time: nanos(&d.profile_push_time),
                device_assigned_date: nanos(&d.device_assigned_date),
                device_assigned_by: d.device_assigned_by.clone(),
                op_type: d.op_type.clone(),
                op_date: nanos(&d.op_date),
            })
            .collect(),
    }
    .encode_to_vec()
}

pub fn decode_dep_sync_event(data: &[u8]) -> Result<DepSyncEvent, DecodeError> {
    let pb = DepSyncEventProto::decode(data)?;
    Ok(DepSyncEvent {
        id: pb.id,
        time: from_nanos(pb.time).unwrap_or_default(),
        devices: pb
            .devices
            .into_iter()
            .map(|d| dep_client::Device {
                serial_number: d.serial_number,
                model: d.model,
                description: d.description,
                color: d.color,
                asset_tag: d.asset_tag,
                profile_status: d.profile_status,
                profile_uuid: d.profile_uuid,
                profile_assign_time: from_nanos(d.profile_assign_time),
                profile_push_time: from_nanos(d.profile_push_time),
                device_assigned_date: from_nanos(d.device_assigned_date),
                device_assigned_by: d.device_assigned_by,
                op_type: d.op_type,
                op_date: from_nanos(d.op_date),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkin_event_roundtrip() {
        let event = CheckinEvent::new(b"<plist/>".to_vec());
        let decoded = decode_checkin_event(&encode_checkin_event(&event)).unwrap();
        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.raw, event.raw);
        assert_eq!(decoded.time.timestamp_nanos_opt(), event.time.timestamp_nanos_opt());
    }

    #[test]
    fn connect_event_roundtrip_keeps_optional_user() {
        let response = mdm_protocol::ConnectResponse {
            udid: "U1".into(),
            user_id: None,
            status: "Acknowledged".into(),
            command_uuid: "cmd-1".into(),
            ..Default::default()
        };
        let event = ConnectEvent::new(&response, b"<plist/>".to_vec());
        let decoded = decode_connect_event(&encode_connect_event(&event)).unwrap();
        assert_eq!(decoded.user_id, None);
        assert_eq!(decoded.status, "Acknowledged");
        assert_eq!(decoded.command_uuid, "cmd-1");
    }

    #[test]
    fn dep_sync_event_roundtrip() {
        let event = DepSyncEvent::new(vec![dep_client::Device {
            serial_number: "S1".into(),
            model: "MacBook Pro".into(),
            profile_status: "assigned".into(),
            ..Default::default()
        }]);
        let decoded = decode_dep_sync_event(&encode_dep_sync_event(&event)).unwrap();
        assert_eq!(decoded.devices.len(), 1);
        assert_eq!(decoded.devices[0].serial_number, "S1");
        assert!(decoded.devices[0].op_date.is_none());
    }

    #[test]
    fn command_queued_roundtrip() {
        let event = CommandQueued {
            device_udid: "U1".into(),
            command_uuid: "cmd-1".into(),
        };
        let decoded = decode_command_queued(&encode_command_queued(&event)).unwrap();
        assert_eq!(decoded, event);
    }
}
