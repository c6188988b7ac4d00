//! Stable binary encodings for persisted records.
//!
//! Records are stored as length-delimited, field-tagged protobuf messages so
//! old databases keep decoding as fields are added. Timestamps are signed
//! nanoseconds since epoch; zero means "unset" and round-trips to `None`.

use chrono::{DateTime, TimeZone, Utc};
use prost::Message;

use super::{
    Blueprint, DepProfileStatus, Device, DeviceCommand, Profile, PushInfo, QueuedCommand, User,
};

#[derive(Debug, thiserror::Error)]
#[error("decode record: {0}")]
pub struct DecodeError(#[from] prost::DecodeError);

pub(crate) fn nanos(time: &Option<DateTime<Utc>>) -> i64 {
    time.and_then(|t| t.timestamp_nanos_opt()).unwrap_or(0)
}

pub(crate) fn from_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos == 0 {
        return None;
    }
    Some(Utc.timestamp_nanos(nanos))
}

#[derive(Clone, PartialEq, Message)]
struct DeviceProto {
    #[prost(string, tag = "1")]
    uuid: String,
    #[prost(string, tag = "2")]
    udid: String,
    #[prost(string, tag = "3")]
    serial_number: String,
    #[prost(string, tag = "4")]
    os_version: String,
    #[prost(string, tag = "5")]
    build_version: String,
    #[prost(string, tag = "6")]
    product_name: String,
    #[prost(string, tag = "7")]
    imei: String,
    #[prost(string, tag = "8")]
    meid: String,
    #[prost(string, tag = "9")]
    mdm_topic: String,
    #[prost(string, tag = "10")]
    push_magic: String,
    #[prost(bool, tag = "11")]
    awaiting_configuration: bool,
    #[prost(string, tag = "12")]
    token: String,
    #[prost(string, tag = "13")]
    unlock_token: String,
    #[prost(bool, tag = "14")]
    enrolled: bool,
    #[prost(bool, tag = "15")]
    dep_device: bool,
    #[prost(string, tag = "16")]
    description: String,
    #[prost(string, tag = "17")]
    model: String,
    #[prost(string, tag = "18")]
    model_name: String,
    #[prost(string, tag = "19")]
    device_name: String,
    #[prost(string, tag = "20")]
    color: String,
    #[prost(string, tag = "21")]
    asset_tag: String,
    #[prost(string, tag = "22")]
    dep_profile_status: String,
    #[prost(string, tag = "23")]
    dep_profile_uuid: String,
    #[prost(int64, tag = "24")]
    dep_profile_assign_time: i64,
    #[prost(int64, tag = "25")]
    dep_profile_push_time: i64,
    #[prost(int64, tag = "26")]
    dep_profile_assigned_date: i64,
    #[prost(string, tag = "27")]
    dep_profile_assigned_by: String,
    #[prost(int64, tag = "28")]
    last_checkin: i64,
    #[prost(bytes = "vec", tag = "29")]
    last_query_response: Vec<u8>,
}

pub fn encode_device(device: &Device) -> Vec<u8> {
    DeviceProto {
        uuid: device.uuid.clone(),
        udid: device.udid.clone(),
        serial_number: device.serial_number.clone(),
        os_version: device.os_version.clone(),
        build_version: device.build_version.clone(),
        product_name: device.product_name.clone(),
        imei: device.imei.clone(),
        meid: device.meid.clone(),
        mdm_topic: device.mdm_topic.clone(),
        push_magic: device.push_magic.clone(),
        awaiting_configuration: device.awaiting_configuration,
        token: device.token.clone(),
        unlock_token: device.unlock_token.clone(),
        enrolled: device.enrolled,
        dep_device: device.dep_device,
        description: device.description.clone(),
        model: device.model.clone(),
        model_name: device.model_name.clone(),
        device_name: device.device_name.clone(),
        color: device.color.clone(),
        asset_tag: device.asset_tag.clone(),
        dep_profile_status: device.dep_profile_status.as_str().to_string(),
        dep_profile_uuid: device.dep_profile_uuid.clone(),
        dep_profile_assign_time: nanos(&device.dep_profile_assign_time),
        dep_profile_push_time: nanos(&device.dep_profile_push_time),
        dep_profile_assigned_date: nanos(&device.dep_profile_assigned_date),
        dep_profile_assigned_by: device.dep_profile_assigned_by.clone(),
        last_checkin: nanos(&device.last_checkin),
        last_query_response: device.last_query_response.clone(),
    }
    .encode_to_vec()
}

pub fn decode_device(data: &[u8]) -> Result<Device, DecodeError> {
    let pb = DeviceProto::decode(data)?;
    Ok(Device {
        uuid: pb.uuid,
        udid: pb.udid,
        serial_number: pb.serial_number,
        os_version: pb.os_version,
        build_version: pb.build_version,
        product_name: pb.product_name,
        imei: pb.imei,
        meid: pb.meid,
        mdm_topic: pb.mdm_topic,
        push_magic: pb.push_magic,
        awaiting_configuration: pb.awaiting_configuration,
        token: pb.token,
        unlock_token: pb.unlock_token,
        enrolled: pb.enrolled,
        dep_device: pb.dep_device,
        description: pb.description,
        model: pb.model,
        model_name: pb.model_name,
        device_name: pb.device_name,
        color: pb.color,
        asset_tag: pb.asset_tag,
        dep_profile_status: DepProfileStatus::from_str(&pb.dep_profile_status),
        dep_profile_uuid: pb.dep_profile_uuid,
        dep_profile_assign_time: from_nanos(pb.dep_profile_assign_time),
        dep_profile_push_time: from_nanos(pb.dep_profile_push_time),
        dep_profile_assigned_date: from_nanos(pb.dep_profile_assigned_date),
        dep_profile_assigned_by: pb.dep_profile_assigned_by,
        last_checkin: from_nanos(pb.last_checkin),
        last_query_response: pb.last_query_response,
    })
}

#[derive(Clone, PartialEq, Message)]
struct PushInfoProto {
    #[prost(string, tag = "1")]
    udid: String,
    #[prost(string, tag = "2")]
    push_magic: String,
    #[prost(string, tag = "3")]
    token: String,
    #[prost(string, tag = "4")]
    mdm_topic: String,
}

pub fn encode_push_info(info: &PushInfo) -> Vec<u8> {
    PushInfoProto {
        udid: info.udid.clone(),
        push_magic: info.push_magic.clone(),
        token: info.token.clone(),
        mdm_topic: info.mdm_topic.clone(),
    }
    .encode_to_vec()
}

pub fn decode_push_info(data: &[u8]) -> Result<PushInfo, DecodeError> {
    let pb = PushInfoProto::decode(data)?;
    Ok(PushInfo {
        udid: pb.udid,
        push_magic: pb.push_magic,
        token: pb.token,
        mdm_topic: pb.mdm_topic,
    })
}

#[derive(Clone, PartialEq, Message)]
struct UserProto {
    #[prost(string, tag = "1")]
    uuid: String,
    #[prost(string, tag = "2")]
    udid: String,
    #[prost(string, tag = "3")]
    user_id: String,
    #[prost(string, tag = "4")]
    user_shortname: String,
    #[prost(string, tag = "5")]
    user_longname: String,
    #[prost(string, tag = "6")]
    auth_token: String,
    #[prost(bytes = "vec", tag = "7")]
    password_hash: Vec<u8>,
    #[prost(bool, tag = "8")]
    hidden: bool,
}

pub fn encode_user(user: &User) -> Vec<u8> {
    UserProto {
        uuid: user.uuid.clone(),
        udid: user.udid.clone(),
        user_id: user.user_id.clone(),
        user_shortname: user.user_shortname.clone(),
        user_longname: user.user_longname.clone(),
        auth_token: user.auth_token.clone(),
        password_hash: user.password_hash.clone(),
        hidden: user.hidden,
    }
    .encode_to_vec()
}

pub fn decode_user(data: &[u8]) -> Result<User, DecodeError> {
    let pb = UserProto::decode(data)?;
    Ok(User {
        uuid: pb.uuid,
        udid: pb.udid,
        user_id: pb.user_id,
        user_shortname: pb.user_shortname,
        user_longname: pb.user_longname,
        auth_token: pb.auth_token,
        password_hash: pb.password_hash,
        hidden: pb.hidden,
    })
}

#[derive(Clone, PartialEq, Message)]
struct ProfileProto {
    #[prost(string, tag = "1")]
    identifier: String,
    #[prost(bytes = "vec", tag = "2")]
    mobileconfig: Vec<u8>,
}

pub fn encode_profile(profile: &Profile) -> Vec<u8> {
    ProfileProto {
        identifier: profile.identifier.clone(),
        mobileconfig: profile.mobileconfig.clone(),
    }
    .encode_to_vec()
}

pub fn decode_profile(data: &[u8]) -> Result<Profile, DecodeError> {
    let pb = ProfileProto::decode(data)?;
    Ok(Profile {
        identifier: pb.identifier,
        mobileconfig: pb.mobileconfig,
    })
}

#[derive(Clone, PartialEq, Message)]
struct BlueprintProto {
    #[prost(string, tag = "1")]
    uuid: String,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(string, repeated, tag = "3")]
    application_urls: Vec<String>,
    #[prost(string, repeated, tag = "4")]
    profile_identifiers: Vec<String>,
    #[prost(string, repeated, tag = "5")]
    user_uuids: Vec<String>,
    #[prost(bool, tag = "6")]
    skip_primary_setup_account_creation: bool,
    #[prost(bool, tag = "7")]
    set_primary_setup_account_as_regular_user: bool,
    #[prost(string, repeated, tag = "8")]
    apply_at: Vec<String>,
}

pub fn encode_blueprint(blueprint: &Blueprint) -> Vec<u8> {
    BlueprintProto {
        uuid: blueprint.uuid.clone(),
        name: blueprint.name.clone(),
        application_urls: blueprint.application_urls.clone(),
        profile_identifiers: blueprint.profile_identifiers.clone(),
        user_uuids: blueprint.user_uuids.clone(),
        skip_primary_setup_account_creation: blueprint.skip_primary_setup_account_creation,
        set_primary_setup_account_as_regular_user: blueprint
            .set_primary_setup_account_as_regular_user,
        apply_at: blueprint.apply_at.clone(),
    }
    .encode_to_vec()
}

pub fn decode_blueprint(data: &[u8]) -> Result<Blueprint, DecodeError> {
    let pb = BlueprintProto::decode(data)?;
    Ok(Blueprint {
        uuid: pb.uuid,
        name: pb.name,
        application_urls: pb.application_urls,
        profile_identifiers: pb.profile_identifiers,
        user_uuids: pb.user_uuids,
        skip_primary_setup_account_creation: pb.skip_primary_setup_account_creation,
        set_primary_setup_account_as_regular_user: pb.set_primary_setup_account_as_regular_user,
        apply_at: pb.apply_at,
    })
}

#[derive(Clone, PartialEq, Message)]
struct QueuedCommandProto {
    #[prost(string, tag = "1")]
    uuid: String,
    #[prost(bytes = "vec", tag = "2")]
    payload: Vec<u8>,
    #[prost(int64, tag = "3")]
    created_at: i64,
    #[prost(int64, tag = "4")]
    last_sent_at: i64,
    #[prost(int64, tag = "5")]
    acknowledged: i64,
    #[prost(int64, tag = "6")]
    times_sent: i64,
    #[prost(string, tag = "7")]
    last_status: String,
    #[prost(bytes = "vec", tag = "8")]
    failure_message: Vec<u8>,
}

#[derive(Clone, PartialEq, Message)]
struct DeviceCommandProto {
    #[prost(string, tag = "1")]
    device_udid: String,
    #[prost(message, repeated, tag = "2")]
    commands: Vec<QueuedCommandProto>,
    #[prost(message, repeated, tag = "3")]
    completed: Vec<QueuedCommandProto>,
    #[prost(message, repeated, tag = "4")]
    failed: Vec<QueuedCommandProto>,
    #[prost(message, repeated, tag = "5")]
    not_now: Vec<QueuedCommandProto>,
}

fn command_to_proto(command: &QueuedCommand) -> QueuedCommandProto {
    QueuedCommandProto {
        uuid: command.uuid.clone(),
        payload: command.payload.clone(),
        created_at: nanos(&command.created_at),
        last_sent_at: nanos(&command.last_sent_at),
        acknowledged: nanos(&command.acknowledged),
        times_sent: command.times_sent,
        last_status: command.last_status.clone(),
        failure_message: command.failure_message.clone(),
    }
}

fn command_from_proto(pb: QueuedCommandProto) -> QueuedCommand {
    QueuedCommand {
        uuid: pb.uuid,
        payload: pb.payload,
        created_at: from_nanos(pb.created_at),
        last_sent_at: from_nanos(pb.last_sent_at),
        acknowledged: from_nanos(pb.acknowledged),
        times_sent: pb.times_sent,
        last_status: pb.last_status,
        failure_message: pb.failure_message,
    }
}

pub fn encode_device_command(dc: &DeviceCommand) -> Vec<u8> {
    DeviceCommandProto {
        device_udid: dc.device_udid.clone(),
        commands: dc.commands.iter().map(command_to_proto).collect(),
        completed: dc.completed.iter().map(command_to_proto).collect(),
        failed: dc.failed.iter().map(command_to_proto).collect(),
        not_now: dc.not_now.iter().map(command_to_proto).collect(),
    }
    .encode_to_vec()
}

pub fn decode_device_command(data: &[u8]) -> Result<DeviceCommand, DecodeError> {
    let pb = DeviceCommandProto::decode(data)?;
    Ok(DeviceCommand {
        device_udid: pb.device_udid,
        commands: pb.commands.into_iter().map(command_from_proto).collect(),
        completed: pb.completed.into_iter().map(command_from_proto).collect(),
        failed: pb.failed.into_iter().map(command_from_proto).collect(),
        not_now: pb.not_now.into_iter().map(command_from_proto).collect(),
    })
}

#[derive(Clone, PartialEq, Message)]
struct ServerConfigProto {
    #[prost(bytes = "vec", tag = "1")]
    push_certificate: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    private_key: Vec<u8>,
}

/// PEM bytes of the push certificate and its private key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerConfig {
    pub push_certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

pub fn encode_server_config(config: &ServerConfig) -> Vec<u8> {
    ServerConfigProto {
        push_certificate: config.push_certificate.clone(),
        private_key: config.private_key.clone(),
    }
    .encode_to_vec()
}

pub fn decode_server_config(data: &[u8]) -> Result<ServerConfig, DecodeError> {
    let pb = ServerConfigProto::decode(data)?;
    Ok(ServerConfig {
        push_certificate: pb.push_certificate,
        private_key: pb.private_key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn device_roundtrip_preserves_every_field() {
        let device = Device {
            uuid: "dev-uuid".into(),
            udid: "U1".into(),
            serial_number: "S1".into(),
            os_version: "14.4".into(),
            build_version: "23E214".into(),
            product_name: "iPhone".into(),
            imei: "356938035643809".into(),
            meid: String::new(),
            mdm_topic: "com.apple.mgmt.X".into(),
            push_magic: "PM".into(),
            awaiting_configuration: true,
            token: "deadbeef".into(),
            unlock_token: "cafe".into(),
            enrolled: true,
            dep_device: true,
            description: "MBP 14in".into(),
            model: "MacBook Pro".into(),
            model_name: "MacBook Pro".into(),
            device_name: "crash-cart".into(),
            color: "space gray".into(),
            asset_tag: "IT-99".into(),
            dep_profile_status: DepProfileStatus::Assigned,
            dep_profile_uuid: "dep-prof".into(),
            dep_profile_assign_time: Some(Utc.with_ymd_and_hms(2024, 2, 22, 9, 44, 22).unwrap()),
            dep_profile_push_time: None,
            dep_profile_assigned_date: None,
            dep_profile_assigned_by: "admin@example.org".into(),
            last_checkin: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            last_query_response: vec![1, 2, 3],
        };
        let decoded = decode_device(&encode_device(&device)).unwrap();
        assert_eq!(decoded, device);
    }

    #[test]
    fn zero_time_roundtrips_to_unset() {
        let device = Device::default();
        let decoded = decode_device(&encode_device(&device)).unwrap();
        assert!(decoded.last_checkin.is_none());
        assert!(decoded.dep_profile_assign_time.is_none());
    }

    #[test]
    fn device_command_roundtrip() {
        let dc = DeviceCommand {
            device_udid: "U1".into(),
            commands: vec![QueuedCommand {
                uuid: "cmd-1".into(),
                payload: b"<plist/>".to_vec(),
                created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
                times_sent: 2,
                last_status: "NotNow".into(),
                ..Default::default()
            }],
            completed: vec![QueuedCommand {
                uuid: "cmd-0".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(decode_device_command(&encode_device_command(&dc)).unwrap(), dc);
    }

    #[test]
    fn small_records_roundtrip() {
        let info = PushInfo {
            udid: "U1".into(),
            push_magic: "PM".into(),
            token: "deadbeef".into(),
            mdm_topic: "com.apple.mgmt.X".into(),
        };
        assert_eq!(decode_push_info(&encode_push_info(&info)).unwrap(), info);

        let user = User {
            uuid: "user-uuid".into(),
            udid: "U1".into(),
            user_id: "GUID-9".into(),
            user_shortname: "jdoe".into(),
            user_longname: "Jane Doe".into(),
            auth_token: "deadbeef".into(),
            password_hash: vec![9, 9, 9],
            hidden: true,
        };
        assert_eq!(decode_user(&encode_user(&user)).unwrap(), user);

        let blueprint = Blueprint {
            uuid: "bp-uuid".into(),
            name: "default".into(),
            application_urls: vec!["https://repo/app.plist".into()],
            profile_identifiers: vec!["com.example.wifi".into()],
            user_uuids: vec!["user-uuid".into()],
            skip_primary_setup_account_creation: true,
            set_primary_setup_account_as_regular_user: false,
            apply_at: vec!["Enroll".into()],
        };
        assert_eq!(decode_blueprint(&encode_blueprint(&blueprint)).unwrap(), blueprint);

        let profile = Profile {
            identifier: "com.example.wifi".into(),
            mobileconfig: b"<?xml ...".to_vec(),
        };
        assert_eq!(decode_profile(&encode_profile(&profile)).unwrap(), profile);
    }
}
