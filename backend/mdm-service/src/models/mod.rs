//! Domain records persisted by the server.

pub mod codec;
pub mod events;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a device's DEP profile assignment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepProfileStatus {
    #[default]
    Empty,
    Assigned,
    Pushed,
    Removed,
}

impl DepProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepProfileStatus::Empty => "empty",
            DepProfileStatus::Assigned => "assigned",
            DepProfileStatus::Pushed => "pushed",
            DepProfileStatus::Removed => "removed",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "assigned" => DepProfileStatus::Assigned,
            "pushed" => DepProfileStatus::Pushed,
            "removed" => DepProfileStatus::Removed,
            _ => DepProfileStatus::Empty,
        }
    }
}

/// Materialized view of an enrolled (or DEP-assigned) device.
///
/// Created on first Authenticate or DEP sync, mutated by check-in and connect
/// events, never deleted. `uuid` is the primary key; UDID and serial number
/// index back to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub uuid: String,
    pub udid: String,
    pub serial_number: String,
    pub os_version: String,
    pub build_version: String,
    pub product_name: String,
    pub imei: String,
    pub meid: String,
    pub mdm_topic: String,
    pub push_magic: String,
    pub awaiting_configuration: bool,
    /// Hex-encoded APNs device token.
    pub token: String,
    pub unlock_token: String,
    pub enrolled: bool,
    pub dep_device: bool,
    pub description: String,
    pub model: String,
    pub model_name: String,
    pub device_name: String,
    pub color: String,
    pub asset_tag: String,
    pub dep_profile_status: DepProfileStatus,
    pub dep_profile_uuid: String,
    pub dep_profile_assign_time: Option<DateTime<Utc>>,
    pub dep_profile_push_time: Option<DateTime<Utc>>,
    pub dep_profile_assigned_date: Option<DateTime<Utc>>,
    pub dep_profile_assigned_by: String,
    pub last_checkin: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub last_query_response: Vec<u8>,
}

/// Push-addressable record maintained from TokenUpdate messages. For
/// per-user token updates the `udid` field holds the user GUID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushInfo {
    pub udid: String,
    pub push_magic: String,
    /// Hex-encoded APNs device token.
    pub token: String,
    pub mdm_topic: String,
}

/// A device-channel user account (macOS multi-user MDM).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uuid: String,
    pub udid: String,
    pub user_id: String,
    pub user_shortname: String,
    pub user_longname: String,
    pub auth_token: String,
    #[serde(with = "base64_bytes", skip_serializing_if = "Vec::is_empty", default)]
    pub password_hash: Vec<u8>,
    pub hidden: bool,
}

/// A stored configuration profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub identifier: String,
    #[serde(with = "base64_bytes")]
    pub mobileconfig: Vec<u8>,
}

impl Profile {
    /// A profile must carry payload bytes whose PayloadIdentifier matches the
    /// record's identifier. CMS-signed mobileconfigs are verified and
    /// unwrapped before the identifier is read.
    pub fn validate(&self) -> Result<(), String> {
        if self.identifier.is_empty() {
            return Err("Profile must have an identifier".to_string());
        }
        if self.mobileconfig.is_empty() {
            return Err("no mobileconfig data".to_string());
        }
        let payload_id = payload_identifier(&self.mobileconfig)?;
        if payload_id != self.identifier {
            return Err("payload identifier does not match profile".to_string());
        }
        Ok(())
    }
}

/// Read the PayloadIdentifier out of a mobileconfig, unwrapping a CMS
/// signature when the bytes are not bare XML.
pub fn payload_identifier(mobileconfig: &[u8]) -> Result<String, String> {
    #[derive(Deserialize)]
    struct PayloadId {
        #[serde(rename = "PayloadIdentifier", default)]
        payload_identifier: String,
    }

    let xml: Vec<u8>;
    let bytes = if mobileconfig.len() > 5 && !mobileconfig.starts_with(b"<?xml") {
        let verified = mdm_crypto::verify_signed_data(mobileconfig, None)
            .map_err(|e| format!("mobileconfig is neither XML nor verifiable CMS: {e}"))?;
        xml = verified.content;
        xml.as_slice()
    } else {
        mobileconfig
    };
    let parsed: PayloadId =
        plist::from_bytes(bytes).map_err(|e| format!("parse mobileconfig: {e}"))?;
    if parsed.payload_identifier.is_empty() {
        return Err("empty PayloadIdentifier in profile".to_string());
    }
    Ok(parsed.payload_identifier)
}

/// Declarative bundle applied to devices when a trigger fires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub uuid: String,
    pub name: String,
    #[serde(rename = "install_application_manifest_urls", default)]
    pub application_urls: Vec<String>,
    #[serde(rename = "profile_ids", default)]
    pub profile_identifiers: Vec<String>,
    #[serde(rename = "user_uuids", default)]
    pub user_uuids: Vec<String>,
    #[serde(default)]
    pub skip_primary_setup_account_creation: bool,
    #[serde(default)]
    pub set_primary_setup_account_as_regular_user: bool,
    #[serde(default)]
    pub apply_at: Vec<String>,
}

/// The only ApplyAt trigger currently supported.
pub const APPLY_AT_ENROLL: &str = "Enroll";

impl Blueprint {
    pub fn verify(&self) -> Result<(), String> {
        if self.name.is_empty() || self.uuid.is_empty() {
            return Err("Blueprint must have Name and UUID".to_string());
        }
        if (self.skip_primary_setup_account_creation
            || self.set_primary_setup_account_as_regular_user)
            && self.user_uuids.is_empty()
        {
            return Err(
                "account setup flags require at least one user UUID".to_string(),
            );
        }
        Ok(())
    }

    pub fn applies_at(&self, trigger: &str) -> bool {
        self.apply_at.iter().any(|t| t.eq_ignore_ascii_case(trigger))
    }
}

/// OAuth credentials for the DEP API, as decrypted from Apple's token blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepToken {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
    #[serde(default)]
    pub access_token_expiry: Option<DateTime<Utc>>,
}

impl DepToken {
    pub fn credentials(&self) -> dep_client::OauthCredentials {
        dep_client::OauthCredentials {
            consumer_key: self.consumer_key.clone(),
            consumer_secret: self.consumer_secret.clone(),
            access_token: self.access_token.clone(),
            access_secret: self.access_secret.clone(),
        }
    }
}

/// One queued command: the payload is the exact plist the device receives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueuedCommand {
    pub uuid: String,
    pub payload: Vec<u8>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub acknowledged: Option<DateTime<Utc>>,
    pub times_sent: i64,
    pub last_status: String,
    pub failure_message: Vec<u8>,
}

/// Per-device command partitions. A command UUID lives in exactly one of the
/// four lists at any time; `commands` keeps insertion order, rotated when a
/// command is handed to the device so delivery is at-least-once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceCommand {
    pub device_udid: String,
    pub commands: Vec<QueuedCommand>,
    pub completed: Vec<QueuedCommand>,
    pub failed: Vec<QueuedCommand>,
    pub not_now: Vec<QueuedCommand>,
}

mod base64_bytes {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        use base64::Engine;
        let text = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(text)
            .map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOBILECONFIG: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>PayloadIdentifier</key><string>com.example.wifi</string>
    <key>PayloadType</key><string>Configuration</string>
</dict>
</plist>"#;

    #[test]
    fn profile_validate_checks_identifier_match() {
        let good = Profile {
            identifier: "com.example.wifi".to_string(),
            mobileconfig: MOBILECONFIG.as_bytes().to_vec(),
        };
        assert!(good.validate().is_ok());

        let mismatched = Profile {
            identifier: "com.example.other".to_string(),
            mobileconfig: MOBILECONFIG.as_bytes().to_vec(),
        };
        assert!(mismatched.validate().is_err());
    }

    #[test]
    fn blueprint_verify_requires_name_and_uuid() {
        let mut bp = Blueprint {
            uuid: "bp-uuid".to_string(),
            name: "default".to_string(),
            apply_at: vec![APPLY_AT_ENROLL.to_string()],
            ..Default::default()
        };
        assert!(bp.verify().is_ok());
        assert!(bp.applies_at("enroll"));

        bp.name.clear();
        assert!(bp.verify().is_err());
    }

    #[test]
    fn blueprint_setup_flags_require_users() {
        let bp = Blueprint {
            uuid: "bp-uuid".to_string(),
            name: "default".to_string(),
            skip_primary_setup_account_creation: true,
            ..Default::default()
        };
        assert!(bp.verify().is_err());
    }

    #[test]
    fn dep_profile_status_roundtrips() {
        for status in [
            DepProfileStatus::Empty,
            DepProfileStatus::Assigned,
            DepProfileStatus::Pushed,
            DepProfileStatus::Removed,
        ] {
            assert_eq!(DepProfileStatus::from_str(status.as_str()), status);
        }
    }
}
