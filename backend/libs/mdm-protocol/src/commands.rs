//! MDM command payloads.
//!
//! A command is one tagged variant per RequestType with a shared
//! `{CommandUUID, Command}` envelope. The same types parse the admin API's
//! JSON requests (snake_case keys, via serde aliases) and serialize to the
//! plist the device receives, so the payload archived at creation time is
//! byte-for-byte the payload delivered over Connect.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ProtocolError;

/// The plist envelope delivered to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandPayload {
    #[serde(rename = "CommandUUID")]
    pub command_uuid: String,
    pub command: Command,
}

impl CommandPayload {
    /// Wrap a command with a fresh UUID.
    pub fn new(command: Command) -> Self {
        Self {
            command_uuid: Uuid::new_v4().to_string(),
            command,
        }
    }

    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(plist::from_bytes(body)?)
    }

    /// The XML plist the device receives.
    pub fn to_xml(&self) -> Result<Vec<u8>, ProtocolError> {
        crate::to_plist_xml(self)
    }
}

/// RequestTypes that carry no payload beyond the type itself.
const PAYLOAD_FREE: &[&str] = &[
    "ProfileList",
    "ProvisioningProfileList",
    "CertificateList",
    "SecurityInfo",
    "StopMirroring",
    "ClearRestrictionsPassword",
    "UserList",
    "LogOutUser",
    "DisableLostMode",
    "DeviceLocation",
    "ManagedMediaList",
    "OSUpdateStatus",
    "DeviceConfigured",
    "AvailableOSUpdates",
    "ShutDownDevice",
    "RestartDevice",
];

const WITH_PAYLOAD: &[&str] = &[
    "DeviceInformation",
    "DeviceLock",
    "ClearPasscode",
    "EraseDevice",
    "InstallProfile",
    "RemoveProfile",
    "InstallProvisioningProfile",
    "RemoveProvisioningProfile",
    "InstalledApplicationList",
    "InstallApplication",
    "ApplyRedemptionCode",
    "InstallMedia",
    "RemoveMedia",
    "Settings",
    "AccountConfiguration",
    "ScheduleOSUpdate",
    "ScheduleOSUpdateScan",
    "DeleteUser",
    "EnableLostMode",
    "RequestMirroring",
];

/// An MDM command, tagged by RequestType.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "RequestType")]
pub enum Command {
    DeviceInformation {
        #[serde(alias = "queries", default, skip_serializing_if = "Vec::is_empty")]
        #[serde(rename = "Queries")]
        queries: Vec<String>,
    },
    DeviceLock {
        #[serde(alias = "pin", default, rename = "PIN")]
        pin: String,
        #[serde(alias = "message", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "Message")]
        message: String,
        #[serde(alias = "phone_number", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "PhoneNumber")]
        phone_number: String,
    },
    ClearPasscode {
        #[serde(alias = "unlock_token", default, with = "crate::ser::data", rename = "UnlockToken")]
        unlock_token: Vec<u8>,
    },
    EraseDevice {
        #[serde(alias = "pin", default, rename = "PIN")]
        pin: String,
    },
    InstallProfile {
        #[serde(alias = "payload", default, with = "crate::ser::data", rename = "Payload")]
        payload: Vec<u8>,
    },
    RemoveProfile {
        #[serde(alias = "identifier", default, rename = "Identifier")]
        identifier: String,
    },
    InstallProvisioningProfile {
        #[serde(alias = "provisioning_profile", default, with = "crate::ser::data")]
        #[serde(rename = "ProvisioningProfile")]
        provisioning_profile: Vec<u8>,
    },
    RemoveProvisioningProfile {
        #[serde(alias = "uuid", default, rename = "UUID")]
        uuid: String,
    },
    InstalledApplicationList {
        #[serde(alias = "identifiers", default, skip_serializing_if = "Vec::is_empty")]
        #[serde(rename = "Identifiers")]
        identifiers: Vec<String>,
        #[serde(alias = "managed_apps_only", default, rename = "ManagedAppsOnly")]
        managed_apps_only: bool,
    },
    InstallApplication {
        #[serde(alias = "itunes_store_id", default, skip_serializing_if = "Option::is_none")]
        #[serde(rename = "iTunesStoreID")]
        itunes_store_id: Option<i64>,
        #[serde(alias = "identifier", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "Identifier")]
        identifier: String,
        #[serde(alias = "manifest_url", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "ManifestURL")]
        manifest_url: String,
        #[serde(alias = "management_flags", default, skip_serializing_if = "Option::is_none")]
        #[serde(rename = "ManagementFlags")]
        management_flags: Option<i64>,
        #[serde(alias = "not_managed", default, skip_serializing_if = "std::ops::Not::not")]
        #[serde(rename = "NotManaged")]
        not_managed: bool,
        #[serde(alias = "change_management_state", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "ChangeManagementState")]
        change_management_state: String,
        #[serde(alias = "options", default, skip_serializing_if = "Option::is_none")]
        #[serde(rename = "Options")]
        options: Option<InstallApplicationOptions>,
    },
    ApplyRedemptionCode {
        #[serde(alias = "identifier", default, rename = "Identifier")]
        identifier: String,
        #[serde(alias = "redemption_code", default, rename = "RedemptionCode")]
        redemption_code: String,
    },
    InstallMedia {
        #[serde(alias = "itunes_store_id", default, skip_serializing_if = "Option::is_none")]
        #[serde(rename = "iTunesStoreID")]
        itunes_store_id: Option<i64>,
        #[serde(alias = "media_url", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "MediaURL")]
        media_url: String,
        #[serde(alias = "media_type", default, rename = "MediaType")]
        media_type: String,
    },
    RemoveMedia {
        #[serde(alias = "media_type", default, rename = "MediaType")]
        media_type: String,
        #[serde(alias = "itunes_store_id", default, skip_serializing_if = "Option::is_none")]
        #[serde(rename = "iTunesStoreID")]
        itunes_store_id: Option<i64>,
        #[serde(alias = "persistent_id", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "PersistentID")]
        persistent_id: String,
    },
    Settings {
        #[serde(alias = "settings", default, rename = "Settings")]
        settings: Vec<Setting>,
    },
    AccountConfiguration {
        #[serde(alias = "skip_primary_setup_account_creation", default)]
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        #[serde(rename = "SkipPrimarySetupAccountCreation")]
        skip_primary_setup_account_creation: bool,
        #[serde(alias = "set_primary_setup_account_as_regular_user", default)]
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        #[serde(rename = "SetPrimarySetupAccountAsRegularUser")]
        set_primary_setup_account_as_regular_user: bool,
        #[serde(alias = "auto_setup_admin_accounts", default, skip_serializing_if = "Vec::is_empty")]
        #[serde(rename = "AutoSetupAdminAccounts")]
        auto_setup_admin_accounts: Vec<AdminAccount>,
    },
    ScheduleOSUpdate {
        #[serde(alias = "updates", default, skip_serializing_if = "Vec::is_empty")]
        #[serde(rename = "Updates")]
        updates: Vec<OsUpdate>,
    },
    ScheduleOSUpdateScan {
        #[serde(alias = "force", default, skip_serializing_if = "std::ops::Not::not")]
        #[serde(rename = "Force")]
        force: bool,
    },
    DeleteUser {
        #[serde(alias = "user_name", default, rename = "UserName")]
        user_name: String,
        #[serde(alias = "force_deletion", default, skip_serializing_if = "std::ops::Not::not")]
        #[serde(rename = "ForceDeletion")]
        force_deletion: bool,
    },
    EnableLostMode {
        #[serde(alias = "message", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "Message")]
        message: String,
        #[serde(alias = "phone_number", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "PhoneNumber")]
        phone_number: String,
        #[serde(alias = "footnote", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "Footnote")]
        footnote: String,
    },
    RequestMirroring {
        #[serde(alias = "destination_name", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "DestinationName")]
        destination_name: String,
        #[serde(alias = "destination_device_id", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "DestinationDeviceID")]
        destination_device_id: String,
        #[serde(alias = "scan_time", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "ScanTime")]
        scan_time: String,
        #[serde(alias = "password", default, skip_serializing_if = "String::is_empty")]
        #[serde(rename = "Password")]
        password: String,
    },

    // Query commands with no payload of their own.
    ProfileList,
    ProvisioningProfileList,
    CertificateList,
    SecurityInfo,
    StopMirroring,
    ClearRestrictionsPassword,
    UserList,
    LogOutUser,
    DisableLostMode,
    DeviceLocation,
    ManagedMediaList,
    OSUpdateStatus,
    DeviceConfigured,
    AvailableOSUpdates,
    ShutDownDevice,
    RestartDevice,
}

impl Command {
    pub fn request_type(&self) -> &'static str {
        match self {
            Command::DeviceInformation { .. } => "DeviceInformation",
            Command::DeviceLock { .. } => "DeviceLock",
            Command::ClearPasscode { .. } => "ClearPasscode",
            Command::EraseDevice { .. } => "EraseDevice",
            Command::InstallProfile { .. } => "InstallProfile",
            Command::RemoveProfile { .. } => "RemoveProfile",
            Command::InstallProvisioningProfile { .. } => "InstallProvisioningProfile",
            Command::RemoveProvisioningProfile { .. } => "RemoveProvisioningProfile",
            Command::InstalledApplicationList { .. } => "InstalledApplicationList",
            Command::InstallApplication { .. } => "InstallApplication",
            Command::ApplyRedemptionCode { .. } => "ApplyRedemptionCode",
            Command::InstallMedia { .. } => "InstallMedia",
            Command::RemoveMedia { .. } => "RemoveMedia",
            Command::Settings { .. } => "Settings",
            Command::AccountConfiguration { .. } => "AccountConfiguration",
            Command::ScheduleOSUpdate { .. } => "ScheduleOSUpdate",
            Command::ScheduleOSUpdateScan { .. } => "ScheduleOSUpdateScan",
            Command::DeleteUser { .. } => "DeleteUser",
            Command::EnableLostMode { .. } => "EnableLostMode",
            Command::RequestMirroring { .. } => "RequestMirroring",
            Command::ProfileList => "ProfileList",
            Command::ProvisioningProfileList => "ProvisioningProfileList",
            Command::CertificateList => "CertificateList",
            Command::SecurityInfo => "SecurityInfo",
            Command::StopMirroring => "StopMirroring",
            Command::ClearRestrictionsPassword => "ClearRestrictionsPassword",
            Command::UserList => "UserList",
            Command::LogOutUser => "LogOutUser",
            Command::DisableLostMode => "DisableLostMode",
            Command::DeviceLocation => "DeviceLocation",
            Command::ManagedMediaList => "ManagedMediaList",
            Command::OSUpdateStatus => "OSUpdateStatus",
            Command::DeviceConfigured => "DeviceConfigured",
            Command::AvailableOSUpdates => "AvailableOSUpdates",
            Command::ShutDownDevice => "ShutDownDevice",
            Command::RestartDevice => "RestartDevice",
        }
    }

    /// Build a command from an admin API request body:
    /// `{"udid": …, "request_type": …, <snake_case fields>}`.
    /// Returns `(udid, command)`.
    pub fn from_request_json(body: &[u8]) -> Result<(String, Command), ProtocolError> {
        let mut value: serde_json::Value = serde_json::from_slice(body)?;
        let object = value
            .as_object_mut()
            .ok_or(ProtocolError::EmptyCommandRequest)?;
        let udid = object
            .remove("udid")
            .and_then(|u| u.as_str().map(str::to_string))
            .unwrap_or_default();
        let request_type = object
            .remove("request_type")
            .and_then(|r| r.as_str().map(str::to_string))
            .ok_or(ProtocolError::EmptyCommandRequest)?;
        if !PAYLOAD_FREE.contains(&request_type.as_str())
            && !WITH_PAYLOAD.contains(&request_type.as_str())
        {
            return Err(ProtocolError::UnsupportedRequestType(request_type));
        }
        object.insert("RequestType".to_string(), request_type.into());
        let command = serde_json::from_value(value)?;
        Ok((udid, command))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallApplicationOptions {
    #[serde(alias = "not_managed", default, skip_serializing_if = "std::ops::Not::not")]
    #[serde(rename = "NotManaged")]
    pub not_managed: bool,
    #[serde(alias = "purchase_method", default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "PurchaseMethod")]
    pub purchase_method: Option<i64>,
}

/// One entry of a Settings command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(alias = "item", rename = "Item")]
    pub item: String,
    #[serde(alias = "enabled", default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "Enabled")]
    pub enabled: Option<bool>,
    #[serde(alias = "device_name", default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "DeviceName")]
    pub device_name: Option<String>,
    #[serde(alias = "hostname", default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "HostName")]
    pub host_name: Option<String>,
    #[serde(alias = "identifier", default, skip_serializing_if = "Option::is_none")]
    #[serde(rename = "Identifier")]
    pub identifier: Option<String>,
}

/// Admin account created by Setup Assistant via AccountConfiguration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminAccount {
    #[serde(alias = "short_name", rename = "shortName")]
    pub short_name: String,
    #[serde(alias = "full_name", default, skip_serializing_if = "String::is_empty")]
    #[serde(rename = "fullName")]
    pub full_name: String,
    #[serde(alias = "password_hash", default, with = "crate::ser::data", rename = "passwordHash")]
    pub password_hash: Vec<u8>,
    #[serde(alias = "hidden", default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OsUpdate {
    #[serde(alias = "product_key", rename = "ProductKey")]
    pub product_key: String,
    #[serde(alias = "install_action", rename = "InstallAction")]
    pub install_action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_information_request_to_plist() {
        let body = br#"{"udid":"U1","request_type":"DeviceInformation","queries":["SerialNumber"]}"#;
        let (udid, command) = Command::from_request_json(body).unwrap();
        assert_eq!(udid, "U1");

        let payload = CommandPayload::new(command);
        let xml = payload.to_xml().unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.contains("<key>CommandUUID</key>"));
        assert!(text.contains("<key>RequestType</key>"));
        assert!(text.contains("<string>DeviceInformation</string>"));
        assert!(text.contains("<string>SerialNumber</string>"));
    }

    #[test]
    fn remove_profile_keeps_identifier() {
        let body = br#"{"udid":"abcd","request_type":"RemoveProfile","identifier":"aaaa"}"#;
        let (_, command) = Command::from_request_json(body).unwrap();
        match &command {
            Command::RemoveProfile { identifier } => assert_eq!(identifier, "aaaa"),
            other => panic!("unexpected command: {other:?}"),
        }
        let xml = CommandPayload::new(command).to_xml().unwrap();
        assert!(String::from_utf8(xml).unwrap().contains("<key>Identifier</key>"));
    }

    #[test]
    fn install_profile_payload_from_base64() {
        let body = br#"{"udid":"U1","request_type":"InstallProfile","payload":"AAECAw=="}"#;
        let (_, command) = Command::from_request_json(body).unwrap();
        match command {
            Command::InstallProfile { ref payload } => assert_eq!(payload, &[0, 1, 2, 3]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn payload_free_request_roundtrips() {
        let body = br#"{"udid":"abcd","request_type":"ProfileList"}"#;
        let (_, command) = Command::from_request_json(body).unwrap();
        let payload = CommandPayload::new(command);
        let xml = payload.to_xml().unwrap();
        let parsed = CommandPayload::parse(&xml).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn unknown_request_type_is_rejected() {
        let body = br#"{"udid":"U1","request_type":"FlyToTheMoon"}"#;
        let err = Command::from_request_json(body).unwrap_err();
        assert!(err.to_string().contains("Unsupported MDM RequestType"));
    }

    #[test]
    fn account_configuration_plist_key_casing() {
        let command = Command::AccountConfiguration {
            skip_primary_setup_account_creation: false,
            set_primary_setup_account_as_regular_user: true,
            auto_setup_admin_accounts: vec![AdminAccount {
                short_name: "admin".into(),
                full_name: "Administrator".into(),
                password_hash: vec![1, 2, 3],
                hidden: true,
            }],
        };
        let xml = String::from_utf8(CommandPayload::new(command).to_xml().unwrap()).unwrap();
        assert!(xml.contains("<key>shortName</key>"));
        assert!(xml.contains("<key>passwordHash</key>"));
        assert!(xml.contains("<key>SetPrimarySetupAccountAsRegularUser</key>"));
    }
}
