//! Check-in message types (Authenticate / TokenUpdate / CheckOut).

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Identity fields reported on Authenticate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeviceIdentity {
    #[serde(rename = "OSVersion")]
    pub os_version: String,
    pub build_version: String,
    pub product_name: String,
    pub serial_number: String,
    #[serde(rename = "IMEI")]
    pub imei: String,
    #[serde(rename = "MEID")]
    pub meid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub device_name: String,
    #[serde(with = "crate::ser::data_opt", skip_serializing_if = "Option::is_none")]
    pub challenge: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model_name: String,
}

/// TokenUpdate fields, including the per-user variant keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TokenUpdate {
    #[serde(with = "crate::ser::data")]
    pub token: Vec<u8>,
    pub push_magic: String,
    #[serde(with = "crate::ser::data_opt", skip_serializing_if = "Option::is_none")]
    pub unlock_token: Option<Vec<u8>>,
    pub awaiting_configuration: bool,

    // Per-user token updates (macOS multi-user) carry the user GUID.
    #[serde(rename = "UserID", skip_serializing_if = "String::is_empty")]
    pub user_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_long_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_short_name: String,
    pub not_on_console: bool,
}

/// A check-in message, dispatched on the MessageType key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "MessageType")]
pub enum CheckinMessage {
    Authenticate {
        #[serde(rename = "UDID")]
        udid: String,
        #[serde(rename = "Topic", default, skip_serializing_if = "String::is_empty")]
        topic: String,
        #[serde(flatten)]
        identity: DeviceIdentity,
    },
    TokenUpdate {
        #[serde(rename = "UDID", default)]
        udid: String,
        #[serde(rename = "Topic", default, skip_serializing_if = "String::is_empty")]
        topic: String,
        #[serde(flatten)]
        update: TokenUpdate,
    },
    CheckOut {
        #[serde(rename = "UDID")]
        udid: String,
        #[serde(rename = "Topic", default, skip_serializing_if = "String::is_empty")]
        topic: String,
    },
}

impl CheckinMessage {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(plist::from_bytes(body)?)
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            CheckinMessage::Authenticate { .. } => "Authenticate",
            CheckinMessage::TokenUpdate { .. } => "TokenUpdate",
            CheckinMessage::CheckOut { .. } => "CheckOut",
        }
    }

    pub fn udid(&self) -> &str {
        match self {
            CheckinMessage::Authenticate { udid, .. }
            | CheckinMessage::TokenUpdate { udid, .. }
            | CheckinMessage::CheckOut { udid, .. } => udid,
        }
    }

    /// The user GUID for per-user TokenUpdates, empty otherwise.
    pub fn user_id(&self) -> &str {
        match self {
            CheckinMessage::TokenUpdate { update, .. } => &update.user_id,
            _ => "",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUTHENTICATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>MessageType</key><string>Authenticate</string>
    <key>UDID</key><string>564D8F37-D662-4A57-9F3E-C7F9D1A93A42</string>
    <key>Topic</key><string>com.apple.mgmt.External.example</string>
    <key>OSVersion</key><string>14.4</string>
    <key>BuildVersion</key><string>23E214</string>
    <key>ProductName</key><string>MacBookPro18,3</string>
    <key>SerialNumber</key><string>C02XL0XYZ</string>
    <key>IMEI</key><string></string>
    <key>MEID</key><string></string>
</dict>
</plist>"#;

    const TOKEN_UPDATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>MessageType</key><string>TokenUpdate</string>
    <key>UDID</key><string>564D8F37-D662-4A57-9F3E-C7F9D1A93A42</string>
    <key>Topic</key><string>com.apple.mgmt.External.example</string>
    <key>Token</key><data>3q2+7w==</data>
    <key>PushMagic</key><string>600A2C90-B22C-4B50-9B3F-E88B722A4F4B</string>
    <key>AwaitingConfiguration</key><false/>
</dict>
</plist>"#;

    const USER_TOKEN_UPDATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>MessageType</key><string>TokenUpdate</string>
    <key>UDID</key><string>564D8F37-D662-4A57-9F3E-C7F9D1A93A42</string>
    <key>Topic</key><string>com.apple.mgmt.External.example</string>
    <key>Token</key><data>3q2+7w==</data>
    <key>PushMagic</key><string>UM</string>
    <key>UserID</key><string>F11A0EA0-15A3-4A69-9E64-2858A3B1B5A8</string>
    <key>UserShortName</key><string>jdoe</string>
    <key>UserLongName</key><string>Jane Doe</string>
</dict>
</plist>"#;

    #[test]
    fn parses_authenticate() {
        let msg = CheckinMessage::parse(AUTHENTICATE.as_bytes()).unwrap();
        assert_eq!(msg.message_type(), "Authenticate");
        assert_eq!(msg.udid(), "564D8F37-D662-4A57-9F3E-C7F9D1A93A42");
        match msg {
            CheckinMessage::Authenticate { identity, .. } => {
                assert_eq!(identity.serial_number, "C02XL0XYZ");
                assert_eq!(identity.product_name, "MacBookPro18,3");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_token_update_with_binary_token() {
        let msg = CheckinMessage::parse(TOKEN_UPDATE.as_bytes()).unwrap();
        match msg {
            CheckinMessage::TokenUpdate { update, .. } => {
                assert_eq!(update.token, vec![0xde, 0xad, 0xbe, 0xef]);
                assert_eq!(update.push_magic, "600A2C90-B22C-4B50-9B3F-E88B722A4F4B");
                assert!(update.user_id.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn parses_user_channel_token_update() {
        let msg = CheckinMessage::parse(USER_TOKEN_UPDATE.as_bytes()).unwrap();
        assert_eq!(msg.user_id(), "F11A0EA0-15A3-4A69-9E64-2858A3B1B5A8");
        match msg {
            CheckinMessage::TokenUpdate { update, .. } => {
                assert_eq!(update.user_short_name, "jdoe");
                assert_eq!(update.user_long_name, "Jane Doe");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(CheckinMessage::parse(b"not a plist").is_err());
    }
}
