//! Device responses posted to the Connect endpoint.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A command acknowledgement (or Idle poll) from a device.
///
/// Only the routing fields are modeled; command-specific result dictionaries
/// (QueryResponses, SecurityInfo, …) are carried opaquely so the archive and
/// webhooks see the exact bytes the device sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectResponse {
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "UserID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: String,
    #[serde(rename = "CommandUUID", skip_serializing_if = "String::is_empty")]
    pub command_uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub request_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_chain: Vec<ErrorChainItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_responses: Option<plist::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorChainItem {
    pub error_code: i64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_domain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub localized_description: String,
    #[serde(rename = "USEnglishDescription", skip_serializing_if = "String::is_empty")]
    pub us_english_description: String,
}

impl ConnectResponse {
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        Ok(plist::from_bytes(body)?)
    }

    /// The identifier the command queue is keyed on: the user GUID for
    /// user-channel responses, the device UDID otherwise.
    pub fn queue_key(&self) -> &str {
        match &self.user_id {
            Some(user_id) if !user_id.is_empty() => user_id,
            _ => &self.udid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>UDID</key><string>U1</string>
    <key>Status</key><string>Idle</string>
</dict>
</plist>"#;

    const ERROR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>UDID</key><string>U1</string>
    <key>Status</key><string>Error</string>
    <key>CommandUUID</key><string>CMD-1</string>
    <key>ErrorChain</key>
    <array>
        <dict>
            <key>ErrorCode</key><integer>4001</integer>
            <key>ErrorDomain</key><string>MCInstallationErrorDomain</string>
            <key>LocalizedDescription</key><string>Profile Installation Failed</string>
        </dict>
    </array>
</dict>
</plist>"#;

    #[test]
    fn parses_idle() {
        let resp = ConnectResponse::parse(IDLE.as_bytes()).unwrap();
        assert_eq!(resp.status, "Idle");
        assert_eq!(resp.queue_key(), "U1");
        assert!(resp.command_uuid.is_empty());
    }

    #[test]
    fn parses_error_chain() {
        let resp = ConnectResponse::parse(ERROR.as_bytes()).unwrap();
        assert_eq!(resp.status, "Error");
        assert_eq!(resp.error_chain.len(), 1);
        assert_eq!(resp.error_chain[0].error_code, 4001);
    }

    #[test]
    fn user_responses_key_on_the_user_guid() {
        let resp = ConnectResponse {
            udid: "U1".into(),
            user_id: Some("GUID-9".into()),
            status: "Idle".into(),
            ..Default::default()
        };
        assert_eq!(resp.queue_key(), "GUID-9");
    }
}
