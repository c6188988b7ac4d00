//! Configuration profile payloads used by enrollment and OTA enrollment.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configuration profile: the outer `Configuration` payload carrying a
/// PayloadContent array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "PayloadType")]
    pub payload_type: String,
    #[serde(rename = "PayloadVersion")]
    pub payload_version: i64,
    #[serde(rename = "PayloadIdentifier")]
    pub payload_identifier: String,
    #[serde(rename = "PayloadUUID")]
    pub payload_uuid: String,
    #[serde(rename = "PayloadOrganization", skip_serializing_if = "String::is_empty", default)]
    pub payload_organization: String,
    #[serde(rename = "PayloadDisplayName", skip_serializing_if = "String::is_empty", default)]
    pub payload_display_name: String,
    #[serde(rename = "PayloadDescription", skip_serializing_if = "String::is_empty", default)]
    pub payload_description: String,
    #[serde(rename = "PayloadScope", skip_serializing_if = "String::is_empty", default)]
    pub payload_scope: String,
    #[serde(rename = "PayloadContent", skip_serializing_if = "Vec::is_empty", default)]
    pub payload_content: Vec<plist::Value>,
}

impl Profile {
    pub fn new() -> Self {
        Self {
            payload_type: "Configuration".to_string(),
            payload_version: 1,
            payload_identifier: String::new(),
            payload_uuid: Uuid::new_v4().to_string().to_uppercase(),
            payload_organization: String::new(),
            payload_display_name: String::new(),
            payload_description: String::new(),
            payload_scope: String::new(),
            payload_content: Vec::new(),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new()
    }
}

/// Common keys shared by every payload in a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    #[serde(rename = "PayloadType")]
    pub payload_type: String,
    #[serde(rename = "PayloadVersion")]
    pub payload_version: i64,
    #[serde(rename = "PayloadIdentifier")]
    pub payload_identifier: String,
    #[serde(rename = "PayloadUUID")]
    pub payload_uuid: String,
    #[serde(rename = "PayloadDisplayName", skip_serializing_if = "String::is_empty", default)]
    pub payload_display_name: String,
    #[serde(rename = "PayloadDescription", skip_serializing_if = "String::is_empty", default)]
    pub payload_description: String,
    #[serde(rename = "PayloadOrganization", skip_serializing_if = "String::is_empty", default)]
    pub payload_organization: String,
    #[serde(rename = "PayloadScope", skip_serializing_if = "String::is_empty", default)]
    pub payload_scope: String,
    #[serde(rename = "PayloadContent", skip_serializing_if = "Option::is_none", default)]
    pub payload_content: Option<plist::Value>,
}

impl Payload {
    pub fn new(payload_type: &str) -> Self {
        Self {
            payload_type: payload_type.to_string(),
            payload_version: 1,
            payload_identifier: String::new(),
            payload_uuid: Uuid::new_v4().to_string().to_uppercase(),
            payload_display_name: String::new(),
            payload_description: String::new(),
            payload_organization: String::new(),
            payload_scope: String::new(),
            payload_content: None,
        }
    }
}

/// The `com.apple.mdm` payload content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdmPayloadContent {
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(rename = "AccessRights")]
    pub access_rights: i64,
    #[serde(rename = "CheckInURL")]
    pub check_in_url: String,
    #[serde(rename = "CheckOutWhenRemoved")]
    pub check_out_when_removed: bool,
    #[serde(rename = "ServerURL")]
    pub server_url: String,
    #[serde(rename = "ServerCapabilities", skip_serializing_if = "Vec::is_empty", default)]
    pub server_capabilities: Vec<String>,
    #[serde(rename = "Topic")]
    pub topic: String,
    #[serde(rename = "SignMessage")]
    pub sign_message: bool,
    #[serde(rename = "IdentityCertificateUUID")]
    pub identity_certificate_uuid: String,
}

/// The `com.apple.security.scep` payload content dictionary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScepPayloadContent {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Challenge", skip_serializing_if = "String::is_empty", default)]
    pub challenge: String,
    #[serde(rename = "Keysize")]
    pub keysize: i64,
    #[serde(rename = "Key Type")]
    pub key_type: String,
    #[serde(rename = "Key Usage")]
    pub key_usage: i64,
    #[serde(rename = "Name", skip_serializing_if = "String::is_empty", default)]
    pub name: String,
    #[serde(rename = "Subject")]
    pub subject: Vec<Vec<Vec<String>>>,
}

/// Phase-1 OTA "Profile Service" payload content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileServicePayload {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "DeviceAttributes")]
    pub device_attributes: Vec<String>,
    #[serde(rename = "Challenge", skip_serializing_if = "String::is_empty", default)]
    pub challenge: String,
}

/// The CMS-signed body a device POSTs to `/mdm/enroll` during DEP enrollment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DepEnrollmentRequest {
    #[serde(rename = "LANGUAGE")]
    pub language: String,
    #[serde(rename = "PRODUCT")]
    pub product: String,
    #[serde(rename = "SERIAL")]
    pub serial: String,
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "VERSION")]
    pub version: String,
    #[serde(rename = "IMEI")]
    pub imei: String,
    #[serde(rename = "MEID")]
    pub meid: String,
}

/// Device attributes POSTed during OTA phases 2 and 3.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaEnrollmentRequest {
    #[serde(rename = "CHALLENGE")]
    pub challenge: String,
    #[serde(rename = "PRODUCT")]
    pub product: String,
    #[serde(rename = "SERIAL")]
    pub serial: String,
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "VERSION")]
    pub version: String,
    #[serde(rename = "IMEI")]
    pub imei: String,
    #[serde(rename = "MEID")]
    pub meid: String,
    #[serde(rename = "ICCID")]
    pub iccid: String,
    #[serde(rename = "MAC_ADDRESS_EN0")]
    pub mac_address_en0: String,
    #[serde(rename = "DEVICE_NAME")]
    pub device_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_serializes_nested_payloads() {
        let mut profile = Profile::new();
        profile.payload_identifier = "com.example.enroll".to_string();

        let mut scep_payload = Payload::new("com.apple.security.scep");
        scep_payload.payload_identifier = "com.example.enroll.scep".to_string();
        scep_payload.payload_content = Some(
            plist::to_value(&ScepPayloadContent {
                url: "https://mdm.example.org/scep".to_string(),
                challenge: "secret".to_string(),
                keysize: 2048,
                key_type: "RSA".to_string(),
                key_usage: 5,
                name: "Device Management Identity Certificate".to_string(),
                subject: vec![vec![vec!["O".to_string(), "MicroMDM".to_string()]]],
            })
            .unwrap(),
        );
        profile.payload_content = vec![plist::to_value(&scep_payload).unwrap()];

        let xml = crate::to_plist_xml(&profile).unwrap();
        let text = String::from_utf8(xml).unwrap();
        assert!(text.contains("<key>PayloadContent</key>"));
        assert!(text.contains("<key>Key Usage</key>"));
        assert!(text.contains("<string>com.apple.security.scep</string>"));
    }

    #[test]
    fn dep_enrollment_request_parses_upper_keys() {
        let body = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>SERIAL</key><string>C02XL0XYZ</string>
    <key>UDID</key><string>U1</string>
    <key>PRODUCT</key><string>MacBookPro18,3</string>
    <key>VERSION</key><string>23E214</string>
    <key>LANGUAGE</key><string>en</string>
</dict>
</plist>"#;
        let req: DepEnrollmentRequest = plist::from_bytes(body.as_bytes()).unwrap();
        assert_eq!(req.serial, "C02XL0XYZ");
        assert_eq!(req.udid, "U1");
    }
}
