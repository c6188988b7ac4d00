//! Enrollment service: builds the enrollment and OTA profiles.

use std::sync::Arc;

use event_bus::PubSub;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{Result, ServiceError};
use crate::models::events::topics;
use crate::store::config::ConfigStore;
use crate::store::profiles::ProfileStore;
use mdm_protocol::{
    to_plist_xml, MdmPayloadContent, Payload, Profile, ProfileServicePayload, ScepPayloadContent,
};

pub const ENROLLMENT_PROFILE_ID: &str = "com.github.micromdm.micromdm.enroll";
pub const OTA_PROFILE_ID: &str = "com.github.micromdm.micromdm.ota";

// All MDM access rights.
const ALL_ACCESS_RIGHTS: i64 = 8191;
const PER_USER_CONNECTIONS: &str = "com.apple.mdm.per-user-connections";

// digitalSignature | keyEncipherment
const SCEP_KEY_USAGE: i64 = 5;

pub struct EnrollService {
    url: String,
    scep_url: String,
    scep_challenge: String,
    scep_subject: Vec<Vec<Vec<String>>>,
    ca_cert_pem: Vec<u8>,
    tls_cert_pem: Vec<u8>,
    profiles: ProfileStore,
    // APNs topic for MDM payloads; filled in lazily when the push
    // certificate shows up after boot.
    topic: RwLock<String>,
}

impl EnrollService {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        config: ConfigStore,
        bus: &PubSub,
        url: &str,
        scep_url: &str,
        scep_challenge: &str,
        scep_subject: &str,
        ca_cert_pem: Vec<u8>,
        tls_cert_pem: Vec<u8>,
        profiles: ProfileStore,
    ) -> Result<Arc<Self>> {
        let subject = if scep_subject.is_empty() {
            "/O=MicroMDM/CN=MicroMDM Identity (%ComputerName%)"
        } else {
            scep_subject
        };

        // empty until the push certificate has been uploaded
        let topic = config.push_topic().await.unwrap_or_default();

        let svc = Arc::new(Self {
            url: url.trim_end_matches('/').to_string(),
            scep_url: scep_url.to_string(),
            scep_challenge: scep_challenge.to_string(),
            scep_subject: parse_scep_subject(subject)?,
            ca_cert_pem,
            tls_cert_pem,
            profiles,
            topic: RwLock::new(topic),
        });

        start_topic_updater(svc.clone(), config, bus);
        Ok(svc)
    }

    /// The enrollment mobileconfig. A stored profile with the enrollment
    /// identifier overrides the generated one.
    pub async fn enroll_profile(&self) -> Result<Vec<u8>> {
        if let Some(stored) = self.stored_profile(ENROLLMENT_PROFILE_ID).await? {
            return Ok(stored);
        }
        let profile = self.make_enrollment_profile().await?;
        Ok(to_plist_xml(&profile)?)
    }

    /// Phase-1 OTA payload: collects device attributes and points the device
    /// at the phase 2/3 endpoint.
    pub async fn ota_enroll_payload(&self) -> Result<Vec<u8>> {
        if let Some(stored) = self.stored_profile(OTA_PROFILE_ID).await? {
            return Ok(stored);
        }
        let mut payload = Payload::new("Profile Service");
        payload.payload_identifier = OTA_PROFILE_ID.to_string();
        payload.payload_display_name = "MicroMDM Profile Service".to_string();
        payload.payload_description = "Profile Service enrollment".to_string();
        payload.payload_organization = "MicroMDM".to_string();
        payload.payload_content = Some(
            plist::to_value(&ProfileServicePayload {
                url: format!("{}/ota/phase23", self.url),
                device_attributes: ["UDID", "VERSION", "PRODUCT", "SERIAL", "MEID", "IMEI"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                challenge: String::new(),
            })
            .map_err(|e| ServiceError::Internal(e.to_string()))?,
        );
        Ok(to_plist_xml(&payload)?)
    }

    /// Phase-2 OTA profile: SCEP only, to give the device a local identity.
    pub async fn ota_phase2_profile(&self) -> Result<Vec<u8>> {
        let profile_id = format!("{OTA_PROFILE_ID}.phase2");
        if let Some(stored) = self.stored_profile(&profile_id).await? {
            return Ok(stored);
        }
        let mut profile = Profile::new();
        profile.payload_identifier = profile_id;
        profile.payload_organization = "MicroMDM".to_string();
        profile.payload_display_name = "OTA Phase 2".to_string();
        profile.payload_description = "The server may alter your settings".to_string();
        profile.payload_scope = "System".to_string();

        let mut scep_payload = Payload::new("com.apple.security.scep");
        scep_payload.payload_description = "Configures SCEP".to_string();
        scep_payload.payload_display_name = "SCEP".to_string();
        scep_payload.payload_identifier = format!("{OTA_PROFILE_ID}.phase2.scep");
        scep_payload.payload_organization = "MicroMDM".to_string();
        scep_payload.payload_scope = "System".to_string();
        scep_payload.payload_content = Some(
            plist::to_value(&self.scep_payload_content("OTA Phase 2 Certificate"))
                .map_err(|e| ServiceError::Internal(e.to_string()))?,
        );
        profile.payload_content = vec![
            plist::to_value(&scep_payload).map_err(|e| ServiceError::Internal(e.to_string()))?
        ];
        Ok(to_plist_xml(&profile)?)
    }

    /// Phase-3 OTA: the device now signs with a certificate we issued, so it
    /// gets the full enrollment profile.
    pub async fn ota_phase3_profile(&self) -> Result<Vec<u8>> {
        self.enroll_profile().await
    }

    async fn stored_profile(&self, identifier: &str) -> Result<Option<Vec<u8>>> {
        match self.profiles.profile_by_id(identifier).await {
            Ok(profile) => Ok(Some(profile.mobileconfig)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn scep_payload_content(&self, name: &str) -> ScepPayloadContent {
        ScepPayloadContent {
            url: self.scep_url.clone(),
            challenge: self.scep_challenge.clone(),
            keysize: 2048,
            key_type: "RSA".to_string(),
            key_usage: SCEP_KEY_USAGE,
            name: name.to_string(),
            subject: self.scep_subject.clone(),
        }
    }

    async fn make_enrollment_profile(&self) -> Result<Profile> {
        let mut profile = Profile::new();
        profile.payload_identifier = ENROLLMENT_PROFILE_ID.to_string();
        profile.payload_organization = "MicroMDM".to_string();
        profile.payload_display_name = "Enrollment Profile".to_string();
        profile.payload_description = "The server may alter your settings".to_string();
        profile.payload_scope = "System".to_string();

        let mut mdm_payload = Payload::new("com.apple.mdm");
        mdm_payload.payload_description = "Enrolls with the MDM server".to_string();
        mdm_payload.payload_organization = "MicroMDM".to_string();
        mdm_payload.payload_identifier = format!("{ENROLLMENT_PROFILE_ID}.mdm");
        mdm_payload.payload_scope = "System".to_string();

        let mut content = Vec::new();
        let mut identity_certificate_uuid = String::new();

        if !self.scep_url.is_empty() {
            let mut scep_payload = Payload::new("com.apple.security.scep");
            scep_payload.payload_description = "Configures SCEP".to_string();
            scep_payload.payload_display_name = "SCEP".to_string();
            scep_payload.payload_identifier = format!("{ENROLLMENT_PROFILE_ID}.scep");
            scep_payload.payload_organization = "MicroMDM".to_string();
            scep_payload.payload_scope = "System".to_string();
            scep_payload.payload_content = Some(
                plist::to_value(
                    &self.scep_payload_content("Device Management Identity Certificate"),
                )
                .map_err(|e| ServiceError::Internal(e.to_string()))?,
            );
            identity_certificate_uuid = scep_payload.payload_uuid.clone();
            content.push(
                plist::to_value(&scep_payload).map_err(|e| ServiceError::Internal(e.to_string()))?,
            );
        }

        let mdm_content = MdmPayloadContent {
            payload: mdm_payload,
            access_rights: ALL_ACCESS_RIGHTS,
            check_in_url: format!("{}/mdm/checkin", self.url),
            check_out_when_removed: true,
            server_url: format!("{}/mdm/connect", self.url),
            server_capabilities: vec![PER_USER_CONNECTIONS.to_string()],
            topic: self.topic.read().await.clone(),
            sign_message: true,
            identity_certificate_uuid,
        };
        content.push(
            plist::to_value(&mdm_content).map_err(|e| ServiceError::Internal(e.to_string()))?,
        );

        if !self.ca_cert_pem.is_empty() {
            let mut ca_payload = Payload::new("com.apple.security.root");
            ca_payload.payload_display_name = "Root certificate for MicroMDM".to_string();
            ca_payload.payload_description =
                "Installs the root CA certificate for MicroMDM".to_string();
            ca_payload.payload_identifier = format!("{ENROLLMENT_PROFILE_ID}.cert.ca");
            ca_payload.payload_content = Some(plist::Value::Data(self.ca_cert_pem.clone()));
            content.push(
                plist::to_value(&ca_payload).map_err(|e| ServiceError::Internal(e.to_string()))?,
            );
        }

        if !self.tls_cert_pem.is_empty() {
            let mut tls_payload = Payload::new("com.apple.security.pem");
            tls_payload.payload_display_name =
                "Self-signed TLS certificate for MicroMDM".to_string();
            tls_payload.payload_description =
                "Installs the TLS certificate for MicroMDM".to_string();
            tls_payload.payload_identifier = format!("{ENROLLMENT_PROFILE_ID}.cert.selfsigned");
            tls_payload.payload_content = Some(plist::Value::Data(self.tls_cert_pem.clone()));
            content.push(
                plist::to_value(&tls_payload).map_err(|e| ServiceError::Internal(e.to_string()))?,
            );
        }

        profile.payload_content = content;
        Ok(profile)
    }
}

/// Wait for the push certificate upload, then fill in the topic. The topic
/// never changes after that, so the task exits after the first update.
fn start_topic_updater(svc: Arc<EnrollService>, config: ConfigStore, bus: &PubSub) {
    let mut config_events = bus.subscribe("enroll-server-configs", topics::CONFIG_UPDATED);
    tokio::spawn(async move {
        while config_events.recv().await.is_some() {
            match config.push_topic().await {
                Ok(topic) => {
                    info!(topic, "enrollment topic configured");
                    *svc.topic.write().await = topic;
                    break;
                }
                Err(e) => warn!(error = %e, "get push topic"),
            }
        }
    });
}

fn parse_scep_subject(subject: &str) -> Result<Vec<Vec<Vec<String>>>> {
    let mut parsed = Vec::new();
    for element in subject.split('/') {
        if element.is_empty() {
            continue;
        }
        let (key, value) = element.split_once('=').ok_or_else(|| {
            ServiceError::BadRequest(format!("invalid SCEP subject element: {element}"))
        })?;
        parsed.push(vec![vec![key.to_string(), value.to_string()]]);
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_delimited_subject() {
        let subject =
            parse_scep_subject("/O=MicroMDM/CN=MicroMDM Identity (%ComputerName%)").unwrap();
        assert_eq!(
            subject,
            vec![
                vec![vec!["O".to_string(), "MicroMDM".to_string()]],
                vec![vec![
                    "CN".to_string(),
                    "MicroMDM Identity (%ComputerName%)".to_string()
                ]],
            ]
        );
    }

    #[test]
    fn rejects_malformed_subject() {
        assert!(parse_scep_subject("/O=MicroMDM/garbage").is_err());
    }
}
