//! APNs client wrapper for MDM wakeup pushes.
//!
//! An MDM push is not a user notification: the payload is `{"mdm": <push
//! magic>}` addressed to the device's push token under the topic baked into
//! the push certificate. The device reacts by polling the Connect endpoint.

use std::io::Cursor;

use a2::{ClientConfig, DefaultNotificationBuilder, Endpoint, NotificationBuilder, NotificationOptions, Priority};
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
    #[error("failed to initialize APNs client: {0}")]
    Init(String),

    #[error("invalid push token")]
    InvalidToken,

    #[error("push error: possibly expired or invalid APNs certificate: {0}")]
    BadCertificate(String),

    #[error("APNs send failed: {0}")]
    Send(String),

    #[error("invalid push payload: {0}")]
    Payload(String),
}

/// Trait the push service works against, so tests can supply a fake sender.
#[async_trait::async_trait]
pub trait MdmPusher: Send + Sync {
    /// Send a wakeup push; returns the `apns-id` Apple assigned.
    async fn push(&self, token: &str, push_magic: &str, topic: &str) -> Result<String, ApnsError>;
}

/// APNs provider backed by the a2 HTTP/2 client with certificate auth.
pub struct ApnsClient {
    client: a2::Client,
}

impl ApnsClient {
    /// Build a client from PKCS#12 bytes (`.p12` upload) and its password.
    pub fn from_pkcs12(p12: &[u8], password: &str) -> Result<Self, ApnsError> {
        let mut cursor = Cursor::new(p12);
        let client =
            a2::Client::certificate(&mut cursor, password, ClientConfig::new(Endpoint::Production))
                .map_err(|e| ApnsError::Init(e.to_string()))?;
        Ok(Self { client })
    }

    /// Build a client from PEM certificate and key bytes, the form the push
    /// certificate is stored in after upload through the API.
    pub fn from_pem_parts(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, ApnsError> {
        let client = a2::Client::certificate_parts(
            cert_pem,
            key_pem,
            ClientConfig::new(Endpoint::Production),
        )
        .map_err(|e| ApnsError::Init(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl MdmPusher for ApnsClient {
    async fn push(&self, token: &str, push_magic: &str, topic: &str) -> Result<String, ApnsError> {
        if !is_device_token_valid(token) {
            return Err(ApnsError::InvalidToken);
        }

        let options = NotificationOptions {
            apns_topic: Some(topic),
            apns_priority: Some(Priority::High),
            ..Default::default()
        };
        let mut payload = DefaultNotificationBuilder::new().build(token, options);
        payload
            .add_custom_data("mdm", &push_magic)
            .map_err(|e| ApnsError::Payload(e.to_string()))?;

        match self.client.send(payload).await {
            Ok(response) => {
                let apns_id = response.apns_id.unwrap_or_default();
                debug!(token = %&token[..8.min(token.len())], apns_id, "sent mdm push");
                Ok(apns_id)
            }
            Err(e) => {
                let message = e.to_string();
                error!(token = %&token[..8.min(token.len())], error = %message, "mdm push failed");
                if message.ends_with("internal error") {
                    // Apple terminates the TLS handshake this way when the
                    // push certificate is expired or otherwise unusable.
                    Err(ApnsError::BadCertificate(message))
                } else {
                    Err(ApnsError::Send(message))
                }
            }
        }
    }
}

/// An APNs device token is 32 bytes, hex encoded.
pub fn is_device_token_valid(token: &str) -> bool {
    matches!(hex::decode(token), Ok(raw) if raw.len() == 32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_device_token() {
        let token = "c0".repeat(32);
        assert!(is_device_token_valid(&token));
    }

    #[test]
    fn rejects_short_and_non_hex_tokens() {
        assert!(!is_device_token_valid("deadbeef"));
        assert!(!is_device_token_valid(&"zz".repeat(32)));
        assert!(!is_device_token_valid(""));
    }
}
