//! Server configuration store: push certificate, DEP tokens, DEP keypair.

use der::{Decode, Encode};
use event_bus::PubSub;
use kv_store::KvStore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use tracing::info;
use x509_cert::Certificate;

use crate::error::{Result, ServiceError};
use crate::models::codec::{decode_server_config, encode_server_config, ServerConfig};
use crate::models::events::topics;
use crate::models::DepToken;

pub const CONFIG_BUCKET: &str = "mdm.ServerConfig";
pub const DEP_TOKEN_BUCKET: &str = "mdm.DEPToken";

const CONFIG_KEY: &[u8] = b"config";
const DEP_KEY_KEY: &[u8] = b"key";
const DEP_CERTIFICATE_KEY: &[u8] = b"certificate";

/// The stored push certificate, decoded and ready to hand to the APNs layer.
pub struct PushCertificate {
    pub certificate: Certificate,
    pub cert_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

#[derive(Clone)]
pub struct ConfigStore {
    kv: KvStore,
    bus: PubSub,
}

impl ConfigStore {
    pub async fn new(kv: KvStore, bus: PubSub) -> Result<Self> {
        kv.create_bucket_if_not_exists(CONFIG_BUCKET).await?;
        kv.create_bucket_if_not_exists(DEP_TOKEN_BUCKET).await?;
        Ok(Self { kv, bus })
    }

    /// Persist the push certificate and key (PEM), then announce the config
    /// change so the push and enrollment services pick it up.
    pub async fn save_push_certificate(&self, cert_pem: &[u8], key_pem: &[u8]) -> Result<()> {
        // fail on garbage before persisting
        decode_push_certificate(cert_pem, key_pem)?;

        let config = ServerConfig {
            push_certificate: cert_pem.to_vec(),
            private_key: key_pem.to_vec(),
        };
        self.kv
            .put(CONFIG_BUCKET, CONFIG_KEY, &encode_server_config(&config))
            .await?;
        self.bus.publish(topics::CONFIG_UPDATED, b"updated");
        Ok(())
    }

    async fn server_config(&self) -> Result<ServerConfig> {
        let Some(raw) = self.kv.get(CONFIG_BUCKET, CONFIG_KEY).await? else {
            return Err(ServiceError::NotFound("server config".to_string()));
        };
        Ok(decode_server_config(&raw)?)
    }

    pub async fn push_certificate(&self) -> Result<PushCertificate> {
        let config = self.server_config().await?;
        decode_push_certificate(&config.push_certificate, &config.private_key)
    }

    /// The APNs topic from the push certificate subject.
    pub async fn push_topic(&self) -> Result<String> {
        let cert = self.push_certificate().await?;
        Ok(mdm_crypto::topic_from_certificate(&cert.certificate)
            .map_err(|e| ServiceError::Internal(e.to_string()))?)
    }

    /// Store a DEP token JSON blob keyed by consumer key and announce it so
    /// the sync loop can build a client.
    pub async fn add_token(&self, consumer_key: &str, json: &[u8]) -> Result<()> {
        self.kv
            .put(DEP_TOKEN_BUCKET, consumer_key.as_bytes(), json)
            .await?;
        info!(consumer_key, "stored DEP token");
        self.bus.publish(topics::TOKEN_ADDED, json);
        Ok(())
    }

    pub async fn dep_tokens(&self) -> Result<Vec<DepToken>> {
        let mut tokens = Vec::new();
        for (_, value) in self.kv.scan_prefix(DEP_TOKEN_BUCKET, b"CK_").await? {
            match serde_json::from_slice::<DepToken>(&value) {
                Ok(token) => tokens.push(token),
                // skip unreadable token blobs rather than failing the listing
                Err(_) => continue,
            }
        }
        Ok(tokens)
    }

    /// The keypair DEP token blobs are encrypted to, generated and persisted
    /// on first use.
    pub async fn dep_keypair(&self) -> Result<(RsaPrivateKey, Certificate)> {
        let key_bytes = self.kv.get(DEP_TOKEN_BUCKET, DEP_KEY_KEY).await?;
        let cert_bytes = self.kv.get(DEP_TOKEN_BUCKET, DEP_CERTIFICATE_KEY).await?;

        if let (Some(key_der), Some(cert_der)) = (key_bytes, cert_bytes) {
            let key = RsaPrivateKey::from_pkcs1_der(&key_der)
                .map_err(|e| ServiceError::Internal(format!("parse DEP key: {e}")))?;
            let cert = Certificate::from_der(&cert_der)
                .map_err(|e| ServiceError::Internal(format!("parse DEP certificate: {e}")))?;
            return Ok((key, cert));
        }

        let signed = mdm_crypto::self_signed_keypair("micromdm-dep-token", 365)
            .map_err(|e| ServiceError::Internal(format!("generate DEP keypair: {e}")))?;
        let key_der = signed
            .private_key
            .to_pkcs1_der()
            .map_err(|e| ServiceError::Internal(format!("encode DEP key: {e}")))?;
        let cert_der = signed
            .certificate
            .to_der()
            .map_err(|e| ServiceError::Internal(format!("encode DEP certificate: {e}")))?;

        let mut tx = self.kv.begin().await?;
        tx.put(DEP_TOKEN_BUCKET, DEP_KEY_KEY, key_der.as_bytes()).await?;
        tx.put(DEP_TOKEN_BUCKET, DEP_CERTIFICATE_KEY, &cert_der).await?;
        tx.commit().await?;
        info!("generated DEP token keypair");

        Ok((signed.private_key, signed.certificate))
    }
}

fn decode_push_certificate(cert_pem: &[u8], key_pem: &[u8]) -> Result<PushCertificate> {
    let cert_block = pem::parse(cert_pem)
        .map_err(|e| ServiceError::BadRequest(format!("decode push certificate PEM: {e}")))?;
    let certificate = Certificate::from_der(cert_block.contents())
        .map_err(|e| ServiceError::BadRequest(format!("parse push certificate: {e}")))?;

    let key_block = pem::parse(key_pem)
        .map_err(|e| ServiceError::BadRequest(format!("decode private key PEM: {e}")))?;
    let key_valid = match key_block.tag() {
        "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(key_block.contents()).is_ok(),
        _ => RsaPrivateKey::from_pkcs8_der(key_block.contents()).is_ok(),
    };
    if !key_valid {
        return Err(ServiceError::BadRequest(
            "parse push certificate key".to_string(),
        ));
    }

    Ok(PushCertificate {
        certificate,
        cert_pem: cert_pem.to_vec(),
        key_pem: key_pem.to_vec(),
    })
}
