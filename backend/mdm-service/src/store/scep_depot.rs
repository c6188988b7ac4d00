//! SCEP certificate depot: the MDM CA and the certificates it has issued.
//!
//! Issued certificates are stored keyed by `CN + "." + serial` so the
//! signature middleware can check, byte for byte, that a presented signer
//! certificate is one we issued.

use der::{Decode, Encode};
use kv_store::KvStore;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::RsaPrivateKey;
use tracing::info;
use x509_cert::Certificate;

use crate::error::{Result, ServiceError};

pub const SCEP_CERTIFICATE_BUCKET: &str = "scep_certificates";

const CA_CERTIFICATE_KEY: &[u8] = b"ca_certificate";
const CA_KEY_KEY: &[u8] = b"ca_key";

const CA_COMMON_NAME: &str = "MicroMDM";
const CA_COUNTRY: &str = "US";
const CA_YEARS: u32 = 5;

#[derive(Clone)]
pub struct ScepDepot {
    kv: KvStore,
}

impl ScepDepot {
    pub async fn new(kv: KvStore) -> Result<Self> {
        kv.create_bucket_if_not_exists(SCEP_CERTIFICATE_BUCKET).await?;
        Ok(Self { kv })
    }

    /// Load the depot CA, generating RSA-2048 key material and a 5-year
    /// self-signed certificate on first call.
    pub async fn create_or_load_ca(&self) -> Result<(RsaPrivateKey, Certificate)> {
        let key_bytes = self.kv.get(SCEP_CERTIFICATE_BUCKET, CA_KEY_KEY).await?;
        let cert_bytes = self.kv.get(SCEP_CERTIFICATE_BUCKET, CA_CERTIFICATE_KEY).await?;

        if let (Some(key_der), Some(cert_der)) = (key_bytes, cert_bytes) {
            let key = RsaPrivateKey::from_pkcs1_der(&key_der)
                .map_err(|e| ServiceError::Internal(format!("parse CA key: {e}")))?;
            let cert = Certificate::from_der(&cert_der)
                .map_err(|e| ServiceError::Internal(format!("parse CA certificate: {e}")))?;
            return Ok((key, cert));
        }

        let signed = mdm_crypto::self_signed_ca(CA_COMMON_NAME, CA_COUNTRY, CA_YEARS)
            .map_err(|e| ServiceError::Internal(format!("generate CA: {e}")))?;
        let key_der = signed
            .private_key
            .to_pkcs1_der()
            .map_err(|e| ServiceError::Internal(format!("encode CA key: {e}")))?;
        let cert_der = signed
            .certificate
            .to_der()
            .map_err(|e| ServiceError::Internal(format!("encode CA certificate: {e}")))?;

        let mut tx = self.kv.begin().await?;
        tx.put(SCEP_CERTIFICATE_BUCKET, CA_KEY_KEY, key_der.as_bytes()).await?;
        tx.put(SCEP_CERTIFICATE_BUCKET, CA_CERTIFICATE_KEY, &cert_der).await?;
        tx.commit().await?;
        info!("generated SCEP CA");

        Ok((signed.private_key, signed.certificate))
    }

    /// The CA certificate in PEM form, for the enrollment profile's root
    /// certificate payload.
    pub async fn ca_certificate_pem(&self) -> Result<Vec<u8>> {
        let (_, cert) = self.create_or_load_ca().await?;
        let der = cert
            .to_der()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(pem::encode(&pem::Pem::new("CERTIFICATE", der)).into_bytes())
    }

    /// Record a certificate issued to a device.
    pub async fn store_issued(&self, cert: &Certificate) -> Result<()> {
        let key = issued_key(cert);
        let der = cert
            .to_der()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        self.kv
            .put(SCEP_CERTIFICATE_BUCKET, key.as_bytes(), &der)
            .await?;
        Ok(())
    }

    /// True iff the depot holds a certificate under this CN+serial whose DER
    /// bytes exactly match the presented certificate.
    ///
    /// `_allow_time` and `_revoke_old` are accepted for interface parity;
    /// certificate revocation is not implemented.
    // TODO: implement revocation of superseded device certificates.
    pub async fn has_cn(
        &self,
        cert: &Certificate,
        _allow_time: i64,
        _revoke_old: bool,
    ) -> Result<bool> {
        let key = issued_key(cert);
        let Some(stored) = self.kv.get(SCEP_CERTIFICATE_BUCKET, key.as_bytes()).await? else {
            return Ok(false);
        };
        let presented = cert
            .to_der()
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        Ok(stored == presented)
    }
}

fn issued_key(cert: &Certificate) -> String {
    format!(
        "{}.{}",
        mdm_crypto::subject_common_name(cert),
        mdm_crypto::serial_decimal(cert)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn depot() -> (ScepDepot, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let kv = kv_store::KvStore::open(&dir.path().join("depot.db")).await.unwrap();
        (ScepDepot::new(kv).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn has_cn_matches_stored_der_exactly() {
        let (depot, _dir) = depot().await;
        let issued = mdm_crypto::self_signed_keypair("device-1", 1).unwrap();
        depot.store_issued(&issued.certificate).await.unwrap();

        assert!(depot.has_cn(&issued.certificate, 0, false).await.unwrap());

        // same CN, different certificate bytes
        let impostor = mdm_crypto::self_signed_keypair("device-1", 1).unwrap();
        assert!(!depot.has_cn(&impostor.certificate, 0, false).await.unwrap());
    }

    #[tokio::test]
    async fn ca_is_generated_once_and_reloaded() {
        let (depot, _dir) = depot().await;
        let (_, first) = depot.create_or_load_ca().await.unwrap();
        let (_, second) = depot.create_or_load_ca().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(mdm_crypto::subject_common_name(&first), "MicroMDM");
    }
}
