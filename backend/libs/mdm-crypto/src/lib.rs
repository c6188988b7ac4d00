//! Certificate and CMS primitives for the MDM protocol.
//!
//! Devices sign their check-in and connect bodies with the identity they got
//! over SCEP; Apple signs DEP enrollment requests with the device CA; DEP
//! OAuth tokens arrive wrapped in an S/MIME envelope encrypted to a keypair
//! we generate. All of that lands here, on top of the RustCrypto stack.

mod envelope;
mod keypair;
mod signed;
mod topic;

pub use envelope::{decrypt_enveloped, unwrap_smime, unwrap_token_json};
pub use keypair::{self_signed_ca, self_signed_keypair, SelfSigned};
pub use signed::{verify_signed_data, VerifiedSignature};
pub use topic::topic_from_certificate;

use x509_cert::Certificate;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed DER structure: {0}")]
    Der(#[from] der::Error),

    #[error("RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key encoding error: {0}")]
    Pkcs(String),

    #[error("certificate build error: {0}")]
    Builder(String),

    #[error("signature verification failed: {0}")]
    Verification(String),

    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// Decimal rendering of a certificate serial number, as used for depot keys.
pub fn serial_decimal(cert: &Certificate) -> String {
    rsa::BigUint::from_bytes_be(cert.tbs_certificate.serial_number.as_bytes()).to_string()
}

/// The common name of the certificate subject, empty if absent.
pub fn subject_common_name(cert: &Certificate) -> String {
    name_common_name(&cert.tbs_certificate.subject)
}

/// The common name of the certificate issuer, empty if absent.
pub fn issuer_common_name(cert: &Certificate) -> String {
    name_common_name(&cert.tbs_certificate.issuer)
}

const OID_COMMON_NAME: const_oid::ObjectIdentifier =
    const_oid::ObjectIdentifier::new_unwrap("2.5.4.3");

fn name_common_name(name: &x509_cert::name::Name) -> String {
    for rdn in name.0.iter() {
        for attr in rdn.0.iter() {
            if attr.oid == OID_COMMON_NAME {
                if let Some(value) = topic::any_to_string(&attr.value) {
                    return value;
                }
            }
        }
    }
    String::new()
}

/// True when the presented certificate was issued by the Apple iPhone Device
/// CA, which signs DEP and OTA enrollment requests.
pub fn issued_by_apple_device_ca(cert: &Certificate) -> bool {
    issuer_common_name(cert) == "Apple iPhone Device CA"
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;

    #[test]
    fn serial_decimal_matches_generated_certificate() {
        let signed = self_signed_keypair("unit-test", 1).unwrap();
        let decimal = serial_decimal(&signed.certificate);
        assert!(!decimal.is_empty());
        assert!(decimal.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn subject_cn_roundtrips() {
        let signed = self_signed_keypair("depot-test", 1).unwrap();
        assert_eq!(subject_common_name(&signed.certificate), "depot-test");
        // self-signed: issuer == subject
        assert_eq!(issuer_common_name(&signed.certificate), "depot-test");
        assert!(!issued_by_apple_device_ca(&signed.certificate));
    }

    #[test]
    fn certificate_encodes_to_der() {
        let signed = self_signed_ca("MicroMDM", "US", 5).unwrap();
        let der = signed.certificate.to_der().unwrap();
        assert!(!der.is_empty());
    }
}
