//! Self-signed RSA keypair generation.

use std::str::FromStr;

use der::Decode;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::RsaPrivateKey;
use sha2::Sha256;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::{CryptoError, Result};

const RSA_BITS: usize = 2048;

/// A freshly generated private key with its self-signed certificate.
pub struct SelfSigned {
    pub private_key: RsaPrivateKey,
    pub certificate: Certificate,
}

/// RSA-2048 CA certificate, e.g. `CN=MicroMDM, C=US` valid for 5 years.
pub fn self_signed_ca(common_name: &str, country: &str, years: u32) -> Result<SelfSigned> {
    let subject = format!("CN={common_name},C={country}");
    generate(&subject, u64::from(years) * 365, Profile::Root)
}

/// RSA-2048 self-signed end-entity certificate (DEP token keypair, TLS
/// bootstrap certs).
pub fn self_signed_keypair(common_name: &str, days: u64) -> Result<SelfSigned> {
    let subject = format!("CN={common_name}");
    let issuer =
        Name::from_str(&subject).map_err(|e| CryptoError::Builder(e.to_string()))?;
    generate(
        &subject,
        days,
        Profile::Leaf {
            issuer,
            enable_key_agreement: false,
            enable_key_encipherment: true,
        },
    )
}

fn generate(subject: &str, days: u64, profile: Profile) -> Result<SelfSigned> {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)?;
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());

    let serial = random_serial()?;
    let validity = Validity::from_now(std::time::Duration::from_secs(days * 24 * 60 * 60))
        .map_err(|e| CryptoError::Builder(e.to_string()))?;
    let subject = Name::from_str(subject).map_err(|e| CryptoError::Builder(e.to_string()))?;
    let spki_der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| CryptoError::Pkcs(e.to_string()))?;
    let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())?;

    let builder = CertificateBuilder::new(profile, serial, validity, subject, spki, &signing_key)
        .map_err(|e| CryptoError::Builder(e.to_string()))?;
    let certificate = builder
        .build::<rsa::pkcs1v15::Signature>()
        .map_err(|e| CryptoError::Builder(e.to_string()))?;

    Ok(SelfSigned {
        private_key,
        certificate,
    })
}

// 127-bit random serial: top byte forced into 0x40..0x7f so the INTEGER is
// positive with no leading zero octets.
fn random_serial() -> Result<SerialNumber> {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x3f) | 0x40;
    Ok(SerialNumber::new(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Encode;

    #[test]
    fn generated_ca_is_self_issued() {
        let signed = self_signed_ca("MicroMDM", "US", 5).unwrap();
        let tbs = &signed.certificate.tbs_certificate;
        assert_eq!(tbs.subject, tbs.issuer);
    }

    #[test]
    fn keypair_matches_certificate_spki() {
        let signed = self_signed_keypair("micromdm-dep-token", 365).unwrap();
        let cert_spki = signed
            .certificate
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .unwrap();
        let key_spki = signed
            .private_key
            .to_public_key()
            .to_public_key_der()
            .unwrap();
        assert_eq!(cert_spki, key_spki.as_bytes());
    }
}
