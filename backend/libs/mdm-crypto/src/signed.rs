//! CMS SignedData verification.

use cms::cert::CertificateChoices;
use cms::content_info::ContentInfo;
use cms::signed_data::{SignedData, SignerIdentifier, SignerInfo};
use const_oid::ObjectIdentifier;
use der::asn1::OctetStringRef;
use der::{Decode, Encode};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use signature::Verifier;
use x509_cert::Certificate;

use crate::{CryptoError, Result};

const ID_SIGNED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.2");
const ID_MESSAGE_DIGEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.4");
const ID_SHA1: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.14.3.2.26");
const ID_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.2.1");

/// Result of a successful SignedData verification.
#[derive(Debug)]
pub struct VerifiedSignature {
    /// The single certificate whose key produced the signature.
    pub signer: Certificate,
    /// The signed content: the embedded econtent, or the detached body the
    /// caller supplied.
    pub content: Vec<u8>,
}

/// Parse a DER CMS blob and verify its signature.
///
/// `detached_content` supplies the body for detached signatures (the MDM
/// check-in/connect case: the signature covers the HTTP body). The structure
/// must contain exactly one signer whose certificate is included, per the MDM
/// protocol.
pub fn verify_signed_data(
    cms_der: &[u8],
    detached_content: Option<&[u8]>,
) -> Result<VerifiedSignature> {
    let info = ContentInfo::from_der(cms_der)?;
    if info.content_type != ID_SIGNED_DATA {
        return Err(CryptoError::Invalid(format!(
            "not CMS SignedData: {}",
            info.content_type
        )));
    }
    let signed: SignedData = info.content.decode_as()?;

    let content: Vec<u8> = match (&signed.encap_content_info.econtent, detached_content) {
        (Some(econtent), _) => econtent.decode_as::<OctetStringRef>()?.as_bytes().to_vec(),
        (None, Some(body)) => body.to_vec(),
        (None, None) => {
            return Err(CryptoError::Invalid(
                "detached signature without content".to_string(),
            ))
        }
    };

    let mut signers = signed.signer_infos.0.iter();
    let (Some(signer_info), None) = (signers.next(), signers.next()) else {
        return Err(CryptoError::Verification(
            "expected exactly one signer".to_string(),
        ));
    };

    let signer = find_signer_certificate(&signed, signer_info)?;
    verify_signer(signer_info, &signer, &content)?;

    Ok(VerifiedSignature {
        signer,
        content,
    })
}

fn find_signer_certificate(signed: &SignedData, signer_info: &SignerInfo) -> Result<Certificate> {
    let certificates = signed
        .certificates
        .as_ref()
        .ok_or_else(|| CryptoError::Verification("no certificates in SignedData".to_string()))?;

    let SignerIdentifier::IssuerAndSerialNumber(ref isn) = signer_info.sid else {
        return Err(CryptoError::Verification(
            "unsupported signer identifier".to_string(),
        ));
    };

    for choice in certificates.0.iter() {
        let CertificateChoices::Certificate(cert) = choice else {
            continue;
        };
        if cert.tbs_certificate.issuer == isn.issuer
            && cert.tbs_certificate.serial_number == isn.serial_number
        {
            return Ok(cert.clone());
        }
    }
    Err(CryptoError::Verification(
        "signer certificate not present".to_string(),
    ))
}

fn verify_signer(signer_info: &SignerInfo, signer: &Certificate, content: &[u8]) -> Result<()> {
    let digest_oid = signer_info.digest_alg.oid;
    let signature_bytes = signer_info.signature.as_bytes();
    let signature = Signature::try_from(signature_bytes)
        .map_err(|e| CryptoError::Verification(e.to_string()))?;

    let spki_der = signer
        .tbs_certificate
        .subject_public_key_info
        .to_der()?;
    let public_key = RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| CryptoError::Pkcs(e.to_string()))?;

    // When signed attributes are present the signature covers their DER
    // SET OF encoding and the messageDigest attribute must match the content.
    let signed_message: Vec<u8> = match &signer_info.signed_attrs {
        Some(attrs) => {
            let digest: Vec<u8> = match digest_oid {
                ID_SHA1 => Sha1::digest(content).to_vec(),
                ID_SHA256 => Sha256::digest(content).to_vec(),
                other => {
                    return Err(CryptoError::Verification(format!(
                        "unsupported digest algorithm {other}"
                    )))
                }
            };
            let expected = attrs
                .iter()
                .find(|attr| attr.oid == ID_MESSAGE_DIGEST)
                .and_then(|attr| attr.values.iter().next())
                .ok_or_else(|| {
                    CryptoError::Verification("missing messageDigest attribute".to_string())
                })?
                .decode_as::<OctetStringRef>()?;
            if expected.as_bytes() != digest.as_slice() {
                return Err(CryptoError::Verification(
                    "message digest mismatch".to_string(),
                ));
            }
            attrs.to_der()?
        }
        None => content.to_vec(),
    };

    let verified = match digest_oid {
        ID_SHA1 => VerifyingKey::<Sha1>::new(public_key)
            .verify(&signed_message, &signature)
            .is_ok(),
        ID_SHA256 => VerifyingKey::<Sha256>::new(public_key)
            .verify(&signed_message, &signature)
            .is_ok(),
        other => {
            return Err(CryptoError::Verification(format!(
                "unsupported digest algorithm {other}"
            )))
        }
    };
    if !verified {
        return Err(CryptoError::Verification("signature mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_cms_input() {
        assert!(verify_signed_data(b"junk", Some(b"body")).is_err());
    }

    #[test]
    fn rejects_wrong_content_type() {
        // CMS `data` ContentInfo instead of SignedData.
        let data_oid = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.1");
        let info = ContentInfo {
            content_type: data_oid,
            content: der::Any::from(der::asn1::OctetStringRef::new(b"abc").unwrap()),
        };
        let der = info.to_der().unwrap();
        let err = verify_signed_data(&der, Some(b"body")).unwrap_err();
        assert!(err.to_string().contains("not CMS SignedData"));
    }
}
