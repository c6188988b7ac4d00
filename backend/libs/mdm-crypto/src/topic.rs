//! APNs push topic extraction.

use const_oid::ObjectIdentifier;
use der::asn1::{Ia5StringRef, PrintableStringRef, Utf8StringRef};
use der::Any;
use x509_cert::Certificate;

use crate::{CryptoError, Result};

// userID attribute (RFC 4519 `uid`); Apple stores the push topic there.
const OID_USER_ID: ObjectIdentifier = ObjectIdentifier::new_unwrap("0.9.2342.19200300.100.1.1");

const TOPIC_PREFIX: &str = "com.apple.mgmt";

/// Extract the MDM push topic from an APNs push certificate: the UID
/// attribute of the subject, which must begin with `com.apple.mgmt`.
pub fn topic_from_certificate(certificate: &Certificate) -> Result<String> {
    for rdn in certificate.tbs_certificate.subject.0.iter() {
        for attr in rdn.0.iter() {
            if attr.oid != OID_USER_ID {
                continue;
            }
            let Some(uid) = any_to_string(&attr.value) else {
                continue;
            };
            if uid.starts_with(TOPIC_PREFIX) {
                return Ok(uid);
            }
            return Err(CryptoError::Invalid(format!(
                "invalid Push Topic (UserID OID) in certificate. Must start with '{TOPIC_PREFIX}', was: {uid}"
            )));
        }
    }
    Err(CryptoError::Invalid(
        "could not find Push Topic (UserID OID) in certificate".to_string(),
    ))
}

pub(crate) fn any_to_string(value: &Any) -> Option<String> {
    if let Ok(s) = value.decode_as::<Utf8StringRef>() {
        return Some(s.to_string());
    }
    if let Ok(s) = value.decode_as::<PrintableStringRef>() {
        return Some(s.to_string());
    }
    if let Ok(s) = value.decode_as::<Ia5StringRef>() {
        return Some(s.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::self_signed_keypair;

    #[test]
    fn certificate_without_uid_has_no_topic() {
        let signed = self_signed_keypair("plain-cn", 1).unwrap();
        let err = topic_from_certificate(&signed.certificate).unwrap_err();
        assert!(err.to_string().contains("could not find Push Topic"));
    }
}
