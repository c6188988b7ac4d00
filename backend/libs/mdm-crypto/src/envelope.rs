//! DEP token S/MIME envelope handling.
//!
//! Apple delivers DEP server tokens as an S/MIME file: MIME headers, a
//! base64 CMS EnvelopedData encrypted to our DEP keypair, and inside that a
//! MIME-wrapped JSON document between BEGIN/END MESSAGE markers.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use cms::content_info::ContentInfo;
use cms::enveloped_data::{EnvelopedData, RecipientInfo};
use const_oid::ObjectIdentifier;
use der::asn1::OctetStringRef;
use der::Decode;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};

use crate::{CryptoError, Result};

const ID_ENVELOPED_DATA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.7.3");
const ID_DES_EDE3_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.3.7");
const ID_AES128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const ID_AES256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

/// Strip the S/MIME wrapper: skip the MIME header block, base64-decode the
/// body into raw CMS bytes.
pub fn unwrap_smime(smime: &[u8]) -> Result<Vec<u8>> {
    use base64::Engine;
    let text = String::from_utf8_lossy(smime);
    let body = match text.split_once("\r\n\r\n").or_else(|| text.split_once("\n\n")) {
        Some((_headers, body)) => body,
        None => return Err(CryptoError::Invalid("missing MIME header block".to_string())),
    };
    let compact: String = body.chars().filter(|c| !c.is_whitespace() && *c != '.').collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| CryptoError::Invalid(format!("invalid base64 body: {e}")))
}

/// Decrypt a CMS EnvelopedData blob with the DEP private key.
pub fn decrypt_enveloped(cms_der: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>> {
    let info = ContentInfo::from_der(cms_der)?;
    if info.content_type != ID_ENVELOPED_DATA {
        return Err(CryptoError::Invalid(format!(
            "not CMS EnvelopedData: {}",
            info.content_type
        )));
    }
    let enveloped: EnvelopedData = info.content.decode_as()?;

    let mut content_key: Option<Vec<u8>> = None;
    for recipient in enveloped.recip_infos.0.iter() {
        let RecipientInfo::Ktri(ktri) = recipient else {
            continue;
        };
        if let Ok(cek) = key.decrypt(Pkcs1v15Encrypt, ktri.enc_key.as_bytes()) {
            content_key = Some(cek);
            break;
        }
    }
    let content_key = content_key.ok_or_else(|| {
        CryptoError::Verification("no recipient decryptable with DEP keypair".to_string())
    })?;

    let encrypted = enveloped
        .encrypted_content
        .encrypted_content
        .as_ref()
        .ok_or_else(|| CryptoError::Invalid("missing encrypted content".to_string()))?
        .as_bytes();

    let alg = &enveloped.encrypted_content.content_enc_alg;
    let iv = alg
        .parameters
        .as_ref()
        .ok_or_else(|| CryptoError::Invalid("missing content cipher IV".to_string()))?
        .decode_as::<OctetStringRef>()?
        .as_bytes()
        .to_vec();

    let plaintext = match alg.oid {
        ID_DES_EDE3_CBC => cbc::Decryptor::<des::TdesEde3>::new_from_slices(&content_key, &iv)
            .map_err(|e| CryptoError::Invalid(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
            .map_err(|e| CryptoError::Verification(e.to_string()))?,
        ID_AES128_CBC => cbc::Decryptor::<aes::Aes128>::new_from_slices(&content_key, &iv)
            .map_err(|e| CryptoError::Invalid(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
            .map_err(|e| CryptoError::Verification(e.to_string()))?,
        ID_AES256_CBC => cbc::Decryptor::<aes::Aes256>::new_from_slices(&content_key, &iv)
            .map_err(|e| CryptoError::Invalid(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(encrypted)
            .map_err(|e| CryptoError::Verification(e.to_string()))?,
        other => {
            return Err(CryptoError::Invalid(format!(
                "unsupported content cipher {other}"
            )))
        }
    };
    Ok(plaintext)
}

/// Strip the inner MIME headers and BEGIN/END MESSAGE framing around the DEP
/// token JSON.
pub fn unwrap_token_json(wrapped: &[u8]) -> Result<Vec<u8>> {
    let text = String::from_utf8_lossy(wrapped);
    let body = match text.split_once("\r\n\r\n").or_else(|| text.split_once("\n\n")) {
        Some((_headers, body)) => body,
        None => text.as_ref(),
    };
    let mut json = String::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("-----BEGIN") || line.starts_with("-----END") {
            continue;
        }
        json.push_str(line);
    }
    if json.is_empty() {
        return Err(CryptoError::Invalid("empty DEP token body".to_string()));
    }
    Ok(json.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_smime_base64_body() {
        let smime = b"Content-Type: application/pkcs7-mime\r\nContent-Transfer-Encoding: base64\r\n\r\naGVsbG8=\r\n";
        assert_eq!(unwrap_smime(smime).unwrap(), b"hello");
    }

    #[test]
    fn unwraps_token_json_framing() {
        let wrapped = b"Content-Type: text/plain\r\n\r\n-----BEGIN MESSAGE-----\r\n{\"consumer_key\":\"CK_1\"}\r\n-----END MESSAGE-----\r\n";
        assert_eq!(unwrap_token_json(wrapped).unwrap(), br#"{"consumer_key":"CK_1"}"#);
    }

    #[test]
    fn rejects_headerless_smime() {
        assert!(unwrap_smime(b"no headers here").is_err());
    }
}
