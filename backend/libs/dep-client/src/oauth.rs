//! OAuth 1.0a request signing for the DEP session endpoint.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;

/// The four credentials from a DEP server token.
#[derive(Debug, Clone)]
pub struct OauthCredentials {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub access_token: String,
    pub access_secret: String,
}

/// Build the `Authorization: OAuth …` header value for `method url`.
pub fn authorization_header(creds: &OauthCredentials, method: &str, url: &str) -> String {
    let nonce = nonce();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string();
    header_with(creds, method, url, &nonce, &timestamp)
}

fn header_with(
    creds: &OauthCredentials,
    method: &str,
    url: &str,
    nonce: &str,
    timestamp: &str,
) -> String {
    // Parameters in the signature base string must be sorted by name.
    let params: Vec<(&str, &str)> = vec![
        ("oauth_consumer_key", creds.consumer_key.as_str()),
        ("oauth_nonce", nonce),
        ("oauth_signature_method", "HMAC-SHA1"),
        ("oauth_timestamp", timestamp),
        ("oauth_token", creds.access_token.as_str()),
        ("oauth_version", "1.0"),
    ];

    let normalized: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        encode(url),
        encode(&normalized)
    );
    let signing_key = format!(
        "{}&{}",
        encode(&creds.consumer_secret),
        encode(&creds.access_secret)
    );

    let mut mac = Hmac::<Sha1>::new_from_slice(signing_key.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(base_string.as_bytes());
    let signature = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    };

    let mut header = String::from("OAuth ");
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            header.push_str(", ");
        }
        header.push_str(&format!("{}=\"{}\"", k, encode(v)));
    }
    header.push_str(&format!(", oauth_signature=\"{}\"", encode(&signature)));
    header
}

fn encode(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

fn nonce() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| {
            let n: u8 = rng.gen_range(0..36);
            char::from_digit(u32::from(n), 36).unwrap_or('0')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> OauthCredentials {
        OauthCredentials {
            consumer_key: "CK_test".to_string(),
            consumer_secret: "CS_test".to_string(),
            access_token: "AT_test".to_string(),
            access_secret: "AS_test".to_string(),
        }
    }

    #[test]
    fn header_carries_all_oauth_parameters() {
        let header = authorization_header(&creds(), "GET", "https://mdmenrollment.apple.com/session");
        assert!(header.starts_with("OAuth "));
        for key in [
            "oauth_consumer_key=\"CK_test\"",
            "oauth_token=\"AT_test\"",
            "oauth_signature_method=\"HMAC-SHA1\"",
            "oauth_version=\"1.0\"",
            "oauth_signature=",
            "oauth_nonce=",
            "oauth_timestamp=",
        ] {
            assert!(header.contains(key), "missing {key} in {header}");
        }
    }

    #[test]
    fn signature_is_deterministic_for_fixed_nonce() {
        let a = header_with(&creds(), "GET", "https://example.org/session", "nonce1", "1700000000");
        let b = header_with(&creds(), "GET", "https://example.org/session", "nonce1", "1700000000");
        assert_eq!(a, b);
    }
}
