//! CMS signature check for the device-facing check-in and connect endpoints.
//!
//! Devices send a detached CMS signature over the HTTP body in the
//! `Mdm-Signature` header, signed with the SCEP-issued identity. Every
//! failure maps to 400: responding 401 would make devices silently
//! unenroll.

use actix_web::HttpRequest;
use base64::Engine;
use tracing::warn;

use crate::error::ServiceError;
use crate::store::scep_depot::ScepDepot;

pub const SIGNATURE_HEADER: &str = "Mdm-Signature";

/// Verify the request signature and that the signer is a certificate this
/// server issued. Called by the check-in and connect handlers before the
/// body is parsed.
pub async fn verify_mdm_signature(
    depot: &ScepDepot,
    request: &HttpRequest,
    body: &[u8],
) -> Result<(), ServiceError> {
    let header = request
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ServiceError::Signature("Signature missing".to_string()))?;

    let signature = base64::engine::general_purpose::STANDARD
        .decode(header.trim())
        .map_err(|_| ServiceError::Signature("Signature decoding error".to_string()))?;

    let verified = mdm_crypto::verify_signed_data(&signature, Some(body))
        .map_err(|_| ServiceError::Signature("Signature verification error".to_string()))?;

    let known = depot.has_cn(&verified.signer, 0, false).await.map_err(|e| {
        warn!(error = %e, "signer lookup failed");
        ServiceError::Signature("Unable to validate signature".to_string())
    })?;
    if !known {
        warn!(
            cn = %mdm_crypto::subject_common_name(&verified.signer),
            "unauthorized client signature"
        );
        return Err(ServiceError::Signature("Unauthorized".to_string()));
    }
    Ok(())
}
