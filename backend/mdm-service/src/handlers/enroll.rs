//! Enrollment and OTA enrollment endpoints.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use tracing::info;

use crate::error::ServiceError;
use crate::services::enroll::EnrollService;
use crate::store::scep_depot::ScepDepot;
use mdm_protocol::{DepEnrollmentRequest, OtaEnrollmentRequest};

const MOBILECONFIG_CONTENT_TYPE: &str = "application/x-apple-aspen-config";

fn mobileconfig(body: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(MOBILECONFIG_CONTENT_TYPE)
        .body(body)
}

/// GET /mdm/enroll — plain enrollment profile.
pub async fn get_enroll(
    service: web::Data<Arc<EnrollService>>,
) -> Result<HttpResponse, ServiceError> {
    Ok(mobileconfig(service.enroll_profile().await?))
}

/// POST /mdm/enroll — CMS-signed DEP enrollment request, verified against
/// the Apple Device CA, answered with the same enrollment profile.
pub async fn post_enroll(
    service: web::Data<Arc<EnrollService>>,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    let verified = mdm_crypto::verify_signed_data(&body, None)?;
    if !mdm_crypto::issued_by_apple_device_ca(&verified.signer) {
        return Err(ServiceError::Signature(
            "unauthorized enrollment client: not signed by Apple Device CA".to_string(),
        ));
    }
    let request: DepEnrollmentRequest = plist::from_bytes(&verified.content)
        .map_err(|e| ServiceError::BadRequest(format!("parse DEP enrollment request: {e}")))?;
    info!(udid = %request.udid, serial = %request.serial, "DEP enrollment request");
    Ok(mobileconfig(service.enroll_profile().await?))
}

/// GET /ota/enroll — phase 1 "Profile Service" payload.
pub async fn ota_enroll(
    service: web::Data<Arc<EnrollService>>,
) -> Result<HttpResponse, ServiceError> {
    Ok(mobileconfig(service.ota_enroll_payload().await?))
}

/// POST /ota/phase23 — phases 2 and 3 share a URL; the signer tells them
/// apart. Apple's device CA means the device is entering phase 2; a
/// certificate from our own CA means phase 3.
pub async fn ota_phase23(
    service: web::Data<Arc<EnrollService>>,
    depot: web::Data<ScepDepot>,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    let verified = mdm_crypto::verify_signed_data(&body, None)?;
    let request: OtaEnrollmentRequest = plist::from_bytes(&verified.content)
        .map_err(|e| ServiceError::BadRequest(format!("parse OTA request: {e}")))?;
    info!(udid = %request.udid, serial = %request.serial, "OTA enrollment request");

    if mdm_crypto::issued_by_apple_device_ca(&verified.signer) {
        return Ok(mobileconfig(service.ota_phase2_profile().await?));
    }

    let (_, ca) = depot.create_or_load_ca().await?;
    let local_signer = mdm_crypto::issuer_common_name(&verified.signer)
        == mdm_crypto::subject_common_name(&ca);
    if local_signer {
        return Ok(mobileconfig(service.ota_phase3_profile().await?));
    }
    Err(ServiceError::Unauthorized)
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mdm/enroll", web::get().to(get_enroll))
        .route("/mdm/enroll", web::post().to(post_enroll))
        .route("/ota/enroll", web::get().to(ota_enroll))
        .route("/ota/phase23", web::post().to(ota_phase23));
}
