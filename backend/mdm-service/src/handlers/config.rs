//! Server configuration endpoints.

use actix_web::{web, HttpResponse};
use base64::Engine;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::store::config::ConfigStore;

#[derive(Deserialize)]
pub struct SavePushCertificateRequest {
    /// PEM certificate, base64-wrapped for JSON transport.
    pub cert: String,
    /// PEM private key, base64-wrapped for JSON transport.
    pub private_key: String,
}

/// PUT /v1/config/certificate
pub async fn save_push_certificate(
    config: web::Data<ConfigStore>,
    request: web::Json<SavePushCertificateRequest>,
) -> Result<HttpResponse, ServiceError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let cert = engine
        .decode(request.cert.as_bytes())
        .map_err(|e| ServiceError::BadRequest(format!("decode certificate: {e}")))?;
    let key = engine
        .decode(request.private_key.as_bytes())
        .map_err(|e| ServiceError::BadRequest(format!("decode private key: {e}")))?;
    config.save_push_certificate(&cert, &key).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/config/certificate", web::put().to(save_push_certificate));
}
