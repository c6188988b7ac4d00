//! DEP token management and DEP API passthrough.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use base64::Engine;
use der::Encode;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::models::DepToken;
use crate::services::dep_sync::DepSyncer;
use crate::store::config::ConfigStore;

/// GET /v1/dep-tokens — stored tokens plus the public certificate Apple
/// should encrypt new tokens to.
pub async fn get_dep_tokens(
    config: web::Data<ConfigStore>,
) -> Result<HttpResponse, ServiceError> {
    let tokens = config.dep_tokens().await?;
    let (_, certificate) = config.dep_keypair().await?;
    let der = certificate
        .to_der()
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    let public_key_pem = pem::encode(&pem::Pem::new("CERTIFICATE", der));
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "dep_tokens": tokens,
        "public_certificate": public_key_pem,
    })))
}

#[derive(Deserialize)]
pub struct ApplyDepTokenRequest {
    /// The `.p7m` S/MIME blob downloaded from the DEP portal, base64.
    pub p7m_content: String,
}

/// PUT /v1/dep-tokens — decrypt the token blob with the DEP keypair and
/// store the OAuth credentials inside.
pub async fn apply_dep_token(
    config: web::Data<ConfigStore>,
    request: web::Json<ApplyDepTokenRequest>,
) -> Result<HttpResponse, ServiceError> {
    let p7m = base64::engine::general_purpose::STANDARD
        .decode(request.p7m_content.as_bytes())
        .map_err(|e| ServiceError::BadRequest(format!("decode p7m content: {e}")))?;

    let unwrapped = mdm_crypto::unwrap_smime(&p7m)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    let (key, _) = config.dep_keypair().await?;
    let decrypted = mdm_crypto::decrypt_enveloped(&unwrapped, &key)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
    let token_json = mdm_crypto::unwrap_token_json(&decrypted)
        .map_err(|e| ServiceError::BadRequest(e.to_string()))?;

    let token: DepToken = serde_json::from_slice(&token_json)
        .map_err(|e| ServiceError::BadRequest(format!("parse DEP token: {e}")))?;
    config.add_token(&token.consumer_key, &token_json).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

async fn active_client(syncer: &DepSyncer) -> Result<Arc<dep_client::DepClient>, ServiceError> {
    syncer
        .client()
        .await
        .ok_or_else(|| ServiceError::BadRequest("no DEP token configured".to_string()))
}

/// GET /v1/dep/account
pub async fn dep_account(
    syncer: web::Data<Arc<DepSyncer>>,
) -> Result<HttpResponse, ServiceError> {
    let client = active_client(&syncer).await?;
    let account = client
        .account()
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().json(account))
}

#[derive(Deserialize)]
pub struct DeviceDetailsRequest {
    pub serials: Vec<String>,
}

/// POST /v1/dep/devices
pub async fn dep_device_details(
    syncer: web::Data<Arc<DepSyncer>>,
    request: web::Json<DeviceDetailsRequest>,
) -> Result<HttpResponse, ServiceError> {
    let client = active_client(&syncer).await?;
    let details = client
        .device_details(&request.serials)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().json(details))
}

#[derive(Deserialize)]
pub struct FetchProfileQuery {
    #[serde(default)]
    pub uuid: String,
}

/// GET /v1/dep/profiles?uuid=…
pub async fn dep_fetch_profile(
    syncer: web::Data<Arc<DepSyncer>>,
    query: web::Query<FetchProfileQuery>,
) -> Result<HttpResponse, ServiceError> {
    let client = active_client(&syncer).await?;
    let profile = client
        .fetch_profile(&query.uuid)
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().json(profile))
}

/// PUT /v1/dep/profiles — define an enrollment profile with Apple.
pub async fn dep_define_profile(
    syncer: web::Data<Arc<DepSyncer>>,
    profile: web::Json<serde_json::Value>,
) -> Result<HttpResponse, ServiceError> {
    let client = active_client(&syncer).await?;
    let response = client
        .define_profile(profile.into_inner())
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;
    Ok(HttpResponse::Ok().json(response))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/dep-tokens", web::get().to(get_dep_tokens))
        .route("/dep-tokens", web::put().to(apply_dep_token))
        .route("/dep/account", web::get().to(dep_account))
        .route("/dep/devices", web::post().to(dep_device_details))
        .route("/dep/profiles", web::get().to(dep_fetch_profile))
        .route("/dep/profiles", web::put().to(dep_define_profile));
}
