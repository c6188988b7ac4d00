//! Device listing and block/unblock.

use actix_web::{web, HttpResponse};

use crate::error::ServiceError;
use crate::store::block::BlockStore;
use crate::store::devices::DeviceStore;

/// GET /v1/devices
pub async fn list_devices(store: web::Data<DeviceStore>) -> Result<HttpResponse, ServiceError> {
    let devices = store.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "devices": devices })))
}

/// POST /v1/devices/{udid}/block
pub async fn block_device(
    store: web::Data<BlockStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    store.block(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

/// POST /v1/devices/{udid}/unblock
pub async fn unblock_device(
    store: web::Data<BlockStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    store.unblock(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/devices", web::get().to(list_devices))
        .route("/devices/{udid}/block", web::post().to(block_device))
        .route("/devices/{udid}/unblock", web::post().to(unblock_device));
}
