//! Manual push trigger.

use std::sync::Arc;

use actix_web::{web, HttpResponse};

use crate::error::ServiceError;
use crate::services::push::PushService;

/// POST /push/{udid} and /v1/push/{udid}
pub async fn push(
    service: web::Data<Arc<PushService>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let udid = path.into_inner();
    match service.push(&udid).await {
        Ok(id) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "success",
            "push_notification_id": id,
        }))),
        Err(e) => Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "failure",
            "error": e.to_string(),
        }))),
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/push/{udid}", web::post().to(push));
}
