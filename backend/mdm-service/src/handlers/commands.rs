//! Command creation endpoint.

use actix_web::{web, HttpResponse};

use crate::error::ServiceError;
use crate::services::command::CommandService;
use mdm_protocol::Command;

/// POST /v1/commands
///
/// Body: `{"udid": …, "request_type": …, <command fields>}`. Responds 201
/// with the payload that was queued.
pub async fn new_command(
    service: web::Data<CommandService>,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    let (udid, command) = Command::from_request_json(&body)?;
    let payload = service.new_command(&udid, command).await?;
    Ok(HttpResponse::Created().json(serde_json::json!({ "payload": payload })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/commands", web::post().to(new_command));
}
