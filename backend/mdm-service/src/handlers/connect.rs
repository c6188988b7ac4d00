//! Device connect (command delivery) endpoint.

use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServiceError;
use crate::middleware::verify_mdm_signature;
use crate::services::connect::ConnectService;
use crate::store::scep_depot::ScepDepot;
use mdm_protocol::ConnectResponse;

/// PUT /mdm/connect
///
/// 200 with the next command's plist, 200 with an empty body when the queue
/// has nothing to send, 401 when the device is blocked.
pub async fn connect(
    service: web::Data<ConnectService>,
    depot: web::Data<ScepDepot>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    verify_mdm_signature(&depot, &request, &body).await?;

    let response = ConnectResponse::parse(&body)?;
    match service.acknowledge(&response, &body).await? {
        Some(payload) => Ok(HttpResponse::Ok()
            .content_type("application/xml; charset=utf-8")
            .body(payload)),
        None => Ok(HttpResponse::Ok().finish()),
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mdm/connect", web::put().to(connect));
}
