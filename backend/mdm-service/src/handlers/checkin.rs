//! Device check-in endpoint.

use actix_web::{web, HttpRequest, HttpResponse};

use crate::error::ServiceError;
use crate::middleware::verify_mdm_signature;
use crate::services::checkin::CheckinService;
use crate::store::scep_depot::ScepDepot;
use mdm_protocol::CheckinMessage;

/// PUT /mdm/checkin
pub async fn checkin(
    service: web::Data<CheckinService>,
    depot: web::Data<ScepDepot>,
    request: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    verify_mdm_signature(&depot, &request, &body).await?;

    let message = CheckinMessage::parse(&body)?;
    match &message {
        CheckinMessage::Authenticate { .. } => service.authenticate(&message, &body).await?,
        CheckinMessage::TokenUpdate { .. } => service.token_update(&message, &body).await?,
        CheckinMessage::CheckOut { .. } => service.check_out(&message, &body).await?,
    }
    Ok(HttpResponse::Ok().finish())
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/mdm/checkin", web::put().to(checkin));
}
