//! SCEP endpoint. The wire protocol is delegated to a pluggable handler;
//! the core owns only the depot (CA + issued certificates).

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::ServiceError;

/// A SCEP message processor. `operation` is the `operation` query parameter
/// (GetCACert, GetCACaps, PKIOperation); `message` is the decoded request
/// message for PKIOperation, empty otherwise.
#[async_trait::async_trait]
pub trait ScepHandler: Send + Sync {
    async fn handle(&self, operation: &str, message: &[u8]) -> Result<ScepReply, ServiceError>;
}

pub struct ScepReply {
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

#[derive(Clone)]
pub struct ScepState {
    pub handler: Option<Arc<dyn ScepHandler>>,
}

#[derive(Deserialize)]
pub struct ScepQuery {
    #[serde(default)]
    operation: String,
    #[serde(default)]
    message: String,
}

pub async fn scep_get(
    state: web::Data<ScepState>,
    query: web::Query<ScepQuery>,
) -> Result<HttpResponse, ServiceError> {
    dispatch(&state, &query.operation, query.message.as_bytes()).await
}

pub async fn scep_post(
    state: web::Data<ScepState>,
    query: web::Query<ScepQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, ServiceError> {
    dispatch(&state, &query.operation, &body).await
}

async fn dispatch(
    state: &ScepState,
    operation: &str,
    message: &[u8],
) -> Result<HttpResponse, ServiceError> {
    let Some(handler) = &state.handler else {
        return Err(ServiceError::Internal("SCEP service not configured".to_string()));
    };
    let reply = handler.handle(operation, message).await?;
    Ok(HttpResponse::Ok()
        .content_type(reply.content_type)
        .body(reply.body))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/scep", web::get().to(scep_get))
        .route("/scep", web::post().to(scep_post));
}
