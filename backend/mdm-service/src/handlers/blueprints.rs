//! Blueprint CRUD.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::Blueprint;
use crate::store::blueprints::BlueprintStore;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    name: String,
}

/// GET /v1/blueprints
pub async fn list_blueprints(
    store: web::Data<BlueprintStore>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    if !query.name.is_empty() {
        let blueprint = store.blueprint_by_name(&query.name).await?;
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "blueprints": [blueprint] })));
    }
    let blueprints = store.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "blueprints": blueprints })))
}

/// PUT /v1/blueprints — a missing UUID means a newly created blueprint.
pub async fn apply_blueprint(
    store: web::Data<BlueprintStore>,
    blueprint: web::Json<Blueprint>,
) -> Result<HttpResponse, ServiceError> {
    let mut blueprint = blueprint.into_inner();
    if blueprint.uuid.is_empty() {
        blueprint.uuid = Uuid::new_v4().to_string();
    }
    store.save(&blueprint).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "blueprint": blueprint })))
}

/// DELETE /v1/blueprints/{name}
pub async fn remove_blueprint(
    store: web::Data<BlueprintStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    store.delete(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/blueprints", web::get().to(list_blueprints))
        .route("/blueprints", web::put().to(apply_blueprint))
        .route("/blueprints/{name}", web::delete().to(remove_blueprint));
}
