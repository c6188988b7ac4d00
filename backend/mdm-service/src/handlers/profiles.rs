//! Profile CRUD.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::error::ServiceError;
use crate::models::Profile;
use crate::store::profiles::ProfileStore;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    id: String,
}

/// GET /v1/profiles
pub async fn list_profiles(
    store: web::Data<ProfileStore>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    if !query.id.is_empty() {
        let profile = store.profile_by_id(&query.id).await?;
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "profiles": [profile] })));
    }
    let profiles = store.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "profiles": profiles })))
}

/// PUT /v1/profiles
pub async fn apply_profile(
    store: web::Data<ProfileStore>,
    profile: web::Json<Profile>,
) -> Result<HttpResponse, ServiceError> {
    store.save(&profile).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

/// DELETE /v1/profiles/{identifier}
pub async fn remove_profile(
    store: web::Data<ProfileStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    store.delete(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/profiles", web::get().to(list_profiles))
        .route("/profiles", web::put().to(apply_profile))
        .route("/profiles/{identifier}", web::delete().to(remove_profile));
}
