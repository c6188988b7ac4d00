//! App repository endpoints (enabled when a file repo path is configured).

use actix_web::{web, HttpResponse};
use base64::Engine;
use serde::Deserialize;

use crate::error::ServiceError;
use crate::store::apps::FileRepo;

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    name: String,
}

/// GET /v1/apps
pub async fn list_apps(
    repo: web::Data<FileRepo>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ServiceError> {
    let apps = repo.list_apps(&query.name).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "apps": apps })))
}

#[derive(Deserialize)]
pub struct UploadAppRequest {
    #[serde(default)]
    pub manifest_name: String,
    #[serde(default)]
    pub manifest: String,
    #[serde(default)]
    pub pkg_name: String,
    #[serde(default)]
    pub pkg: String,
}

/// PUT /v1/apps — upload a package and/or its appmanifest, base64 bodies.
pub async fn upload_app(
    repo: web::Data<FileRepo>,
    request: web::Json<UploadAppRequest>,
) -> Result<HttpResponse, ServiceError> {
    let engine = base64::engine::general_purpose::STANDARD;
    if !request.manifest_name.is_empty() {
        let manifest = engine
            .decode(request.manifest.as_bytes())
            .map_err(|e| ServiceError::BadRequest(format!("decode manifest: {e}")))?;
        repo.save_file(&request.manifest_name, &manifest).await?;
    }
    if !request.pkg_name.is_empty() {
        let pkg = engine
            .decode(request.pkg.as_bytes())
            .map_err(|e| ServiceError::BadRequest(format!("decode pkg: {e}")))?;
        repo.save_file(&request.pkg_name, &pkg).await?;
    }
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

/// GET /repo/{filename} — serve uploaded packages and manifests.
pub async fn serve_repo_file(
    repo: web::Data<FileRepo>,
    path: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let contents = repo.read_file(&path.into_inner()).await?;
    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(contents))
}

pub fn register_admin_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/apps", web::get().to(list_apps))
        .route("/apps", web::put().to(upload_app));
}

pub fn register_repo_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/repo/{filename}", web::get().to(serve_repo_file));
}
