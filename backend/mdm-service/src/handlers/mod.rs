//! HTTP route handlers. Each module exposes `register_routes` in the Nova
//! service convention; device-facing and admin-facing routes are registered
//! separately so the admin scope can carry the auth middleware.

pub mod apps;
pub mod blueprints;
pub mod checkin;
pub mod commands;
pub mod config;
pub mod connect;
pub mod dep;
pub mod devices;
pub mod enroll;
pub mod profiles;
pub mod push;
pub mod scep;
pub mod users;

use actix_web::{web, HttpResponse};

const HOME_PAGE: &str = r#"<!doctype html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>MicroMDM</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, sans-serif;
        }
    </style>
</head>
<body>
    <h3>Welcome to MicroMDM!</h3>
    <p><a href="mdm/enroll">Enroll a device</a></p>
</body>
</html>
"#;

pub async fn home() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(HOME_PAGE)
}

pub async fn version() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

pub fn register_root(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(home))
        .route("/version", web::get().to(version));
}
