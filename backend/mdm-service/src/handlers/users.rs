//! Device-user admin endpoints.

use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::User;
use crate::store::users::UserStore;

/// GET /v1/users
pub async fn list_users(store: web::Data<UserStore>) -> Result<HttpResponse, ServiceError> {
    let users = store.list().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "users": users })))
}

/// PUT /v1/users — create (empty UUID) or update a user record.
pub async fn apply_user(
    store: web::Data<UserStore>,
    user: web::Json<User>,
) -> Result<HttpResponse, ServiceError> {
    let mut user = user.into_inner();
    if user.uuid.is_empty() {
        user.uuid = Uuid::new_v4().to_string();
    } else {
        // updating an existing record; make sure it exists
        store.user(&user.uuid).await?;
    }
    store.save(&user).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user": user })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/users", web::get().to(list_users))
        .route("/users", web::put().to(apply_user));
}
