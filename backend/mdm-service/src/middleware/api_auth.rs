//! HTTP Basic auth for the admin API routes.

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header;
use actix_web::{Error, HttpResponse};
use base64::Engine;
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;

/// Requires `Authorization: Basic` with the configured API token as the
/// password (the username is ignored, `micromdm` by convention).
pub struct ApiAuthMiddleware {
    token: Rc<String>,
}

impl ApiAuthMiddleware {
    pub fn new(token: &str) -> Self {
        Self {
            token: Rc::new(token.to_string()),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ApiAuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ApiAuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiAuthMiddlewareService {
            service: Rc::new(service),
            token: self.token.clone(),
        }))
    }
}

pub struct ApiAuthMiddlewareService<S> {
    service: Rc<S>,
    token: Rc<String>,
}

impl<S, B> Service<ServiceRequest> for ApiAuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let token = self.token.clone();

        Box::pin(async move {
            if basic_password(&req).as_deref() == Some(token.as_str()) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let response = HttpResponse::Unauthorized()
                .insert_header((
                    header::WWW_AUTHENTICATE,
                    "Basic realm=\"micromdm\"",
                ))
                .json(serde_json::json!({ "error": "you need to log in" }));
            Ok(req.into_response(response).map_into_right_body())
        })
    }
}

fn basic_password(req: &ServiceRequest) -> Option<String> {
    let header = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_user, password) = credentials.split_once(':')?;
    Some(password.to_string())
}
