//! Service error type and its HTTP mapping.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    // Device endpoints return 400 on signature failures; a 401 would make
    // devices silently unenroll.
    Signature(String),

    #[error("you need to log in")]
    Unauthorized,

    #[error("checkout forced by device block")]
    Checkout,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] kv_store::KvError),

    #[error(transparent)]
    Protocol(#[from] mdm_protocol::ProtocolError),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl From<crate::models::codec::DecodeError> for ServiceError {
    fn from(e: crate::models::codec::DecodeError) -> Self {
        ServiceError::Internal(e.to_string())
    }
}

impl From<mdm_crypto::CryptoError> for ServiceError {
    fn from(e: mdm_crypto::CryptoError) -> Self {
        ServiceError::Signature(e.to_string())
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) | ServiceError::Signature(_) | ServiceError::Protocol(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::Unauthorized | ServiceError::Checkout => StatusCode::UNAUTHORIZED,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Database(_) | ServiceError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }
}

impl actix_web::ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            // Forced checkout: a bare 401 tells the device to re-enroll.
            ServiceError::Checkout => HttpResponse::Unauthorized().finish(),
            // Device-facing protocol errors are plain text.
            ServiceError::Signature(message) => {
                HttpResponse::BadRequest().body(message.clone())
            }
            other => HttpResponse::build(other.status_code())
                .json(json!({ "error": other.to_string() })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            ServiceError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Signature("Signature missing".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ServiceError::Checkout.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ServiceError::NotFound("device".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
