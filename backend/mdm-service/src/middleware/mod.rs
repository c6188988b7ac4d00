pub mod api_auth;
pub mod mdm_signature;

pub use api_auth::ApiAuthMiddleware;
pub use mdm_signature::verify_mdm_signature;
