//! Environment configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// Public HTTPS URL of this server (required).
    pub server_url: String,
    /// API token for the admin routes; admin API is disabled when unset.
    pub api_key: Option<String>,
    /// Directory for the database and generated key material.
    pub config_path: PathBuf,
    pub database_path: PathBuf,
    pub http_port: u16,
    pub apns_certificate_path: Option<PathBuf>,
    pub apns_private_key_path: Option<PathBuf>,
    pub apns_certificate_password: String,
    pub command_webhook_url: Option<String>,
    /// DEP server override, e.g. a local depsim.
    pub dep_server_url: Option<String>,
    pub scep_challenge: String,
    pub file_repo_path: Option<PathBuf>,
    /// Self-signed TLS certificate to embed in the enrollment profile when
    /// TLS is terminated with one.
    pub tls_cert_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let server_url = std::env::var("SERVER_URL")
            .map_err(|_| "SERVER_URL environment variable not set".to_string())?;
        if !server_url.starts_with("https://") {
            return Err("SERVER_URL must begin with https://".to_string());
        }

        let config_path = PathBuf::from(
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "/var/db/micromdm".to_string()),
        );
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_path.join("micromdm.db"));

        Ok(Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            config_path,
            database_path,
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            apns_certificate_path: std::env::var("APNS_CERTIFICATE_PATH").ok().map(PathBuf::from),
            apns_private_key_path: std::env::var("APNS_PRIVATE_KEY_PATH").ok().map(PathBuf::from),
            apns_certificate_password: std::env::var("APNS_CERTIFICATE_PASSWORD")
                .unwrap_or_default(),
            command_webhook_url: std::env::var("COMMAND_WEBHOOK_URL")
                .ok()
                .filter(|u| !u.is_empty()),
            dep_server_url: std::env::var("DEP_SERVER_URL").ok().filter(|u| !u.is_empty()),
            // A static default challenge avoids a useless prompt during
            // non-DEP enrollment; it adds no security either way.
            scep_challenge: std::env::var("SCEP_CHALLENGE")
                .unwrap_or_else(|_| "micromdm".to_string()),
            file_repo_path: std::env::var("FILE_REPO_PATH").ok().map(PathBuf::from),
            tls_cert_path: std::env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
        })
    }
}
