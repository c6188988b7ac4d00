//! Client for Apple's Device Enrollment Program API.
//!
//! Authentication is a two step dance: an OAuth 1 signed call to `/session`
//! yields a short-lived session token, which rides along on every other call
//! as `X-ADM-Auth-Session`. When Apple rejects the session (403/401) we
//! re-establish it once and retry.

mod oauth;

pub use oauth::OauthCredentials;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

pub const DEFAULT_SERVER_URL: &str = "https://mdmenrollment.apple.com";

#[derive(Debug, thiserror::Error)]
pub enum DepError {
    #[error("DEP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("DEP API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("invalid DEP response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DepError {
    /// Match against well-known Apple error strings (`EXHAUSTED_CURSOR`,
    /// `EXPIRED_CURSOR`, …).
    pub fn contains(&self, needle: &str) -> bool {
        self.to_string().contains(needle)
    }
}

pub type Result<T> = std::result::Result<T, DepError>;

/// Configuration for a DEP client.
#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: OauthCredentials,
    pub server_url: String,
}

impl Config {
    pub fn new(credentials: OauthCredentials) -> Self {
        Self {
            credentials,
            server_url: DEFAULT_SERVER_URL.to_string(),
        }
    }

    pub fn with_server_url(mut self, url: &str) -> Self {
        self.server_url = url.trim_end_matches('/').to_string();
        self
    }

    /// The well-known depsim credentials, for use with a local DEP simulator.
    pub fn depsim(url: &str) -> Self {
        Self {
            credentials: OauthCredentials {
                consumer_key: "CK_48dd68d198350f51258e885ce9a5c37ab7f98543c4a697323d75682a6c10a32501cb247e3db08105db868f73f2c972bdb6ae77112aea803b9219eb52689d42e6".to_string(),
                consumer_secret: "CS_34c7b2b531a600d99a0e4edcf4a78ded79b86ef318118c2f5bcfee1b011108c32d5302df801adbe29d446eb78f02b13144e323eb9aad51c79f01e50cb45c3a68".to_string(),
                access_token: "AT_927696831c59ba510cfe4ec1a69e5267c19881257d4bca2906a99d0785b785a6f6fdeb09774954fdd5e2d0ad952e3af52c6d8d2f21c924ba0caf4a031c158b89".to_string(),
                access_secret: "AS_c31afd7a09691d83548489336e8ff1cb11b82b6bca13f793344496a556b1f4972eaff4dde6deb5ac9cf076fdfa97ec97699c34d515947b9cf9ed31c99dded6ba".to_string(),
            },
            server_url: url.trim_end_matches('/').to_string(),
        }
    }
}

/// A device record as returned by fetch/sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Device {
    pub serial_number: String,
    pub model: String,
    pub description: String,
    pub color: String,
    pub asset_tag: String,
    pub profile_status: String,
    pub profile_uuid: String,
    pub profile_assign_time: Option<DateTime<Utc>>,
    pub profile_push_time: Option<DateTime<Utc>>,
    pub device_assigned_date: Option<DateTime<Utc>>,
    pub device_assigned_by: String,
    /// `added`, `modified` or `deleted`; only present on sync results.
    pub op_type: String,
    pub op_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceResponse {
    pub cursor: String,
    pub devices: Vec<Device>,
    pub fetched_until: Option<DateTime<Utc>>,
    pub more_to_follow: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Account {
    pub server_name: String,
    pub server_uuid: String,
    pub admin_id: String,
    pub facilitator_id: String,
    pub org_name: String,
    pub org_email: String,
    pub org_phone: String,
    pub org_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileResponse {
    pub profile_uuid: String,
    pub devices: serde_json::Value,
}

#[derive(Deserialize)]
struct SessionResponse {
    auth_session_token: String,
}

/// OAuth-authenticated DEP API client.
pub struct DepClient {
    config: Config,
    http: reqwest::Client,
    session: RwLock<Option<String>>,
}

impl DepClient {
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            config,
            http,
            session: RwLock::new(None),
        })
    }

    pub fn server_url(&self) -> &str {
        &self.config.server_url
    }

    async fn establish_session(&self) -> Result<String> {
        let url = format!("{}/session", self.config.server_url);
        let authorization =
            oauth::authorization_header(&self.config.credentials, "GET", &url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", authorization)
            .header("X-Server-Protocol-Version", "2")
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DepError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let session: SessionResponse = serde_json::from_str(&body)?;
        debug!("established DEP session");
        *self.session.write().await = Some(session.auth_session_token.clone());
        Ok(session.auth_session_token)
    }

    async fn session_token(&self) -> Result<String> {
        if let Some(token) = self.session.read().await.clone() {
            return Ok(token);
        }
        self.establish_session().await
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.config.server_url, path);
        let mut token = self.session_token().await?;

        for attempt in 0..2 {
            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("X-ADM-Auth-Session", &token)
                .header("X-Server-Protocol-Version", "2")
                .header("Content-Type", "application/json;charset=UTF8");
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(ref body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            let status = response.status();
            let text = response.text().await?;

            if (status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN)
                && attempt == 0
            {
                token = self.establish_session().await?;
                continue;
            }
            if !status.is_success() {
                return Err(DepError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }
            return Ok(serde_json::from_str(&text)?);
        }
        unreachable!("request loop always returns")
    }

    /// DEP account details for the configured token.
    pub async fn account(&self) -> Result<Account> {
        self.request(reqwest::Method::GET, "/account", &[], None)
            .await
    }

    /// Fetch all devices assigned to this server, paged by cursor.
    pub async fn fetch_devices(&self, limit: u32, cursor: &str) -> Result<DeviceResponse> {
        let mut body = serde_json::json!({ "limit": limit });
        if !cursor.is_empty() {
            body["cursor"] = cursor.into();
        }
        self.request(reqwest::Method::POST, "/server/devices", &[], Some(body))
            .await
    }

    /// Fetch changes since the cursor position.
    pub async fn sync_devices(&self, cursor: &str) -> Result<DeviceResponse> {
        let body = serde_json::json!({ "cursor": cursor });
        self.request(reqwest::Method::POST, "/devices/sync", &[], Some(body))
            .await
    }

    /// Define an enrollment profile; `profile` is the raw DEP profile JSON.
    pub async fn define_profile(&self, profile: serde_json::Value) -> Result<ProfileResponse> {
        self.request(reqwest::Method::POST, "/profile", &[], Some(profile))
            .await
    }

    /// Fetch a previously defined profile.
    pub async fn fetch_profile(&self, profile_uuid: &str) -> Result<serde_json::Value> {
        self.request(
            reqwest::Method::GET,
            "/profile",
            &[("profile_uuid", profile_uuid)],
            None,
        )
        .await
    }

    /// Details for specific serial numbers.
    pub async fn device_details(&self, serials: &[String]) -> Result<serde_json::Value> {
        let body = serde_json::json!({ "devices": serials });
        self.request(reqwest::Method::POST, "/devices", &[], Some(body))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_expose_apple_error_strings() {
        let err = DepError::Api {
            status: 400,
            body: "EXHAUSTED_CURSOR".to_string(),
        };
        assert!(err.contains("EXHAUSTED_CURSOR"));
        assert!(!err.contains("EXPIRED_CURSOR"));
    }

    #[test]
    fn device_parses_dep_json() {
        let body = r#"{
            "serial_number": "C02XL0XYZ",
            "model": "MacBook Pro",
            "description": "MBP 14in",
            "color": "space gray",
            "profile_status": "assigned",
            "profile_uuid": "88fc4e378fea4021a94b2d7268fbf767",
            "device_assigned_by": "admin@example.org",
            "device_assigned_date": "2024-02-22T09:44:22Z",
            "op_type": "added"
        }"#;
        let device: Device = serde_json::from_str(body).unwrap();
        assert_eq!(device.serial_number, "C02XL0XYZ");
        assert_eq!(device.profile_status, "assigned");
        assert!(device.device_assigned_date.is_some());
        assert!(device.profile_assign_time.is_none());
    }

    #[test]
    fn depsim_config_overrides_url() {
        let config = Config::depsim("http://localhost:9000/");
        assert_eq!(config.server_url, "http://localhost:9000");
        assert!(config.credentials.consumer_key.starts_with("CK_"));
    }
}
