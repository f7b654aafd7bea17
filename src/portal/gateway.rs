//! Gateway web API client.
//!
//! Covers the calls the login flow and the session registry need: redirect
//! discovery, the login POST (which also mints auth tokens), the session list,
//! session deletion and the external "what is my IP" probe.

use crate::config::{AuthConfig, Config, GatewayConfig};
use crate::error::{PortalError, Result};
use crate::portal::http::{build_client, cookie_header, expect_ok};
use crate::report::Reporter;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{AUTHORIZATION, COOKIE, LOCATION};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

lazy_static! {
    static ref ABSOLUTE_URL: Regex = Regex::new(r#"https?://[^\s"'<>]+"#).unwrap();
}

/// Body of the login POST.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthPayload {
    #[serde(rename = "deviceType")]
    pub device_type: String,
    #[serde(rename = "redirectUrl")]
    pub redirect_url: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "webAuthUser")]
    pub user: String,
    #[serde(rename = "webAuthPassword")]
    pub password: String,
}

impl AuthPayload {
    pub fn new(auth: &AuthConfig) -> Self {
        Self {
            device_type: "PC".to_string(),
            redirect_url: String::new(),
            kind: "login".to_string(),
            user: auth.login_user(),
            password: auth.password.clone(),
        }
    }
}

/// Gateway answer to the login POST.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginResponse {
    pub status_code: i64,
    pub truncated: bool,
    pub created_at: i64,
    /// Application error code
    pub error: i64,
    pub error_description: String,
    pub token: String,
}

/// One session record exactly as the gateway reports it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawSession {
    #[serde(rename = "deviceType", deserialize_with = "lenient_string")]
    pub device_type: String,
    #[serde(rename = "user_name", deserialize_with = "lenient_string")]
    pub username: String,
    #[serde(rename = "acct_session_id", deserialize_with = "lenient_string")]
    pub session_id: String,
    #[serde(rename = "nas_ip_address", deserialize_with = "lenient_string")]
    pub nas_ip_addr: String,
    #[serde(rename = "framed_ip_address", deserialize_with = "lenient_string")]
    pub user_ip_addr: String,
    #[serde(rename = "calling_station_id", deserialize_with = "lenient_string")]
    pub user_mac_addr: String,
    #[serde(rename = "acct_start_time", deserialize_with = "lenient_string")]
    pub start_time: String,
    #[serde(rename = "acct_unique_id", deserialize_with = "lenient_string")]
    pub unique_id: String,
}

/// Session list payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionListResponse {
    /// Number or numeric string
    #[serde(deserialize_with = "lenient_string")]
    pub concurrency: String,
    pub sessions: Vec<RawSession>,
}

impl SessionListResponse {
    /// Concurrency limit, `None` unless it parses to a nonzero integer.
    pub fn concurrency(&self) -> Option<i64> {
        self.concurrency
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|value| *value != 0)
    }
}

/// Accept strings, numbers, booleans and null where a string is expected.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Pull the first absolute URL out of a page body.
pub fn extract_url(body: &str) -> Option<String> {
    ABSOLUTE_URL.find(body).map(|m| m.as_str().to_string())
}

/// Gateway operations the session registry and the login flow depend on.
#[async_trait]
pub trait PortalGateway: Send + Sync {
    /// Redirect URL the gateway hands to unauthenticated clients.
    async fn redirect_url(&self) -> Result<String>;

    /// Submit credentials with the given redirect URL.
    async fn login(&self, redirect_url: &str) -> Result<LoginResponse>;

    /// Fresh auth token for the self-service API.
    async fn auth_token(&self) -> Result<String>;

    async fn fetch_sessions(&self, token: &str) -> Result<SessionListResponse>;

    /// Raw body of the external IP probe.
    async fn whoami(&self) -> Result<String>;

    /// Delete the session keyed by `unique_id`, returning the gateway status.
    async fn delete_session(&self, token: &str, unique_id: &str) -> Result<u16>;
}

pub struct GatewayClient {
    client: Client,
    gateway: GatewayConfig,
    ip_probe_url: String,
    payload: AuthPayload,
    reporter: Arc<dyn Reporter>,
}

impl GatewayClient {
    pub fn new(config: &Config, reporter: Arc<dyn Reporter>) -> Result<Self> {
        Ok(Self {
            client: build_client(&config.http)?,
            gateway: config.gateway.clone(),
            ip_probe_url: config.ip_probe.url(),
            payload: AuthPayload::new(&config.auth),
            reporter,
        })
    }

    pub fn login_url(&self) -> String {
        self.gateway.url(&self.gateway.login_path)
    }

    pub fn session_list_url(&self) -> String {
        self.gateway.url(&self.gateway.session_list_path)
    }

    pub fn logout_url(&self, unique_id: &str) -> String {
        format!("{}/{unique_id}", self.gateway.url(&self.gateway.logout_path))
    }
}

#[async_trait]
impl PortalGateway for GatewayClient {
    async fn redirect_url(&self) -> Result<String> {
        let bootstrap = &self.gateway.bootstrap_url;
        self.reporter
            .debug(&format!("Send redirect discovery to [{bootstrap}]"));
        let response = self.client.get(bootstrap).send().await?;

        if let Some(location) = response.headers().get(LOCATION) {
            let location = location
                .to_str()
                .map_err(|e| PortalError::Parse(format!("Invalid Location header: {e}")))?;
            let base = url::Url::parse(bootstrap)
                .map_err(|e| PortalError::Config(format!("Invalid bootstrap URL: {e}")))?;
            let resolved = base
                .join(location)
                .map_err(|e| PortalError::Parse(format!("Invalid redirect [{location}]: {e}")))?;
            return Ok(resolved.to_string());
        }

        let body = response.text().await?;
        extract_url(&body)
            .ok_or_else(|| PortalError::NotFound("redirect URL in bootstrap response".to_string()))
    }

    async fn login(&self, redirect_url: &str) -> Result<LoginResponse> {
        let url = self.login_url();
        self.reporter.debug(&format!("Send login post to [{url}]"));
        let response = self
            .client
            .post(&url)
            .header(COOKIE, cookie_header(&[("redirectUrl", redirect_url)]))
            .json(&self.payload)
            .send()
            .await?;
        let body = expect_ok(response, "login")?.text().await?;
        let parsed: LoginResponse = serde_json::from_str(&body)?;
        self.reporter.debug(&format!(
            "Login response: error [{}] description [{}]",
            parsed.error, parsed.error_description
        ));
        Ok(parsed)
    }

    async fn auth_token(&self) -> Result<String> {
        let fake_redirect = self.gateway.url(&self.gateway.fake_redirect_path);
        let response = self.login(&fake_redirect).await?;
        if response.token.is_empty() {
            return Err(PortalError::Authentication("empty token".to_string()));
        }
        self.reporter.info("Successfully got token via login post");
        Ok(response.token)
    }

    async fn fetch_sessions(&self, token: &str) -> Result<SessionListResponse> {
        let url = self.session_list_url();
        self.reporter.debug(&format!("Send session list get to [{url}]"));
        let response = self
            .client
            .get(&url)
            .header(COOKIE, cookie_header(&[("token", token)]))
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        let body = expect_ok(response, "session list")?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn whoami(&self) -> Result<String> {
        self.reporter
            .debug(&format!("Send IP probe to [{}]", self.ip_probe_url));
        let response = self.client.get(&self.ip_probe_url).send().await?;
        Ok(expect_ok(response, "ip probe")?.text().await?)
    }

    async fn delete_session(&self, token: &str, unique_id: &str) -> Result<u16> {
        let url = self.logout_url(unique_id);
        self.reporter.debug(&format!("Send logout delete to [{url}]"));
        let response = self
            .client
            .delete(&url)
            .header(COOKIE, cookie_header(&[("token", token)]))
            .header(AUTHORIZATION, token)
            .send()
            .await?;
        Ok(expect_ok(response, "logout")?.status().as_u16())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted gateway recording every call it receives.
    #[derive(Default)]
    pub struct FakeGateway {
        pub logins: Mutex<VecDeque<LoginResponse>>,
        pub sessions: SessionListResponse,
        pub whoami: Option<String>,
        pub delete_status: u16,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeGateway {
        pub fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }
    }

    pub fn raw_session(mac: &str, ip: &str, unique_id: &str) -> RawSession {
        RawSession {
            session_id: format!("sid-{unique_id}"),
            nas_ip_addr: "10.0.0.254".to_string(),
            user_ip_addr: ip.to_string(),
            user_mac_addr: mac.to_string(),
            start_time: "2024-01-01 08:00:00".to_string(),
            unique_id: unique_id.to_string(),
            ..RawSession::default()
        }
    }

    #[async_trait]
    impl PortalGateway for FakeGateway {
        async fn redirect_url(&self) -> Result<String> {
            self.record("redirect");
            Ok("http://gateway/redirect".to_string())
        }

        async fn login(&self, redirect_url: &str) -> Result<LoginResponse> {
            self.record(format!("login:{redirect_url}"));
            Ok(self.logins.lock().unwrap().pop_front().unwrap_or_default())
        }

        async fn auth_token(&self) -> Result<String> {
            self.record("token");
            Ok("tok".to_string())
        }

        async fn fetch_sessions(&self, _token: &str) -> Result<SessionListResponse> {
            self.record("sessions");
            Ok(self.sessions.clone())
        }

        async fn whoami(&self) -> Result<String> {
            self.record("whoami");
            self.whoami
                .clone()
                .ok_or_else(|| PortalError::Network("ip probe unreachable".to_string()))
        }

        async fn delete_session(&self, _token: &str, unique_id: &str) -> Result<u16> {
            self.record(format!("delete:{unique_id}"));
            match self.delete_status {
                200 => Ok(200),
                status => Err(PortalError::http(status, "logout")),
            }
        }
    }
}
