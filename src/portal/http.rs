//! HTTP plumbing shared by the gateway client and the reachability checks.

use crate::config::HttpConfig;
use crate::error::{IntoPortalError, PortalError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{redirect, Client, Response};

/// Build the client every portal request goes through.
///
/// System proxies are bypassed and redirects are never followed: the gateway
/// announces itself through a redirect, so a `3xx` must stay visible.
pub fn build_client(config: &HttpConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent)
            .map_err(|e| PortalError::Config(format!("Invalid user agent: {e}")))?,
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_str(&config.accept_language)
            .map_err(|e| PortalError::Config(format!("Invalid accept language: {e}")))?,
    );

    Client::builder()
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(config.timeout())
        .redirect(redirect::Policy::none())
        .no_proxy()
        .build()
        .into_portal_error("Failed to build HTTP client")
}

/// Pass a response through only when its status is exactly 200.
pub fn expect_ok(response: Response, context: &str) -> Result<Response> {
    let status = response.status().as_u16();
    if status != 200 {
        return Err(PortalError::http(status, context));
    }
    Ok(response)
}

/// Render a `Cookie` header value from name/value pairs.
pub fn cookie_header(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}


#[cfg(test)]
mod tests {
    use super::testing::mock_http_server;
    use super::*;

    #[test]
    fn test_cookie_header() {
        assert_eq!(cookie_header(&[("token", "abc")]), "token=abc");
        assert_eq!(cookie_header(&[("a", "1"), ("b", "2")]), "a=1; b=2");
    }

    #[tokio::test]
    async fn test_client_sends_configured_headers() {
        let (addr, seen) = mock_http_server(200, "", "ok").await;
        let config = HttpConfig {
            user_agent: "probe-agent".to_string(),
            ..HttpConfig::default()
        };
        let client = build_client(&config).unwrap();
        let response = client.get(format!("http://{addr}/")).send().await.unwrap();
        let response = expect_ok(response, "GET /").unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");

        let head = seen.lock().unwrap()[0].to_ascii_lowercase();
        assert!(head.contains("user-agent: probe-agent"));
        assert!(head.contains("accept-language: en-us"));
    }

    #[tokio::test]
    async fn test_redirect_is_not_followed() {
        let (addr, _) = mock_http_server(302, "Location: http://10.255.255.1/\r\n", "").await;
        let client = build_client(&HttpConfig::default()).unwrap();
        let response = client.get(format!("http://{addr}/")).send().await.unwrap();
        let err = expect_ok(response, "bootstrap").unwrap_err();
        assert_eq!(err.status(), 302);
    }
}
