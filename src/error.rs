//! Error types and handling for the portal authentication client

use thiserror::Error;

/// Status reported to error-handler tables when no response was obtained.
pub const NO_RESPONSE: i32 = -1;

/// Main error type for portal operations
#[derive(Error, Debug)]
pub enum PortalError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network connectivity errors
    #[error("Network error: {0}")]
    Network(String),

    /// A response was obtained but carried an unexpected status
    #[error("{context}: response returned status [{status}]")]
    Http { status: i32, context: String },

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed addresses or payloads
    #[error("Parse error: {0}")]
    Parse(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Lookups that found nothing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

impl PortalError {
    /// HTTP-equivalent status used to pick an error handler.
    pub fn status(&self) -> i32 {
        match self {
            PortalError::Http { status, .. } => *status,
            _ => NO_RESPONSE,
        }
    }

    pub fn http(status: impl Into<i32>, context: impl Into<String>) -> Self {
        PortalError::Http {
            status: status.into(),
            context: context.into(),
        }
    }
}

/// Result type alias for portal operations
pub type Result<T> = std::result::Result<T, PortalError>;

/// Status of a check that reports its own success status.
pub fn check_status(result: &Result<u16>) -> i32 {
    match result {
        Ok(status) => i32::from(*status),
        Err(e) => e.status(),
    }
}

/// Helper trait for converting errors to PortalError
pub trait IntoPortalError<T> {
    fn into_portal_error(self, context: &str) -> Result<T>;
}

impl<T, E> IntoPortalError<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn into_portal_error(self, context: &str) -> Result<T> {
        self.map_err(|e| PortalError::Other(format!("{context}: {e}")))
    }
}

impl From<toml::de::Error> for PortalError {
    fn from(err: toml::de::Error) -> Self {
        PortalError::Config(format!("TOML parsing error: {err}"))
    }
}

impl From<reqwest::Error> for PortalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PortalError::Timeout(err.to_string())
        } else {
            PortalError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PortalError {
    fn from(err: serde_json::Error) -> Self {
        PortalError::Parse(format!("JSON error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PortalError::Config("test config error".to_string());
        assert_eq!(err.to_string(), "Configuration error: test config error");

        let err = PortalError::http(403, "session list");
        assert_eq!(err.to_string(), "session list: response returned status [403]");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(PortalError::http(502, "login").status(), 502);
        assert_eq!(PortalError::Network("refused".into()).status(), NO_RESPONSE);

        let err: Result<u16> = Err(PortalError::Timeout("dns".into()));
        assert_eq!(check_status(&err), -1);

        assert_eq!(check_status(&Ok(204)), 204);
        assert_eq!(check_status(&Err(PortalError::http(302, "GET"))), 302);
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PortalError = io_err.into();
        assert!(matches!(err, PortalError::Io(_)));
    }

    #[test]
    fn test_into_portal_error_trait() {
        let result: std::result::Result<(), &str> = Err("test error");
        let converted = result.into_portal_error("test context");
        assert!(converted.unwrap_err().to_string().contains("test context"));
    }
}
