//! Configurable mapping from status codes to operator-facing messages.
//!
//! Each [`ErrorDomain`] owns an ordered list of handlers keyed by an
//! HTTP-equivalent status. Lookups fall back to the wildcard status `-1`, so an
//! unexpected code is still rendered with configured text instead of a raw
//! number.

use crate::report::Reporter;
use log::Level;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Status key of the default handler in every table.
pub const WILDCARD_STATUS: i32 = -1;

/// Operation families that own an error-handler table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
    InternetCheck,
    IntranetCheck,
    ResolveCheck,
    Login,
    Logout,
    GetSession,
}

impl ErrorDomain {
    pub const ALL: [ErrorDomain; 6] = [
        ErrorDomain::InternetCheck,
        ErrorDomain::IntranetCheck,
        ErrorDomain::ResolveCheck,
        ErrorDomain::Login,
        ErrorDomain::Logout,
        ErrorDomain::GetSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorDomain::InternetCheck => "internet_check",
            ErrorDomain::IntranetCheck => "intranet_check",
            ErrorDomain::ResolveCheck => "resolve_check",
            ErrorDomain::Login => "login",
            ErrorDomain::Logout => "logout",
            ErrorDomain::GetSession => "get_session",
        }
    }
}

impl fmt::Display for ErrorDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured reaction to a status code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandler {
    /// Local status this handler is keyed by
    pub status: i32,
    /// Gateway application error code matched during login mapping
    #[serde(default)]
    pub error_code: i64,
    /// Case-sensitive substring matched against the gateway error description
    #[serde(default)]
    pub error_description: String,
    #[serde(default)]
    pub hint_message: String,
    #[serde(default)]
    pub log_message: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ErrorHandler {
    pub fn level(&self) -> Level {
        parse_level(&self.log_level).unwrap_or(Level::Info)
    }

    /// Render this handler: hint first, then a log record at its level.
    pub fn report(&self, domain: ErrorDomain, reporter: &dyn Reporter) {
        reporter.hint(&self.hint_message);
        reporter.log(self.level(), &format!("{domain}: {}", self.log_message));
    }
}

/// Parse `debug`/`info`/`warning`/`error`/`fatal` in any case.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::Trace),
        "debug" => Some(Level::Debug),
        "info" => Some(Level::Info),
        "warn" | "warning" => Some(Level::Warn),
        "error" | "fatal" => Some(Level::Error),
        _ => None,
    }
}

/// Ordered handlers of one domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorHandlerTable {
    handlers: Vec<ErrorHandler>,
}

impl ErrorHandlerTable {
    pub fn new(handlers: Vec<ErrorHandler>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &[ErrorHandler] {
        &self.handlers
    }

    pub fn has_wildcard(&self) -> bool {
        self.handlers.iter().any(|h| h.status == WILDCARD_STATUS)
    }

    /// Exact status first, then the wildcard entry.
    pub fn resolve(&self, status: i32) -> Option<&ErrorHandler> {
        self.handlers
            .iter()
            .find(|h| h.status == status)
            .or_else(|| self.handlers.iter().find(|h| h.status == WILDCARD_STATUS))
    }

    /// Map a gateway application error to a local status.
    ///
    /// The first handler, in configured order, whose code equals `error_code`
    /// and whose description is a substring of `description` wins. The
    /// wildcard entry never takes part in matching.
    pub fn map_gateway_error(&self, error_code: i64, description: &str) -> i32 {
        self.handlers
            .iter()
            .filter(|h| h.status != WILDCARD_STATUS)
            .find(|h| h.error_code == error_code && description.contains(&h.error_description))
            .map(|h| h.status)
            .unwrap_or(WILDCARD_STATUS)
    }
}

/// All handler tables keyed by domain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorHandlerBook {
    tables: HashMap<ErrorDomain, ErrorHandlerTable>,
}

impl ErrorHandlerBook {
    pub fn new(tables: HashMap<ErrorDomain, ErrorHandlerTable>) -> Self {
        Self { tables }
    }

    pub fn table(&self, domain: ErrorDomain) -> Option<&ErrorHandlerTable> {
        self.tables.get(&domain)
    }

    pub fn insert(&mut self, domain: ErrorDomain, table: ErrorHandlerTable) {
        self.tables.insert(domain, table);
    }

    pub fn map_login_error(&self, error_code: i64, description: &str) -> i32 {
        self.table(ErrorDomain::Login)
            .map(|t| t.map_gateway_error(error_code, description))
            .unwrap_or(WILDCARD_STATUS)
    }

    /// Resolve and render the handler for `status` in `domain`.
    pub fn dispatch(&self, domain: ErrorDomain, status: i32, reporter: &dyn Reporter) {
        match self.table(domain).and_then(|t| t.resolve(status)) {
            Some(handler) => handler.report(domain, reporter),
            None => reporter.debug(&format!("{domain}: no handler for status [{status}]")),
        }
    }
}
