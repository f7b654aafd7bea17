//! Login state machine.
//!
//! ```text
//! CheckingInternet -> CheckingIntranet -> LoggingIn -> Success | Overloaded | Failed
//!                                                      Overloaded -> Evicting -> RetryLoggingIn
//! ```
//!
//! An internet check that already succeeds ends the run in `Success` without
//! logging in. An overloaded login evicts one session and retries once when
//! auto logout is enabled; a second overload is final.

use crate::config::PortalConfig;
use crate::device::KnownDeviceSet;
use crate::error::{check_status, PortalError, Result};
use crate::handler::{ErrorDomain, ErrorHandlerBook};
use crate::portal::gateway::{LoginResponse, PortalGateway};
use crate::portal::session::SessionRegistry;
use crate::probe::ReachabilityCheck;
use crate::report::Reporter;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    CheckingInternet,
    CheckingIntranet,
    LoggingIn,
    Evicting,
    RetryLoggingIn,
    Success,
    Overloaded,
    Failed,
}

impl LoginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoginState::Success | LoginState::Overloaded | LoginState::Failed
        )
    }
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoginState::CheckingInternet => "checking internet",
            LoginState::CheckingIntranet => "checking intranet",
            LoginState::LoggingIn => "logging in",
            LoginState::Evicting => "evicting",
            LoginState::RetryLoggingIn => "retry logging in",
            LoginState::Success => "success",
            LoginState::Overloaded => "overloaded",
            LoginState::Failed => "failed",
        };
        f.write_str(name)
    }
}

pub struct LoginReconciler {
    reachability: Arc<dyn ReachabilityCheck>,
    gateway: Arc<dyn PortalGateway>,
    registry: SessionRegistry,
    known: KnownDeviceSet,
    local_macs: Vec<String>,
    handlers: ErrorHandlerBook,
    settings: PortalConfig,
    reporter: Arc<dyn Reporter>,
    history: Vec<LoginState>,
}

impl LoginReconciler {
    pub fn new(
        reachability: Arc<dyn ReachabilityCheck>,
        gateway: Arc<dyn PortalGateway>,
        known: KnownDeviceSet,
        local_macs: Vec<String>,
        handlers: ErrorHandlerBook,
        settings: PortalConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(gateway.clone(), reporter.clone()),
            reachability,
            gateway,
            known,
            local_macs,
            handlers,
            settings,
            reporter,
            history: Vec::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// States entered during the last [`run`](Self::run), in order.
    pub fn history(&self) -> &[LoginState] {
        &self.history
    }

    fn enter(&mut self, state: LoginState) -> LoginState {
        self.reporter.debug(&format!("Login state: {state}"));
        self.history.push(state);
        state
    }

    fn dispatch(&self, domain: ErrorDomain, status: i32) {
        self.handlers.dispatch(domain, status, &*self.reporter);
    }

    /// Drive the whole flow to a terminal state.
    pub async fn run(&mut self) -> LoginState {
        self.history.clear();
        let state = self.attempt_login().await;
        if state != LoginState::Overloaded || !self.settings.auto_logout {
            return state;
        }

        self.enter(LoginState::Evicting);
        if let Err(e) = self.evict_one().await {
            self.reporter.error(&format!("{e}"));
            return self.enter(LoginState::Overloaded);
        }

        self.enter(LoginState::RetryLoggingIn);
        self.attempt_login().await
    }

    /// One pass of reachability checks and the login POST.
    async fn attempt_login(&mut self) -> LoginState {
        self.enter(LoginState::CheckingInternet);
        let internet = self.reachability.internet_check().await;
        self.dispatch(ErrorDomain::InternetCheck, check_status(&internet));
        match internet {
            Ok(_) => return self.enter(LoginState::Success),
            Err(e) => self.reporter.info(&format!("{e}")),
        }

        self.enter(LoginState::CheckingIntranet);
        let intranet = self.reachability.intranet_check().await;
        self.dispatch(ErrorDomain::IntranetCheck, check_status(&intranet));
        if let Err(e) = intranet {
            self.reporter.error(&format!("{e}"));
            return self.enter(LoginState::Failed);
        }

        self.enter(LoginState::LoggingIn);
        self.reporter.info("Try to login");
        let response = match self.login_post().await {
            Ok(response) => response,
            Err(e) => {
                self.dispatch(ErrorDomain::Login, e.status());
                self.reporter.error(&format!("{e}"));
                return self.enter(LoginState::Failed);
            }
        };

        let status = self
            .handlers
            .map_login_error(response.error, &response.error_description);
        self.dispatch(ErrorDomain::Login, status);

        let state = if (200..300).contains(&status) {
            LoginState::Success
        } else if status == self.settings.overload_status {
            LoginState::Overloaded
        } else {
            LoginState::Failed
        };
        self.enter(state)
    }

    async fn login_post(&self) -> Result<LoginResponse> {
        let redirect = self.gateway.redirect_url().await?;
        self.gateway.login(&redirect).await
    }

    async fn refresh_sessions(&mut self) -> Result<()> {
        self.reporter.info("Try to get session list");
        let refreshed = self.registry.refresh().await;
        self.dispatch(ErrorDomain::GetSession, check_status(&refreshed));
        refreshed.map(|_| ())
    }

    /// Refresh sessions, pick a victim and delete it.
    async fn evict_one(&mut self) -> Result<()> {
        self.refresh_sessions().await?;
        if let Some(current) = self.registry.identify_current(&self.local_macs).await {
            self.reporter
                .info(&format!("Current session: {}", current.user_mac_addr));
        }

        let victim = self
            .known
            .select_victim(self.registry.macs())
            .ok_or_else(|| PortalError::NotFound("no session to evict".to_string()))?;
        self.logout_mac(&victim).await
    }

    async fn logout_mac(&self, mac: &str) -> Result<()> {
        let session = self
            .registry
            .get(mac)
            .ok_or_else(|| PortalError::NotFound(format!("no session with MAC address [{mac}]")))?;
        self.reporter.info(&format!(
            "Try to logout session with MAC address [{mac}]"
        ));
        let evicted = self.registry.evict(&session.unique_id).await;
        self.dispatch(ErrorDomain::Logout, check_status(&evicted));
        evicted.map(|_| ())
    }

    /// Refresh and render the session list, marking the current session.
    pub async fn list_sessions(&mut self) -> Result<String> {
        self.refresh_sessions().await?;
        self.registry.identify_current(&self.local_macs).await;
        if self.registry.is_empty() {
            return Err(PortalError::NotFound("no session".to_string()));
        }

        let listing = self.registry.render();
        self.reporter.info(&format!(
            "{} session(s):\n{listing}",
            self.registry.len()
        ));
        self.reporter.hint(&listing);
        Ok(listing)
    }

    /// Log out the session at `index` of the registry order.
    pub async fn logout_index(&mut self, index: usize) -> Result<()> {
        let intranet = self.reachability.intranet_check().await;
        self.dispatch(ErrorDomain::IntranetCheck, check_status(&intranet));
        intranet?;

        if self.registry.is_empty() {
            self.refresh_sessions().await?;
        }
        let mac = self
            .registry
            .macs()
            .get(index)
            .cloned()
            .ok_or_else(|| PortalError::NotFound(format!("no session [{index}] exists")))?;
        self.logout_mac(&mac).await
    }
}
