//! Session acquisition: reuse a cookie jar or log in.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use super::store::SessionStore;
use crate::auth::Authenticator;
use crate::config::PortalConfig;
use crate::cookies::SessionCookies;
use crate::driver::{AutomationDriver, WaitPolicy};
use crate::error::Result;
use crate::model::{Credentials, SessionSeed};

/// Where the session of a call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// Cookies handed in by the caller.
    Supplied,
    /// Cookies found in the session store.
    Stored,
    /// A login ran during this call.
    LoggedIn,
}

impl fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Supplied => "supplied",
            Self::Stored => "stored",
            Self::LoggedIn => "logged_in",
        })
    }
}

/// An adopted or freshly authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub cookies: SessionCookies,
    pub origin: SessionOrigin,
}

impl Session {
    #[inline]
    pub fn performed_login(&self) -> bool {
        self.origin == SessionOrigin::LoggedIn
    }
}

/// Decides between reusing cookies and running the login machine.
///
/// It never judges whether reused cookies are still accepted; the portal only
/// reveals that when a navigation bounces to the identity provider.
pub struct SessionManager {
    config: Arc<PortalConfig>,
    store: Arc<dyn SessionStore>,
}

impl SessionManager {
    pub fn new(config: Arc<PortalConfig>, store: Arc<dyn SessionStore>) -> Self {
        Self { config, store }
    }

    /// Load a session into `driver`.
    ///
    /// Caller cookies are adopted as-is; otherwise the stored jar for the
    /// account is adopted; otherwise a login runs and its cookies are persisted.
    #[instrument(skip_all, fields(account = %credentials.identifier()))]
    pub async fn obtain_session(
        &self,
        driver: &dyn AutomationDriver,
        credentials: &Credentials,
        seed: &SessionSeed,
    ) -> Result<Session> {
        if let SessionSeed::Resumed(cookies) = seed {
            self.adopt(driver, cookies).await?;
            info!(cookies = cookies.len(), "Reusing supplied session");
            return Ok(Session {
                cookies: cookies.clone(),
                origin: SessionOrigin::Supplied,
            });
        }

        match self.store.get(credentials.identifier()).await {
            Ok(Some(cookies)) if !cookies.is_empty() => {
                self.adopt(driver, &cookies).await?;
                info!(cookies = cookies.len(), "Reusing stored session");
                return Ok(Session {
                    cookies,
                    origin: SessionOrigin::Stored,
                });
            }
            Ok(_) => debug!("No stored session"),
            Err(e) => warn!(error = %e, "Failed to read stored session; logging in"),
        }

        self.force_login(driver, credentials).await
    }

    /// Run the login machine unconditionally and persist the result.
    pub async fn force_login(
        &self,
        driver: &dyn AutomationDriver,
        credentials: &Credentials,
    ) -> Result<Session> {
        let cookies = Authenticator::new(&self.config)
            .login(driver, credentials)
            .await?;
        self.refresh_after_login(credentials.identifier(), &cookies)
            .await;

        Ok(Session {
            cookies,
            origin: SessionOrigin::LoggedIn,
        })
    }

    /// Persist `cookies` for `identifier`. Failures are logged, not returned.
    pub async fn refresh_after_login(&self, identifier: &str, cookies: &SessionCookies) {
        match self.store.set(identifier, cookies).await {
            Ok(()) => debug!(account = %identifier, cookies = cookies.len(), "Session stored"),
            Err(e) => warn!(account = %identifier, error = %e, "Failed to persist session"),
        }
    }

    /// Cookies can only be written once a document on the portal origin is loaded.
    async fn adopt(&self, driver: &dyn AutomationDriver, cookies: &SessionCookies) -> Result<()> {
        driver
            .navigate(&self.config.portal_base_url, WaitPolicy::Load)
            .await?;
        driver.write_cookies(cookies).await?;
        Ok(())
    }
}
