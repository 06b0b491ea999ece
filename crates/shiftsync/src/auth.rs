//! Identity provider login as an explicit state machine.
//!
//! ```text
//! Start -> GatekeeperLoaded -> LoginButtonClicked -+-> IdentifierForm -> IdentifierSubmitted
//!                                                  |     -> PasscodeForm -> PasscodeSubmitted
//!                                                  |     -+-> Authenticated
//!                                                  |      +-> SignInError
//!                                                  +-> AccessForbidden
//! ```
//!
//! Every wait carries its own timeout from [`StepTimeouts`](crate::config::StepTimeouts).
//! A timeout surfaces as [`RetrievalError::LoginFlow`] naming the state that
//! never appeared. Nothing here retries.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::config::PortalConfig;
use crate::cookies::SessionCookies;
use crate::driver::{AutomationDriver, DriverError, SelectorSpec, WaitPolicy};
use crate::error::{Result, RetrievalError};
use crate::model::Credentials;

const DEFAULT_FORBIDDEN_CODE: &str = "403";
const DEFAULT_FORBIDDEN_MESSAGE: &str = "Access Forbidden";

/// Upper bound on transitions in one run; the longest path visits 9 states.
const MAX_TRANSITIONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Start,
    GatekeeperLoaded,
    LoginButtonClicked,
    IdentifierForm,
    AccessForbidden,
    IdentifierSubmitted,
    PasscodeForm,
    PasscodeSubmitted,
    Authenticated,
    SignInError { message: String },
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::GatekeeperLoaded => "GatekeeperLoaded",
            Self::LoginButtonClicked => "LoginButtonClicked",
            Self::IdentifierForm => "IdentifierForm",
            Self::AccessForbidden => "AccessForbidden",
            Self::IdentifierSubmitted => "IdentifierSubmitted",
            Self::PasscodeForm => "PasscodeForm",
            Self::PasscodeSubmitted => "PasscodeSubmitted",
            Self::Authenticated => "Authenticated",
            Self::SignInError { .. } => "SignInError",
        }
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single step.
#[derive(Debug)]
pub enum Transition {
    Next(AuthState),
    Done(SessionCookies),
}

/// Drives one login on one driver.
pub struct Authenticator<'a> {
    config: &'a PortalConfig,
}

impl<'a> Authenticator<'a> {
    pub fn new(config: &'a PortalConfig) -> Self {
        Self { config }
    }

    /// Run the machine from `Start` to a terminal state.
    ///
    /// Returns the authenticated cookie jar, or the classified failure.
    #[instrument(skip_all, fields(account = %credentials.identifier()))]
    pub async fn login(
        &self,
        driver: &dyn AutomationDriver,
        credentials: &Credentials,
    ) -> Result<SessionCookies> {
        let mut state = AuthState::Start;

        for _ in 0..MAX_TRANSITIONS {
            debug!(step = %state, "Login step");
            match self.step(driver, credentials, state).await? {
                Transition::Next(next) => state = next,
                Transition::Done(cookies) => {
                    info!(cookies = cookies.len(), "Login succeeded");
                    return Ok(cookies);
                }
            }
        }

        Err(RetrievalError::internal(format!(
            "login did not terminate within {} transitions",
            MAX_TRANSITIONS
        )))
    }

    /// Perform the work of `state` and decide the next state.
    pub async fn step(
        &self,
        driver: &dyn AutomationDriver,
        credentials: &Credentials,
        state: AuthState,
    ) -> Result<Transition> {
        let selectors = &self.config.selectors;
        let timeouts = &self.config.timeouts;

        let next = match state {
            AuthState::Start => {
                driver
                    .navigate(&self.config.gatekeeper_url, WaitPolicy::NetworkIdle)
                    .await?;
                let spec = SelectorSpec::visible(&selectors.login_button, timeouts.gatekeeper());
                wait(driver, &spec, AuthState::GatekeeperLoaded).await?;
                AuthState::GatekeeperLoaded
            }
            AuthState::GatekeeperLoaded => {
                driver.click(&selectors.login_button).await?;
                AuthState::LoginButtonClicked
            }
            AuthState::LoginButtonClicked => {
                let race = [
                    SelectorSpec::visible(&selectors.identifier_input, timeouts.identifier()),
                    SelectorSpec::attached(&selectors.forbidden_code, timeouts.forbidden_wait()),
                ];
                match driver.wait_for_any_of(&race).await {
                    Ok(0) => AuthState::IdentifierForm,
                    Ok(_) => AuthState::AccessForbidden,
                    Err(e) if e.is_timeout() => {
                        return Err(RetrievalError::login_flow(AuthState::IdentifierForm));
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            AuthState::AccessForbidden => {
                let (code, message) = self.read_forbidden(driver).await;
                warn!(code = %code, message = %message, "Identity provider refused the client");
                return Err(RetrievalError::AccessDenied { code, message });
            }
            AuthState::IdentifierForm => {
                driver
                    .type_text(
                        &selectors.identifier_input,
                        credentials.identifier(),
                        self.config.keystroke_delay(),
                    )
                    .await?;
                driver.click(&selectors.identifier_submit).await?;
                AuthState::IdentifierSubmitted
            }
            AuthState::IdentifierSubmitted => {
                let spec = SelectorSpec::visible(&selectors.passcode_input, timeouts.passcode());
                wait(driver, &spec, AuthState::PasscodeForm).await?;
                AuthState::PasscodeForm
            }
            AuthState::PasscodeForm => {
                driver
                    .type_text(
                        &selectors.passcode_input,
                        credentials.secret(),
                        self.config.keystroke_delay(),
                    )
                    .await?;
                driver.click(&selectors.verify_button).await?;
                AuthState::PasscodeSubmitted
            }
            AuthState::PasscodeSubmitted => {
                // The error container renders late and has no reliable "appeared" signal.
                tokio::time::sleep(self.config.settle_interval()).await;

                let message = driver
                    .read_text(&selectors.sign_in_error)
                    .await?
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty());

                match message {
                    Some(message) => AuthState::SignInError { message },
                    None => AuthState::Authenticated,
                }
            }
            AuthState::SignInError { message } => {
                warn!(message = %message, "Identity provider rejected the sign-in");
                return Err(RetrievalError::InvalidCredentials(message));
            }
            AuthState::Authenticated => {
                return Ok(Transition::Done(driver.read_cookies().await?));
            }
        };

        Ok(Transition::Next(next))
    }

    /// Best-effort read of the refusal code and title.
    async fn read_forbidden(&self, driver: &dyn AutomationDriver) -> (String, String) {
        let selectors = &self.config.selectors;
        let code = read_non_empty(driver, &selectors.forbidden_code)
            .await
            .unwrap_or_else(|| DEFAULT_FORBIDDEN_CODE.to_string());
        let message = read_non_empty(driver, &selectors.forbidden_title)
            .await
            .unwrap_or_else(|| DEFAULT_FORBIDDEN_MESSAGE.to_string());
        (code, message)
    }
}

async fn wait(
    driver: &dyn AutomationDriver,
    spec: &SelectorSpec,
    awaited: AuthState,
) -> Result<()> {
    driver.wait_for_selector(spec).await.map_err(|e| match e {
        DriverError::Timeout { .. } => RetrievalError::login_flow(awaited),
        other => other.into(),
    })
}

async fn read_non_empty(driver: &dyn AutomationDriver, selector: &str) -> Option<String> {
    match driver.read_text(selector).await {
        Ok(text) => text
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty()),
        Err(e) => {
            debug!(selector, error = %e, "Could not read element");
            None
        }
    }
}
