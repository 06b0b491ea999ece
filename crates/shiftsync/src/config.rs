//! Portal configuration: URLs, selectors and per-step timeouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Placeholder substituted with the pay period id in [`PortalConfig::period_url_template`].
pub const PERIOD_PLACEHOLDER: &str = "{period}";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url for `{field}`: {reason}")]
    InvalidUrl { field: &'static str, reason: String },

    #[error("`period_url_template` must contain {{period}}")]
    MissingPeriodPlaceholder,

    #[error("`{0}` must not be empty")]
    Empty(&'static str),

    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// Selectors driving the identity provider login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginSelectors {
    /// Button on the portal gatekeeper page that starts the federated login.
    pub login_button: String,
    pub identifier_input: String,
    pub identifier_submit: String,
    pub passcode_input: String,
    pub verify_button: String,
    /// Element carrying an error code when the provider refuses the client.
    pub forbidden_code: String,
    /// Human-readable title next to the error code.
    pub forbidden_title: String,
    /// Container the provider fills after a failed verification.
    pub sign_in_error: String,
}

impl Default for LoginSelectors {
    fn default() -> Self {
        Self {
            login_button: "a#login-button".to_string(),
            identifier_input: r#"input[name="identifier"]"#.to_string(),
            identifier_submit: r#"input[type="submit"][value="Next"]"#.to_string(),
            passcode_input: r#"input[name="credentials.passcode"]"#.to_string(),
            verify_button: r#"input[type="submit"][value="Verify"]"#.to_string(),
            forbidden_code: ".error-code".to_string(),
            forbidden_title: ".error-title".to_string(),
            sign_in_error: ".o-form-error-container".to_string(),
        }
    }
}

/// Selectors locating the schedule on a rendered view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSelectors {
    /// The bordered schedule table.
    pub table: String,
    /// Pay period `<select>` on the default view.
    pub period_select: String,
}

impl Default for ScheduleSelectors {
    fn default() -> Self {
        Self {
            table: "table[border]".to_string(),
            period_select: "select#payPeriod".to_string(),
        }
    }
}

/// Per-step wait budgets of the login flow, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepTimeouts {
    pub gatekeeper_ms: u64,
    pub identifier_ms: u64,
    /// Wait for the access-forbidden page; raced against `identifier_ms`.
    pub forbidden_wait_ms: u64,
    pub passcode_ms: u64,
    /// Wait for the schedule page to render after navigation.
    pub schedule_ms: u64,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            gatekeeper_ms: 40_000,
            identifier_ms: 40_000,
            forbidden_wait_ms: 5_000,
            passcode_ms: 40_000,
            schedule_ms: 30_000,
        }
    }
}

impl StepTimeouts {
    pub fn gatekeeper(&self) -> Duration {
        Duration::from_millis(self.gatekeeper_ms)
    }

    pub fn identifier(&self) -> Duration {
        Duration::from_millis(self.identifier_ms)
    }

    pub fn forbidden_wait(&self) -> Duration {
        Duration::from_millis(self.forbidden_wait_ms)
    }

    pub fn passcode(&self) -> Duration {
        Duration::from_millis(self.passcode_ms)
    }

    pub fn schedule(&self) -> Duration {
        Duration::from_millis(self.schedule_ms)
    }
}

/// Everything the core needs to know about one portal deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Origin of the portal; cookies are written after loading this page.
    pub portal_base_url: String,
    /// Entry page holding the login button.
    pub gatekeeper_url: String,
    /// Default schedule view.
    pub schedule_url: String,
    /// Period-scoped schedule view, containing `{period}`.
    pub period_url_template: String,
    /// Host of the identity provider; landing here means the session expired.
    pub identity_provider_host: String,
    pub selectors: LoginSelectors,
    pub schedule: ScheduleSelectors,
    pub timeouts: StepTimeouts,
    /// Delay between keystrokes when filling login fields.
    pub keystroke_delay_ms: u64,
    /// Pause after verify before probing for a sign-in error.
    pub settle_interval_ms: u64,
    /// Optional deadline for a whole retrieval call.
    pub call_timeout_ms: Option<u64>,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            portal_base_url: "https://schedule.example.org/".to_string(),
            gatekeeper_url: "https://schedule.example.org/gatekeeper".to_string(),
            schedule_url: "https://schedule.example.org/schedule/employee".to_string(),
            period_url_template: "https://schedule.example.org/schedule/employee?payPeriod={period}"
                .to_string(),
            identity_provider_host: "login.example.org".to_string(),
            selectors: LoginSelectors::default(),
            schedule: ScheduleSelectors::default(),
            timeouts: StepTimeouts::default(),
            keystroke_delay_ms: 60,
            settle_interval_ms: 3_000,
            call_timeout_ms: None,
        }
    }
}

impl PortalConfig {
    pub fn keystroke_delay(&self) -> Duration {
        Duration::from_millis(self.keystroke_delay_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Host of the portal itself, used to scope cookies parsed from a header string.
    pub fn portal_host(&self) -> Result<String, ConfigError> {
        let url = parse_url("portal_base_url", &self.portal_base_url)?;
        url.host_str()
            .map(str::to_string)
            .ok_or(ConfigError::InvalidUrl {
                field: "portal_base_url",
                reason: "missing host".to_string(),
            })
    }

    /// Period-scoped view URL with the id percent-encoded.
    pub fn period_url(&self, period_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(period_id.as_bytes()).collect();
        self.period_url_template
            .replace(PERIOD_PLACEHOLDER, &encoded)
    }

    /// Whether `url` is on the identity provider (exact host or a subdomain of it).
    pub fn is_identity_provider(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let provider = self.identity_provider_host.trim_start_matches('.');
        host.eq_ignore_ascii_case(provider)
            || host
                .to_ascii_lowercase()
                .ends_with(&format!(".{}", provider.to_ascii_lowercase()))
    }

    /// Check URLs parse and required fields are present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_url("portal_base_url", &self.portal_base_url)?;
        parse_url("gatekeeper_url", &self.gatekeeper_url)?;
        parse_url("schedule_url", &self.schedule_url)?;

        if !self.period_url_template.contains(PERIOD_PLACEHOLDER) {
            return Err(ConfigError::MissingPeriodPlaceholder);
        }
        parse_url("period_url_template", &self.period_url("0"))?;

        if self.identity_provider_host.trim().is_empty() {
            return Err(ConfigError::Empty("identity_provider_host"));
        }

        let s = &self.selectors;
        for (field, value) in [
            ("selectors.login_button", &s.login_button),
            ("selectors.identifier_input", &s.identifier_input),
            ("selectors.identifier_submit", &s.identifier_submit),
            ("selectors.passcode_input", &s.passcode_input),
            ("selectors.verify_button", &s.verify_button),
            ("selectors.sign_in_error", &s.sign_in_error),
            ("schedule.table", &self.schedule.table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(field));
            }
        }

        Ok(())
    }
}

fn parse_url(field: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl {
        field,
        reason: e.to_string(),
    })
}
