//! Headless browser control surface.
//!
//! The core never talks to a browser directly. It drives an
//! [`AutomationDriver`], obtained per call from a [`DriverFactory`], and keeps
//! it inside a [`DriverScope`] so it is disposed on every exit path.

mod race;
mod scope;
#[cfg(feature = "webdriver")]
pub mod webdriver;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::cookies::SessionCookies;

pub use race::race_selectors;
pub use scope::DriverScope;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("timed out waiting for `{selector}`")]
    Timeout { selector: String },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("driver protocol error: {0}")]
    Protocol(String),

    #[error("driver already disposed")]
    Disposed,
}

impl DriverError {
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// When a navigation counts as finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitPolicy {
    /// The document load event fired.
    #[default]
    Load,
    /// Load fired and the page stayed quiet briefly afterwards.
    NetworkIdle,
}

/// A selector to wait for, with its own budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpec {
    pub selector: String,
    /// Require the element to be displayed, not merely attached.
    pub visible: bool,
    pub timeout: Duration,
}

impl SelectorSpec {
    pub fn visible(selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            visible: true,
            timeout,
        }
    }

    pub fn attached(selector: impl Into<String>, timeout: Duration) -> Self {
        Self {
            selector: selector.into(),
            visible: false,
            timeout,
        }
    }
}

/// Operations the core needs from a browser session.
///
/// One instance owns one page and one cookie jar. Implementations must be
/// usable from a spawned task so that disposal can happen after cancellation.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Type `text` one character at a time with `per_char_delay` between keystrokes.
    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), DriverError>;

    /// Wait until `spec` matches or its timeout elapses ([`DriverError::Timeout`]).
    async fn wait_for_selector(&self, spec: &SelectorSpec) -> Result<(), DriverError>;

    /// Race every spec under its own timeout and return the index of the first
    /// to match. Fails with [`DriverError::Timeout`] only when all of them time out.
    async fn wait_for_any_of(&self, specs: &[SelectorSpec]) -> Result<usize, DriverError>;

    /// Text of the first element matching `selector`, if there is one.
    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError>;

    /// Serialized DOM of the current page.
    async fn page_content(&self) -> Result<String, DriverError>;

    async fn read_cookies(&self) -> Result<SessionCookies, DriverError>;

    async fn write_cookies(&self, cookies: &SessionCookies) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    /// Release the browser session. Subsequent calls fail with [`DriverError::Disposed`].
    async fn dispose(&self) -> Result<(), DriverError>;
}

/// Produces an isolated driver for each retrieval call.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn AutomationDriver>, DriverError>;
}
