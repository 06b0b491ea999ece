//! Request and result types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cookies::SessionCookies;
use crate::error::{Result, RetrievalError};

/// Login credentials for one account.
///
/// Held only for the duration of a single retrieval; never serialized.
#[derive(Clone)]
pub struct Credentials {
    identifier: String,
    secret: String,
}

impl Credentials {
    /// Validate and build credentials. Blank fields are rejected.
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let identifier = identifier.into().trim().to_string();
        let secret = secret.into();

        if identifier.is_empty() {
            return Err(RetrievalError::invalid_request("identifier is required"));
        }
        if secret.trim().is_empty() {
            return Err(RetrievalError::invalid_request("secret is required"));
        }

        Ok(Self { identifier, secret })
    }

    #[inline]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    #[inline]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One parsed schedule cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub day: String,
    pub date: String,
    /// Duty code; empty when the day carries no assignment.
    pub code: String,
}

/// A selectable pay period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPeriodOption {
    pub id: String,
    pub is_selected: bool,
}

/// How a call starts its session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionSeed {
    /// No cookies; use the store or log in.
    #[default]
    Fresh,
    /// Caller-supplied cookies from a previous call.
    Resumed(SessionCookies),
}

/// Which schedule view a call targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ScheduleView {
    /// The portal's default view; also lists the selectable pay periods.
    #[default]
    Default,
    /// A specific pay period.
    Scoped(String),
}

impl ScheduleView {
    pub fn period_id(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Scoped(id) => Some(id),
        }
    }
}

/// A validated retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub credentials: Credentials,
    pub seed: SessionSeed,
    pub view: ScheduleView,
}

impl RetrievalRequest {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            seed: SessionSeed::Fresh,
            view: ScheduleView::Default,
        }
    }

    /// Seed the call with cookies. An empty jar keeps the seed `Fresh`.
    pub fn with_cookies(mut self, cookies: SessionCookies) -> Self {
        self.seed = if cookies.is_empty() {
            SessionSeed::Fresh
        } else {
            SessionSeed::Resumed(cookies)
        };
        self
    }

    /// Target a pay period. A blank id keeps the default view.
    pub fn with_period(mut self, period_id: impl Into<String>) -> Self {
        let period_id = period_id.into().trim().to_string();
        self.view = if period_id.is_empty() {
            ScheduleView::Default
        } else {
            ScheduleView::Scoped(period_id)
        };
        self
    }
}

/// Caller-facing request body: `{ identifier, secret, periodId?, cookies? }`.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub period_id: Option<String>,
    #[serde(default)]
    pub cookies: Option<SessionCookies>,
}

impl fmt::Debug for ScheduleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRequest")
            .field("identifier", &self.identifier)
            .field("period_id", &self.period_id)
            .field("cookies", &self.cookies.as_ref().map(|c| c.len()))
            .finish_non_exhaustive()
    }
}

impl TryFrom<ScheduleRequest> for RetrievalRequest {
    type Error = RetrievalError;

    fn try_from(req: ScheduleRequest) -> Result<Self> {
        let mut request = RetrievalRequest::new(Credentials::new(req.identifier, req.secret)?);
        if let Some(cookies) = req.cookies {
            request = request.with_cookies(cookies);
        }
        if let Some(period_id) = req.period_id {
            request = request.with_period(period_id);
        }
        Ok(request)
    }
}

/// Successful retrieval: `{ shifts, payPeriods?, payPeriod?, cookies }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalResult {
    /// Never empty.
    pub shifts: Vec<ShiftRecord>,
    /// Present only for the default view.
    #[serde(rename = "payPeriods", default, skip_serializing_if = "Option::is_none")]
    pub pay_periods: Option<Vec<PayPeriodOption>>,
    /// Present only for a period-scoped call.
    #[serde(rename = "payPeriod", default, skip_serializing_if = "Option::is_none")]
    pub requested_period_id: Option<String>,
    /// Post-call jar; seed the next call from the same account with it.
    #[serde(rename = "cookies")]
    pub refreshed_cookies: SessionCookies,
}
