//! Retrieval error types.

use thiserror::Error;

use crate::driver::DriverError;
use crate::session::StoreError;

/// Result alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Classified failure of a schedule retrieval.
///
/// Every variant is terminal for the call that produced it. The only automatic
/// recovery (one forced re-login on an expired session) happens before an error
/// is ever constructed.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The request was rejected before any automation started.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The identity provider refused the client before showing a login form.
    #[error("access denied ({code}): {message}")]
    AccessDenied { code: String, message: String },

    /// A required element did not appear within its step timeout.
    #[error("login flow stalled at step {step}")]
    LoginFlow { step: String },

    /// The identity provider reported a sign-in error after verification.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The schedule view yielded no shift records.
    #[error("schedule not found")]
    ScheduleNotFound,

    /// Unexpected automation failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RetrievalError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn login_flow(step: impl ToString) -> Self {
        Self::LoginFlow {
            step: step.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if the stored session must be discarded and the user asked to log in again.
    #[inline]
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::InvalidCredentials(_))
    }

    /// Check if a new call may reasonably succeed where this one failed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LoginFlow { .. } | Self::Internal(_))
    }

    /// Stable machine-readable code for this error class.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid-request",
            Self::AccessDenied { .. } => "access-denied",
            Self::LoginFlow { .. } => "login-flow",
            Self::InvalidCredentials(_) => "invalid-credentials",
            Self::ScheduleNotFound => "schedule-not-found",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<DriverError> for RetrievalError {
    fn from(err: DriverError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<StoreError> for RetrievalError {
    fn from(err: StoreError) -> Self {
        Self::Internal(format!("session store: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            RetrievalError::invalid_request("missing identifier"),
            RetrievalError::AccessDenied {
                code: "403".to_string(),
                message: "Access Forbidden".to_string(),
            },
            RetrievalError::login_flow("PasscodeForm"),
            RetrievalError::InvalidCredentials("Unable to sign in".to_string()),
            RetrievalError::ScheduleNotFound,
            RetrievalError::internal("driver crashed"),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_classification() {
        assert!(RetrievalError::InvalidCredentials("nope".into()).requires_relogin());
        assert!(!RetrievalError::ScheduleNotFound.requires_relogin());

        assert!(RetrievalError::login_flow("IdentifierForm").is_retryable());
        assert!(RetrievalError::internal("boom").is_retryable());
        assert!(!RetrievalError::AccessDenied {
            code: "429".into(),
            message: "Too many requests".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = RetrievalError::AccessDenied {
            code: "403".into(),
            message: "Access Forbidden".into(),
        };
        assert_eq!(err.to_string(), "access denied (403): Access Forbidden");

        let err = RetrievalError::login_flow("PasscodeForm");
        assert_eq!(err.to_string(), "login flow stalled at step PasscodeForm");
    }

    #[test]
    fn test_driver_error_maps_to_internal() {
        let err: RetrievalError = DriverError::Navigation("connection reset".into()).into();
        assert!(matches!(err, RetrievalError::Internal(_)));
    }
}
