//! Retrieves work-shift schedules from a scheduling portal that has no API.
//!
//! A call drives a headless browser through the portal's federated login (or
//! reuses a cookie jar from an earlier call), opens the schedule view, and
//! parses the rendered table into [`ShiftRecord`]s.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use shiftsync::driver::webdriver::WebDriverFactory;
//! use shiftsync::{Credentials, MemorySessionStore, PortalConfig, RetrievalRequest, ScheduleRetriever};
//!
//! let retriever = ScheduleRetriever::new(
//!     PortalConfig::default(),
//!     Arc::new(WebDriverFactory::default()),
//!     Arc::new(MemorySessionStore::new()),
//! )?;
//!
//! let first = retriever
//!     .retrieve(RetrievalRequest::new(Credentials::new("jane.doe", "secret")?))
//!     .await?;
//!
//! // Later calls reuse the session and pick a pay period.
//! if let Some(period) = first.pay_periods.as_ref().and_then(|p| p.get(1)) {
//!     let next = retriever
//!         .retrieve(
//!             RetrievalRequest::new(Credentials::new("jane.doe", "secret")?)
//!                 .with_cookies(first.refreshed_cookies.clone())
//!                 .with_period(&period.id),
//!         )
//!         .await?;
//!     println!("{} shifts", next.shifts.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod cookies;
pub mod driver;
pub mod error;
pub mod extract;
pub mod model;
pub mod retrieval;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use config::{ConfigError, PortalConfig};
pub use cookies::{CookieRecord, SameSite, SessionCookies};
pub use error::{Result, RetrievalError};
pub use model::{
    Credentials, PayPeriodOption, RetrievalRequest, RetrievalResult, ScheduleRequest,
    ScheduleView, SessionSeed, ShiftRecord,
};
pub use retrieval::ScheduleRetriever;
pub use session::{FileSessionStore, MemorySessionStore, SessionStore};
