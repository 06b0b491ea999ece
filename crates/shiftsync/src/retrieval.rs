//! Schedule retrieval orchestration.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::{ConfigError, PortalConfig};
use crate::driver::{AutomationDriver, DriverFactory, DriverScope, SelectorSpec, WaitPolicy};
use crate::error::{Result, RetrievalError};
use crate::extract::ScheduleExtractor;
use crate::model::{
    Credentials, RetrievalRequest, RetrievalResult, ScheduleRequest, ScheduleView,
};
use crate::session::{SessionManager, SessionOrigin, SessionStore};

/// Step name reported when the schedule keeps bouncing to the identity provider.
const SCHEDULE_NAVIGATION_STEP: &str = "ScheduleNavigation";

/// Retrieves schedules, one isolated driver per call.
///
/// Cheap to share behind an [`Arc`]; concurrent calls only meet in the
/// session store.
pub struct ScheduleRetriever {
    config: Arc<PortalConfig>,
    factory: Arc<dyn DriverFactory>,
    sessions: SessionManager,
    extractor: ScheduleExtractor,
}

impl ScheduleRetriever {
    pub fn new(
        config: PortalConfig,
        factory: Arc<dyn DriverFactory>,
        store: Arc<dyn SessionStore>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let extractor = ScheduleExtractor::new(&config.schedule)?;
        let config = Arc::new(config);

        Ok(Self {
            sessions: SessionManager::new(Arc::clone(&config), store),
            config,
            factory,
            extractor,
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    /// Validate a caller request, then retrieve.
    ///
    /// Validation failures return before any driver is created.
    pub async fn fetch(&self, request: ScheduleRequest) -> Result<RetrievalResult> {
        let request = RetrievalRequest::try_from(request)?;
        self.retrieve(request).await
    }

    /// Run one retrieval.
    ///
    /// The driver is disposed before this returns, whatever the outcome. If the
    /// returned future is dropped early, disposal is spawned in the background.
    #[instrument(
        skip_all,
        fields(account = %request.credentials.identifier(), period = ?request.view.period_id())
    )]
    pub async fn retrieve(&self, request: RetrievalRequest) -> Result<RetrievalResult> {
        // Opening the driver counts against the same call budget as the steps.
        let deadline = self.config.call_timeout().map(|limit| Instant::now() + limit);

        let acquire = async {
            DriverScope::acquire(self.factory.as_ref())
                .await
                .map_err(RetrievalError::from)
        };
        let scope = within(deadline, acquire).await;
        let scope = match scope {
            Ok(scope) => scope,
            Err(e) => {
                warn!(code = e.code(), error = %e, "Retrieval failed");
                return Err(e);
            }
        };

        let outcome = within(deadline, self.run(&*scope, &request)).await;

        scope.release().await;

        if let Err(e) = &outcome {
            warn!(code = e.code(), error = %e, "Retrieval failed");
        }
        outcome
    }

    async fn run(
        &self,
        driver: &dyn AutomationDriver,
        request: &RetrievalRequest,
    ) -> Result<RetrievalResult> {
        let credentials = &request.credentials;
        let session = self
            .sessions
            .obtain_session(driver, credentials, &request.seed)
            .await?;

        let url = match &request.view {
            ScheduleView::Default => self.config.schedule_url.clone(),
            ScheduleView::Scoped(period_id) => self.config.period_url(period_id),
        };
        self.open_schedule(driver, credentials, &url, session.origin)
            .await?;

        let html = driver.page_content().await?;
        let extraction = self
            .extractor
            .extract(&html, matches!(request.view, ScheduleView::Default));
        if extraction.shifts.is_empty() {
            return Err(RetrievalError::ScheduleNotFound);
        }

        let cookies = driver.read_cookies().await?;
        self.sessions
            .refresh_after_login(credentials.identifier(), &cookies)
            .await;

        info!(
            shifts = extraction.shifts.len(),
            pay_periods = extraction.pay_periods.as_ref().map(Vec::len),
            session = %session.origin,
            "Schedule retrieved"
        );

        Ok(RetrievalResult {
            shifts: extraction.shifts,
            pay_periods: extraction.pay_periods,
            requested_period_id: request.view.period_id().map(str::to_string),
            refreshed_cookies: cookies,
        })
    }

    /// Navigate to a schedule view, logging in again once if the session
    /// turns out to be expired.
    async fn open_schedule(
        &self,
        driver: &dyn AutomationDriver,
        credentials: &Credentials,
        url: &str,
        origin: SessionOrigin,
    ) -> Result<()> {
        driver.navigate(url, WaitPolicy::Load).await?;

        if self.landed_on_provider(driver).await? {
            // A session minted during this call is not retried with another login.
            if origin == SessionOrigin::LoggedIn {
                return Err(RetrievalError::login_flow(SCHEDULE_NAVIGATION_STEP));
            }

            info!(session = %origin, "Session expired; logging in again");
            self.sessions.force_login(driver, credentials).await?;

            driver.navigate(url, WaitPolicy::Load).await?;
            if self.landed_on_provider(driver).await? {
                return Err(RetrievalError::login_flow(SCHEDULE_NAVIGATION_STEP));
            }
        }

        let table = SelectorSpec::attached(
            &self.config.schedule.table,
            self.config.timeouts.schedule(),
        );
        match driver.wait_for_selector(&table).await {
            Ok(()) => Ok(()),
            // Extraction of a page without the table yields no shifts.
            Err(e) if e.is_timeout() => {
                debug!(selector = %table.selector, "Schedule table never appeared");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn landed_on_provider(&self, driver: &dyn AutomationDriver) -> Result<bool> {
        let current = driver.current_url().await?;
        let url = Url::parse(&current).map_err(|e| {
            RetrievalError::internal(format!("unparsable page url `{}`: {}", current, e))
        })?;
        Ok(self.config.is_identity_provider(&url))
    }
}

/// Run `future` to completion, or fail once `deadline` passes.
async fn within<T>(
    deadline: Option<Instant>,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future)
            .await
            .unwrap_or_else(|_| {
                warn!("Retrieval timed out");
                Err(RetrievalError::internal("retrieval timed out"))
            }),
        None => future.await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::session::MemorySessionStore;
    use crate::test_support::{ScriptedPortal, fast_config, schedule_page};

    fn retriever(portal: &ScriptedPortal, config: PortalConfig) -> ScheduleRetriever {
        ScheduleRetriever::new(
            config,
            Arc::new(portal.clone()),
            Arc::new(MemorySessionStore::new()),
        )
        .unwrap()
    }

    fn request() -> RetrievalRequest {
        RetrievalRequest::new(Credentials::new("jane.doe", "pw").unwrap())
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_driver() {
        let portal = ScriptedPortal::new(fast_config());
        let retriever = retriever(&portal, fast_config());

        let result = retriever
            .fetch(ScheduleRequest {
                identifier: "jane.doe".into(),
                secret: "   ".into(),
                ..ScheduleRequest::default()
            })
            .await;

        assert!(matches!(result, Err(RetrievalError::InvalidRequest(_))));
        assert_eq!(portal.drivers_created(), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let portal = ScriptedPortal::new(fast_config());
        let config = PortalConfig {
            period_url_template: "https://schedule.example.org/schedule".into(),
            ..fast_config()
        };

        let result = ScheduleRetriever::new(
            config,
            Arc::new(portal),
            Arc::new(MemorySessionStore::new()),
        );
        assert!(matches!(result, Err(ConfigError::MissingPeriodPlaceholder)));
    }

    #[tokio::test]
    async fn test_stale_cookies_on_default_view_relogin_once() {
        let portal = ScriptedPortal::new(fast_config());
        let retriever = retriever(&portal, fast_config());

        let result = retriever
            .retrieve(request().with_cookies(portal.stale_cookies()))
            .await
            .unwrap();

        assert_eq!(portal.logins(), 1);
        assert!(result.pay_periods.is_some());
        assert_eq!(portal.drivers_disposed(), 1);
    }

    #[tokio::test]
    async fn test_session_rejected_after_relogin_stops() {
        let portal = ScriptedPortal::new(fast_config()).reject_sessions();
        let retriever = retriever(&portal, fast_config());

        let result = retriever
            .retrieve(
                request()
                    .with_cookies(portal.stale_cookies())
                    .with_period("202502"),
            )
            .await;

        match result {
            Err(RetrievalError::LoginFlow { step }) => assert_eq!(step, "ScheduleNavigation"),
            other => panic!("expected LoginFlow, got {:?}", other),
        }
        assert_eq!(portal.logins(), 1);
        let period_navigations = portal
            .navigations()
            .iter()
            .filter(|url| url.contains("payPeriod=202502"))
            .count();
        assert_eq!(period_navigations, 2);
        assert_eq!(portal.drivers_disposed(), 1);
    }

    #[tokio::test]
    async fn test_fresh_login_rejected_is_not_retried() {
        let portal = ScriptedPortal::new(fast_config()).reject_sessions();
        let retriever = retriever(&portal, fast_config());

        let result = retriever.retrieve(request()).await;

        assert!(matches!(result, Err(RetrievalError::LoginFlow { .. })));
        assert_eq!(portal.logins(), 1);
    }

    #[tokio::test]
    async fn test_unknown_period_is_schedule_not_found() {
        let portal = ScriptedPortal::new(fast_config()).with_period(
            "202502",
            schedule_page(&[&["Mon\n03/03"]], &[]),
        );
        let retriever = retriever(&portal, fast_config());

        let result = retriever
            .retrieve(
                request()
                    .with_cookies(portal.valid_cookies())
                    .with_period("209912"),
            )
            .await;

        assert!(matches!(result, Err(RetrievalError::ScheduleNotFound)));
        assert_eq!(portal.drivers_disposed(), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_disposes_driver() {
        let portal = ScriptedPortal::new(fast_config()).hang_navigation();
        let config = PortalConfig {
            call_timeout_ms: Some(50),
            ..fast_config()
        };
        let retriever = retriever(&portal, config);

        let result = retriever.retrieve(request()).await;

        match result {
            Err(RetrievalError::Internal(message)) => assert_eq!(message, "retrieval timed out"),
            other => panic!("expected Internal, got {:?}", other),
        }
        assert_eq!(portal.drivers_disposed(), 1);
    }

    #[tokio::test]
    async fn test_call_timeout_covers_driver_creation() {
        let portal = ScriptedPortal::new(fast_config()).hang_creation();
        let config = PortalConfig {
            call_timeout_ms: Some(50),
            ..fast_config()
        };
        let retriever = retriever(&portal, config);

        let result = tokio::time::timeout(Duration::from_secs(5), retriever.retrieve(request()))
            .await
            .expect("retrieve must honour the call timeout while opening a driver");

        match result {
            Err(RetrievalError::Internal(message)) => assert_eq!(message, "retrieval timed out"),
            other => panic!("expected Internal, got {:?}", other),
        }
        assert_eq!(portal.drivers_created(), 0);
        assert!(portal.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_call_disposes_driver() {
        let portal = ScriptedPortal::new(fast_config()).hang_navigation();
        let retriever = retriever(&portal, fast_config());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), retriever.retrieve(request())).await;
        assert!(cancelled.is_err());

        for _ in 0..20 {
            if portal.drivers_disposed() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(portal.drivers_created(), 1);
        assert_eq!(portal.drivers_disposed(), 1);
    }
}
