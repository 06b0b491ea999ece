//! Scripted in-memory portal for tests.
//!
//! [`ScriptedPortal`] is a [`DriverFactory`] whose drivers simulate the
//! gatekeeper page, the identity provider forms and the schedule views
//! without a browser. Schedule views require a session cookie the portal has
//! accepted; anything else bounces to the identity provider host.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::PortalConfig;
use crate::cookies::{CookieRecord, SessionCookies};
use crate::driver::{AutomationDriver, DriverError, DriverFactory, SelectorSpec, WaitPolicy};

/// Name of the cookie the scripted portal authenticates with.
pub const SESSION_COOKIE: &str = "PORTALSESSION";

/// Cookie the scripted identity provider sets on its own host.
pub const PROVIDER_COOKIE: &str = "idx";

const BLANK_PAGE: &str = "<html><head></head><body></body></html>";

/// How the identity provider responds to a login attempt.
#[derive(Debug, Clone, Default)]
pub enum LoginBehavior {
    #[default]
    Succeed,
    /// Refuse the client before the identifier form; `None` leaves the element empty.
    Forbidden {
        code: Option<String>,
        title: Option<String>,
    },
    /// Show this message in the sign-in error container after verify.
    RejectPasscode(String),
    StallAtGatekeeper,
    StallAfterLoginButton,
    StallAfterIdentifier,
}

/// Config with every artificial delay removed.
pub fn fast_config() -> PortalConfig {
    PortalConfig {
        keystroke_delay_ms: 0,
        settle_interval_ms: 0,
        ..PortalConfig::default()
    }
}

/// Render a schedule page.
///
/// Each row is a list of cells; `\n` inside a cell becomes a `<br>`. Periods
/// are `(value, selected)` pairs rendered into the period select.
pub fn schedule_page(rows: &[&[&str]], periods: &[(&str, bool)]) -> String {
    let mut html = String::from("<html><body><table border=\"1\"><tr><th>Schedule</th></tr>");
    for row in rows {
        html.push_str("<tr>");
        for cell in *row {
            html.push_str("<td>");
            html.push_str(&cell.replace('\n', "<br>"));
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");

    if !periods.is_empty() {
        html.push_str("<select id=\"payPeriod\">");
        for (value, selected) in periods {
            let selected = if *selected { " selected" } else { "" };
            html.push_str(&format!("<option value=\"{value}\"{selected}>{value}</option>"));
        }
        html.push_str("</select>");
    }

    html.push_str("</body></html>");
    html
}

/// Default view used when a test does not provide one.
pub fn sample_schedule() -> String {
    schedule_page(
        &[
            &["Mon\n03/03\nD1", "Tue\n03/04", "Wed\n03/05\nN2"],
            &["Thu\n03/06\nD1", "", "Sat\n03/08\nOFF"],
        ],
        &[("202501", false), ("202502", true), ("202503", false)],
    )
}

#[derive(Debug)]
struct PortalState {
    config: PortalConfig,
    portal_host: String,
    login: LoginBehavior,
    default_view: String,
    periods: HashMap<String, String>,
    hang_navigation: bool,
    hang_creation: bool,
    accept_sessions: bool,
    accepted: HashSet<String>,
    minted: u64,
    logins: usize,
    typed: Vec<(String, String)>,
    navigations: Vec<String>,
    drivers_created: usize,
    drivers_disposed: usize,
}

impl PortalState {
    fn mint_session(&mut self) -> CookieRecord {
        self.minted += 1;
        let value = format!("session-{}", self.minted);
        if self.accept_sessions {
            self.accepted.insert(value.clone());
        }
        CookieRecord::new(SESSION_COOKIE, value, self.portal_host.clone())
            .http_only(true)
            .secure(true)
    }

    fn is_schedule_url(&self, url: &str) -> bool {
        let template_prefix = self
            .config
            .period_url_template
            .split(crate::config::PERIOD_PLACEHOLDER)
            .next()
            .unwrap_or_default();
        url == self.config.schedule_url || url.starts_with(template_prefix)
    }
}

/// In-memory stand-in for the portal and its identity provider.
#[derive(Debug, Clone)]
pub struct ScriptedPortal {
    state: Arc<Mutex<PortalState>>,
}

impl ScriptedPortal {
    pub fn new(config: PortalConfig) -> Self {
        let portal_host = config
            .portal_host()
            .expect("scripted portal needs a portal host");
        Self {
            state: Arc::new(Mutex::new(PortalState {
                config,
                portal_host,
                login: LoginBehavior::Succeed,
                default_view: sample_schedule(),
                periods: HashMap::new(),
                hang_navigation: false,
                hang_creation: false,
                accept_sessions: true,
                accepted: HashSet::new(),
                minted: 0,
                logins: 0,
                typed: Vec::new(),
                navigations: Vec::new(),
                drivers_created: 0,
                drivers_disposed: 0,
            })),
        }
    }

    pub fn with_login(self, behavior: LoginBehavior) -> Self {
        self.state.lock().login = behavior;
        self
    }

    pub fn with_default_view(self, html: impl Into<String>) -> Self {
        self.state.lock().default_view = html.into();
        self
    }

    pub fn with_period(self, period_id: &str, html: impl Into<String>) -> Self {
        {
            let mut state = self.state.lock();
            let url = state.config.period_url(period_id);
            state.periods.insert(url, html.into());
        }
        self
    }

    /// Every navigation blocks forever.
    pub fn hang_navigation(self) -> Self {
        self.state.lock().hang_navigation = true;
        self
    }

    /// Opening a driver blocks forever.
    pub fn hang_creation(self) -> Self {
        self.state.lock().hang_creation = true;
        self
    }

    /// Logins succeed but the portal never accepts the resulting session.
    pub fn reject_sessions(self) -> Self {
        self.state.lock().accept_sessions = false;
        self
    }

    /// A jar the portal accepts.
    pub fn valid_cookies(&self) -> SessionCookies {
        let mut state = self.state.lock();
        let record = state.mint_session();
        state.accepted.insert(record.value.clone());
        std::iter::once(record).collect()
    }

    /// A well-formed jar the portal no longer accepts.
    pub fn stale_cookies(&self) -> SessionCookies {
        let state = self.state.lock();
        std::iter::once(CookieRecord::new(
            SESSION_COOKIE,
            "expired",
            state.portal_host.clone(),
        ))
        .collect()
    }

    /// Completed logins.
    pub fn logins(&self) -> usize {
        self.state.lock().logins
    }

    /// `(selector, text)` for every typed field, in order.
    pub fn typed(&self) -> Vec<(String, String)> {
        self.state.lock().typed.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    pub fn drivers_created(&self) -> usize {
        self.state.lock().drivers_created
    }

    pub fn drivers_disposed(&self) -> usize {
        self.state.lock().drivers_disposed
    }
}

#[async_trait]
impl DriverFactory for ScriptedPortal {
    async fn create(&self) -> Result<Box<dyn AutomationDriver>, DriverError> {
        let hang = self.state.lock().hang_creation;
        if hang {
            std::future::pending::<()>().await;
        }
        self.state.lock().drivers_created += 1;
        Ok(Box::new(ScriptedDriver {
            portal: Arc::clone(&self.state),
            page: Mutex::new(Page::blank("about:blank")),
        }))
    }
}

#[derive(Debug, Clone)]
struct Element {
    visible: bool,
    text: String,
}

#[derive(Debug)]
struct Page {
    url: String,
    html: String,
    elements: HashMap<String, Element>,
    cookies: SessionCookies,
    disposed: bool,
}

impl Page {
    fn blank(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: BLANK_PAGE.to_string(),
            elements: HashMap::new(),
            cookies: SessionCookies::new(),
            disposed: false,
        }
    }

    fn load(&mut self, url: impl Into<String>, html: impl Into<String>) {
        self.url = url.into();
        self.html = html.into();
        self.elements.clear();
    }

    fn show(&mut self, selector: &str, text: impl Into<String>) {
        self.elements.insert(
            selector.to_string(),
            Element {
                visible: true,
                text: text.into(),
            },
        );
    }

    fn attach(&mut self, selector: &str, text: impl Into<String>) {
        self.elements.insert(
            selector.to_string(),
            Element {
                visible: false,
                text: text.into(),
            },
        );
    }

    fn matches(&self, spec: &SelectorSpec) -> Result<bool, DriverError> {
        if let Some(element) = self.elements.get(&spec.selector) {
            return Ok(element.visible || !spec.visible);
        }
        let selector = scraper::Selector::parse(&spec.selector)
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        let document = scraper::Html::parse_document(&self.html);
        let found = document.select(&selector).next().is_some();
        Ok(found)
    }
}

/// Driver handed out by [`ScriptedPortal`]. Waits resolve or time out immediately.
pub struct ScriptedDriver {
    portal: Arc<Mutex<PortalState>>,
    page: Mutex<Page>,
}

impl ScriptedDriver {
    fn live(&self) -> Result<parking_lot::MutexGuard<'_, Page>, DriverError> {
        let page = self.page.lock();
        if page.disposed {
            return Err(DriverError::Disposed);
        }
        Ok(page)
    }

    fn has_session(&self, page: &Page, portal: &PortalState) -> bool {
        page.cookies
            .iter()
            .any(|c| c.name == SESSION_COOKIE && portal.accepted.contains(&c.value))
    }
}

#[async_trait]
impl AutomationDriver for ScriptedDriver {
    async fn navigate(&self, url: &str, _wait: WaitPolicy) -> Result<(), DriverError> {
        drop(self.live()?);

        let hang = {
            let mut portal = self.portal.lock();
            portal.navigations.push(url.to_string());
            portal.hang_navigation
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let portal = self.portal.lock();
        let mut page = self.live()?;
        let config = &portal.config;

        if url == config.gatekeeper_url {
            page.load(url, BLANK_PAGE);
            if !matches!(portal.login, LoginBehavior::StallAtGatekeeper) {
                page.show(&config.selectors.login_button, "Log in");
            }
        } else if url == config.portal_base_url {
            page.load(url, BLANK_PAGE);
        } else if portal.is_schedule_url(url) {
            if self.has_session(&page, &portal) {
                let html = if url == config.schedule_url {
                    portal.default_view.clone()
                } else {
                    portal
                        .periods
                        .get(url)
                        .cloned()
                        .unwrap_or_else(|| BLANK_PAGE.to_string())
                };
                page.load(url, html);
            } else {
                let redirect = format!(
                    "https://{}/oauth2/v1/authorize",
                    config.identity_provider_host
                );
                page.load(redirect, BLANK_PAGE);
            }
        } else {
            return Err(DriverError::Navigation(format!("unknown url {}", url)));
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let mut portal = self.portal.lock();
        let mut page = self.live()?;

        match page.elements.get(selector) {
            Some(element) if element.visible => {}
            _ => return Err(DriverError::ElementNotFound(selector.to_string())),
        }

        let selectors = portal.config.selectors.clone();
        let provider = format!("https://{}/signin", portal.config.identity_provider_host);

        if selector == selectors.login_button {
            page.load(provider, BLANK_PAGE);
            match portal.login.clone() {
                LoginBehavior::Forbidden { code, title } => {
                    page.attach(&selectors.forbidden_code, code.unwrap_or_default());
                    page.attach(&selectors.forbidden_title, title.unwrap_or_default());
                }
                LoginBehavior::StallAfterLoginButton => {}
                _ => {
                    page.show(&selectors.identifier_input, "");
                    page.show(&selectors.identifier_submit, "Next");
                }
            }
        } else if selector == selectors.identifier_submit {
            page.elements.clear();
            if !matches!(portal.login, LoginBehavior::StallAfterIdentifier) {
                page.show(&selectors.passcode_input, "");
                page.show(&selectors.verify_button, "Verify");
            }
        } else if selector == selectors.verify_button {
            if let LoginBehavior::RejectPasscode(message) = portal.login.clone() {
                page.show(&selectors.sign_in_error, message);
            } else {
                let session = portal.mint_session();
                let provider_cookie = CookieRecord::new(
                    PROVIDER_COOKIE,
                    format!("idx-{}", portal.minted),
                    portal.config.identity_provider_host.clone(),
                );
                page.cookies.insert(session);
                page.cookies.insert(provider_cookie);
                portal.logins += 1;
                let landing = portal.config.portal_base_url.clone();
                page.load(landing, BLANK_PAGE);
            }
        }
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        _per_char_delay: Duration,
    ) -> Result<(), DriverError> {
        let mut portal = self.portal.lock();
        let mut page = self.live()?;
        let Some(element) = page.elements.get_mut(selector) else {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        };
        element.text.push_str(text);
        portal.typed.push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn wait_for_selector(&self, spec: &SelectorSpec) -> Result<(), DriverError> {
        if self.live()?.matches(spec)? {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                selector: spec.selector.clone(),
            })
        }
    }

    // Scripted pages never change after navigation, so one check settles the
    // race; per-selector deadlines are covered by `race_selectors`.
    async fn wait_for_any_of(&self, specs: &[SelectorSpec]) -> Result<usize, DriverError> {
        let page = self.live()?;
        for (index, spec) in specs.iter().enumerate() {
            if page.matches(spec)? {
                return Ok(index);
            }
        }
        Err(DriverError::Timeout {
            selector: specs
                .iter()
                .map(|s| s.selector.as_str())
                .collect::<Vec<_>>()
                .join(" | "),
        })
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        Ok(self
            .live()?
            .elements
            .get(selector)
            .map(|element| element.text.clone()))
    }

    async fn page_content(&self) -> Result<String, DriverError> {
        Ok(self.live()?.html.clone())
    }

    async fn read_cookies(&self) -> Result<SessionCookies, DriverError> {
        Ok(self.live()?.cookies.clone())
    }

    async fn write_cookies(&self, cookies: &SessionCookies) -> Result<(), DriverError> {
        self.live()?.cookies.merge(cookies.iter().cloned());
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.live()?.url.clone())
    }

    async fn dispose(&self) -> Result<(), DriverError> {
        self.live()?.disposed = true;
        self.portal.lock().drivers_disposed += 1;
        Ok(())
    }
}
