//! [`AutomationDriver`] over the W3C WebDriver protocol.
//!
//! Talks to a running WebDriver server (chromedriver, geckodriver, selenium)
//! through `fantoccini`. Each [`WebDriverFactory::create`] opens a new browser
//! session, so concurrent calls never share a page or a cookie jar.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fantoccini::elements::Element;
use fantoccini::error::CmdError;
use fantoccini::{Client, ClientBuilder, Locator};
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument, trace};

use super::{
    AutomationDriver, DriverError, DriverFactory, SelectorSpec, WaitPolicy, race_selectors,
};
use crate::cookies::{CookieRecord, SameSite, SessionCookies};

pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:4444";

/// Interval between element lookups while waiting.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Quiet period after load for [`WaitPolicy::NetworkIdle`].
const IDLE_QUIET_PERIOD: Duration = Duration::from_millis(500);

/// Budget for `document.readyState` to reach `complete`.
const READY_STATE_TIMEOUT: Duration = Duration::from_secs(30);

impl From<CmdError> for DriverError {
    fn from(err: CmdError) -> Self {
        if err.is_no_such_element() {
            DriverError::ElementNotFound(err.to_string())
        } else {
            DriverError::Protocol(err.to_string())
        }
    }
}

/// Opens a new WebDriver session per call.
#[derive(Debug, Clone)]
pub struct WebDriverFactory {
    webdriver_url: String,
    headless: bool,
}

impl WebDriverFactory {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            headless: true,
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    fn capabilities(&self) -> Map<String, Value> {
        let mut args = vec!["--disable-gpu", "--no-sandbox", "--window-size=1280,1024"];
        if self.headless {
            args.push("--headless=new");
        }

        let mut caps = Map::new();
        caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
        caps
    }
}

impl Default for WebDriverFactory {
    fn default() -> Self {
        Self::new(DEFAULT_WEBDRIVER_URL)
    }
}

#[async_trait]
impl DriverFactory for WebDriverFactory {
    #[instrument(skip(self), fields(webdriver = %self.webdriver_url))]
    async fn create(&self) -> Result<Box<dyn AutomationDriver>, DriverError> {
        let client = ClientBuilder::native()
            .capabilities(self.capabilities())
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| DriverError::Protocol(format!("failed to open session: {}", e)))?;

        debug!("WebDriver session opened");
        Ok(Box::new(WebDriverSession::new(client)))
    }
}

/// One WebDriver browser session.
pub struct WebDriverSession {
    client: Mutex<Option<Client>>,
}

impl WebDriverSession {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }

    fn client(&self) -> Result<Client, DriverError> {
        self.client.lock().clone().ok_or(DriverError::Disposed)
    }

    async fn find(&self, selector: &str) -> Result<Option<Element>, DriverError> {
        match self.client()?.find(Locator::Css(selector)).await {
            Ok(element) => Ok(Some(element)),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_required(&self, selector: &str) -> Result<Element, DriverError> {
        self.find(selector)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))
    }

    async fn is_present(&self, spec: &SelectorSpec) -> Result<bool, DriverError> {
        match self.find(&spec.selector).await? {
            Some(element) => Ok(!spec.visible || element.is_displayed().await.unwrap_or(false)),
            None => Ok(false),
        }
    }

    /// Poll until the spec matches. No timeout of its own.
    async fn poll_until_present(&self, spec: &SelectorSpec) -> Result<(), DriverError> {
        while !self.is_present(spec).await? {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    async fn wait_ready_state(&self, client: &Client) -> Result<(), DriverError> {
        let ready = async {
            loop {
                let state = client
                    .execute("return document.readyState", vec![])
                    .await?;
                if state.as_str() == Some("complete") {
                    return Ok::<(), DriverError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(READY_STATE_TIMEOUT, ready)
            .await
            .map_err(|_| DriverError::Navigation("page never finished loading".to_string()))?
    }
}

#[async_trait]
impl AutomationDriver for WebDriverSession {
    async fn navigate(&self, url: &str, wait: WaitPolicy) -> Result<(), DriverError> {
        let client = self.client()?;
        client
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation(e.to_string()))?;

        if wait == WaitPolicy::NetworkIdle {
            self.wait_ready_state(&client).await?;
            tokio::time::sleep(IDLE_QUIET_PERIOD).await;
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.find_required(selector).await?.click().await?;
        Ok(())
    }

    async fn type_text(
        &self,
        selector: &str,
        text: &str,
        per_char_delay: Duration,
    ) -> Result<(), DriverError> {
        let element = self.find_required(selector).await?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            element.send_keys(ch.encode_utf8(&mut buf)).await?;
            if !per_char_delay.is_zero() {
                tokio::time::sleep(per_char_delay).await;
            }
        }
        Ok(())
    }

    async fn wait_for_selector(&self, spec: &SelectorSpec) -> Result<(), DriverError> {
        trace!(selector = %spec.selector, timeout = ?spec.timeout, "Waiting for selector");
        tokio::time::timeout(spec.timeout, self.poll_until_present(spec))
            .await
            .map_err(|_| DriverError::Timeout {
                selector: spec.selector.clone(),
            })?
    }

    async fn wait_for_any_of(&self, specs: &[SelectorSpec]) -> Result<usize, DriverError> {
        race_selectors(specs, POLL_INTERVAL, |index| self.is_present(&specs[index])).await
    }

    async fn read_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        match self.find(selector).await? {
            Some(element) => Ok(Some(element.text().await?)),
            None => Ok(None),
        }
    }

    async fn page_content(&self) -> Result<String, DriverError> {
        Ok(self.client()?.source().await?)
    }

    async fn read_cookies(&self) -> Result<SessionCookies, DriverError> {
        let cookies = self.client()?.get_all_cookies().await?;
        Ok(cookies.iter().map(record_from_cookie).collect())
    }

    async fn write_cookies(&self, cookies: &SessionCookies) -> Result<(), DriverError> {
        let client = self.client()?;
        for record in cookies {
            client.add_cookie(cookie_from_record(record)).await?;
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        Ok(self.client()?.current_url().await?.to_string())
    }

    async fn dispose(&self) -> Result<(), DriverError> {
        let client = self.client.lock().take().ok_or(DriverError::Disposed)?;
        client.close().await?;
        debug!("WebDriver session closed");
        Ok(())
    }
}

fn record_from_cookie(cookie: &cookie::Cookie<'_>) -> CookieRecord {
    let same_site = match cookie.same_site() {
        Some(cookie::SameSite::Strict) => SameSite::Strict,
        Some(cookie::SameSite::Lax) => SameSite::Lax,
        Some(cookie::SameSite::None) => SameSite::None,
        None => SameSite::Unset,
    };

    let mut record = CookieRecord::new(
        cookie.name(),
        cookie.value(),
        cookie.domain().unwrap_or_default(),
    )
    .with_path(cookie.path().unwrap_or("/"))
    .secure(cookie.secure().unwrap_or(false))
    .http_only(cookie.http_only().unwrap_or(false))
    .with_same_site(same_site);

    if let Some(expires) = cookie
        .expires_datetime()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
    {
        record = record.expires_at(expires);
    }
    record
}

fn cookie_from_record(record: &CookieRecord) -> cookie::Cookie<'static> {
    let mut builder = cookie::Cookie::build((record.name.clone(), record.value.clone()))
        .path(record.path.clone())
        .secure(record.secure)
        .http_only(record.http_only);

    if !record.domain.is_empty() {
        builder = builder.domain(record.domain.clone());
    }

    builder = match record.same_site {
        SameSite::Strict => builder.same_site(cookie::SameSite::Strict),
        SameSite::Lax => builder.same_site(cookie::SameSite::Lax),
        SameSite::None => builder.same_site(cookie::SameSite::None),
        SameSite::Unset => builder,
    };

    if let Some(expires) = record
        .expires_at
        .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.timestamp()).ok())
    {
        builder = builder.expires(expires);
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_conversion_keeps_attributes() {
        let expires = DateTime::<Utc>::from_timestamp(1_767_225_600, 0).unwrap();
        let record = CookieRecord::new("SESSION", "abc", "schedule.example.org")
            .with_path("/schedule")
            .secure(true)
            .http_only(true)
            .with_same_site(SameSite::Lax)
            .expires_at(expires);

        let cookie = cookie_from_record(&record);
        assert_eq!(cookie.name(), "SESSION");
        assert_eq!(cookie.domain(), Some("schedule.example.org"));
        assert_eq!(cookie.same_site(), Some(cookie::SameSite::Lax));

        assert_eq!(record_from_cookie(&cookie), record);
    }

    #[test]
    fn test_cookie_without_attributes() {
        let cookie = cookie::Cookie::new("flag", "1");
        let record = record_from_cookie(&cookie);

        assert_eq!(record.path, "/");
        assert_eq!(record.domain, "");
        assert_eq!(record.same_site, SameSite::Unset);
        assert!(record.expires_at.is_none());
    }

    #[test]
    fn test_headless_capabilities() {
        let caps = WebDriverFactory::default().capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));

        let caps = WebDriverFactory::default().headless(false).capabilities();
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(!args.iter().any(|a| a == "--headless=new"));
    }
}
