use std::ops::Deref;

use tracing::{debug, warn};

use super::{AutomationDriver, DriverError, DriverFactory};

/// Owns a driver for the length of one call.
///
/// [`release`](Self::release) disposes it on the normal path. If the scope is
/// dropped without being released (an early return that skipped release, or
/// the enclosing future being cancelled) disposal is spawned on the current
/// tokio runtime instead.
pub struct DriverScope {
    driver: Option<Box<dyn AutomationDriver>>,
}

impl DriverScope {
    pub async fn acquire(factory: &dyn DriverFactory) -> Result<Self, DriverError> {
        let driver = factory.create().await?;
        debug!("Automation driver acquired");
        Ok(Self {
            driver: Some(driver),
        })
    }

    /// Dispose the driver now.
    pub async fn release(mut self) {
        if let Some(driver) = self.driver.take() {
            match driver.dispose().await {
                Ok(()) => debug!("Automation driver disposed"),
                Err(e) => warn!(error = %e, "Failed to dispose automation driver"),
            }
        }
    }
}

impl Deref for DriverScope {
    type Target = dyn AutomationDriver;

    fn deref(&self) -> &Self::Target {
        // Only `release` and `drop` take the driver, and both consume the scope.
        self.driver
            .as_deref()
            .expect("driver is present until the scope is consumed")
    }
}

impl Drop for DriverScope {
    fn drop(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Driver scope dropped before release; disposing in background");
                handle.spawn(async move {
                    if let Err(e) = driver.dispose().await {
                        warn!(error = %e, "Failed to dispose automation driver");
                    }
                });
            }
            Err(_) => warn!("Driver scope dropped outside a runtime; driver not disposed"),
        }
    }
}
