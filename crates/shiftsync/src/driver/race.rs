//! Per-selector deadlines for [`AutomationDriver::wait_for_any_of`].
//!
//! [`AutomationDriver::wait_for_any_of`]: super::AutomationDriver::wait_for_any_of

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::{DriverError, SelectorSpec};

/// Poll `specs` every `interval` until one of them matches.
///
/// `matches(index)` checks `specs[index]` once. A spec leaves the race when
/// its own timeout has elapsed, so a short-lived spec can expire while a
/// longer one still wins later. Returns the index of the first match, or
/// [`DriverError::Timeout`] naming every selector once all have expired.
pub async fn race_selectors<F, Fut>(
    specs: &[SelectorSpec],
    interval: Duration,
    mut matches: F,
) -> Result<usize, DriverError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<bool, DriverError>>,
{
    let started = Instant::now();
    loop {
        let elapsed = started.elapsed();
        let mut any_alive = false;

        for (index, spec) in specs.iter().enumerate() {
            if elapsed >= spec.timeout {
                continue;
            }
            any_alive = true;
            if matches(index).await? {
                return Ok(index);
            }
        }

        if !any_alive {
            let selector = specs
                .iter()
                .map(|s| s.selector.as_str())
                .collect::<Vec<_>>()
                .join(" | ");
            return Err(DriverError::Timeout { selector });
        }
        tokio::time::sleep(interval).await;
    }
}
