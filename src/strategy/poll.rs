//! Fixed-delay retry loop around operations whose completion is observed
//! externally: order fills, on-chain withdrawals, deposit recognition.

use std::future::Future;
use std::time::Duration;

use crate::error::CycleError;

/// One observation of an asynchronously completing operation.
pub enum Probe<T> {
    /// Terminal success.
    Ready(T),
    /// Not finished yet, or a transient submission error; probe again after
    /// the delay.
    Retry,
    /// Terminal negative confirmation. The cycle must abort.
    Abort(String),
}

/// Retry policy for one class of wait. `max_attempts: None` retries until a
/// terminal probe result, which matches the venue-transfer semantics (a
/// withdrawal stuck in "processing" is not a failure); a bounded policy turns
/// exhaustion into a fatal abort.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    pub fn every_secs(secs: u64) -> Self {
        Self {
            delay: Duration::from_secs(secs),
            max_attempts: None,
        }
    }

    pub fn every_millis(ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(ms),
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Run `probe` until it reports a terminal state. An `Err` from the probe
    /// is an unclassified venue failure and propagates; transient conditions
    /// must be mapped to `Probe::Retry` by the caller, who has the context to
    /// tell them apart.
    pub async fn run<T, F, Fut>(&self, what: &str, mut probe: F) -> Result<T, CycleError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, CycleError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            match probe().await? {
                Probe::Ready(value) => return Ok(value),
                Probe::Abort(reason) => return Err(CycleError::Fatal(reason)),
                Probe::Retry => {}
            }

            attempts += 1;
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(CycleError::Fatal(format!(
                        "{} unresolved after {} attempts",
                        what, max
                    )));
                }
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}
