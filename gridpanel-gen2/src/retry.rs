//! Bounded exponential-backoff retry of transient failures.
//!
//! Only kinds classified retriable are swallowed, and only up to the policy's
//! budget; everything else propagates unchanged. The sleep routine is
//! replaceable process-wide for embedders whose host loop owns delays, and
//! injectable per call for tests.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use gridpanel_error::PanelResult;
use once_cell::sync::OnceCell;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

pub type SleepFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type SleepFn = fn(Duration) -> SleepFuture;

static SLEEP_FN: OnceCell<SleepFn> = OnceCell::new();

fn runtime_sleep(delay: Duration) -> SleepFuture {
    Box::pin(tokio::time::sleep(delay))
}

/// Install a process-wide sleep routine. May be called once, before any
/// client issues requests; later calls are ignored and return `false`.
pub fn set_sleep_fn(sleep: SleepFn) -> bool {
    SLEEP_FN.set(sleep).is_ok()
}

fn configured_sleep() -> SleepFn {
    SLEEP_FN.get().copied().unwrap_or(runtime_sleep)
}

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts beyond the first; total attempts = `1 + max_retries`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Deterministic schedule: `initial * multiplier^n`, no jitter.
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_delay.max(Duration::from_millis(1)),
            max_interval: Duration::from_secs(3600),
            randomization_factor: 0.0,
            multiplier: self.multiplier.max(1.0),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Run `op`, retrying transient failures per `policy` with the process-wide
/// sleep routine.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, op: F) -> PanelResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PanelResult<T>>,
{
    retry_with_sleep(policy, configured_sleep(), op).await
}

/// As [`with_retries`] but with an explicit sleep routine.
pub async fn retry_with_sleep<T, F, Fut, S>(
    policy: &RetryPolicy,
    sleep: S,
    mut op: F,
) -> PanelResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PanelResult<T>>,
    S: Fn(Duration) -> SleepFuture,
{
    let mut schedule = policy.schedule();
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retriable() && attempt < policy.max_retries => {
                let delay = schedule.next_backoff().unwrap_or(policy.initial_delay);
                attempt += 1;
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure; retrying"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
