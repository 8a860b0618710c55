//! Bounded reconnect with exponential backoff.

use std::time::Duration;

use tokio::sync::watch;
use tracing::warn;

use super::{Transport, TransportError};

/// How often and how patiently a transport is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total open attempts, including the first.
    pub attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Ceiling for the doubling delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max.max(initial);
        self
    }

    /// Delay after the `failure`-th failed attempt (1-based).
    pub fn delay(&self, failure: u32) -> Duration {
        let factor = 2u32.saturating_pow(failure.saturating_sub(1));
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Open `transport`, retrying retryable failures with backoff.
///
/// Gives up early if `shutdown` flips to `true` while waiting.
pub async fn open_with_retry<T: Transport + ?Sized>(
    transport: &mut T,
    policy: &RetryPolicy,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let mut failure = 0;
    loop {
        let err = match transport.open().await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        failure += 1;
        if !err.is_retryable() || failure >= policy.attempts {
            return Err(err);
        }

        let delay = policy.delay(failure);
        warn!(
            transport = %transport.describe(),
            attempt = failure,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "open failed, retrying"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(_) = shutdown.wait_for(|stop| *stop) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_secs(1));
        assert_eq!(policy.delay(4), Duration::from_secs(4));
        assert_eq!(policy.delay(5), Duration::from_secs(8));
        assert_eq!(policy.delay(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let (mut transport, _handle) = MemoryTransport::pair(4);
        transport.fail_next_opens(2, || TransportError::PortBusy {
            address: "mem".into(),
        });
        let (_tx, mut rx) = watch::channel(false);

        open_with_retry(&mut transport, &RetryPolicy::default(), &mut rx)
            .await
            .unwrap();
        assert_eq!(transport.open_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bounded_attempts() {
        let (mut transport, _handle) = MemoryTransport::pair(4);
        transport.fail_next_opens(10, || TransportError::NoPortAvailable {
            address: "mem".into(),
        });
        let (_tx, mut rx) = watch::channel(false);
        let policy = RetryPolicy::default().with_attempts(3);

        let err = open_with_retry(&mut transport, &policy, &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoPortAvailable { .. }));
        assert_eq!(transport.open_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_backoff() {
        let (mut transport, _handle) = MemoryTransport::pair(4);
        transport.fail_next_opens(10, || TransportError::lost("down"));
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = open_with_retry(&mut transport, &RetryPolicy::default(), &mut rx).await;
        assert!(err.is_err());
        assert_eq!(transport.open_calls(), 1);
    }
}
