//! Wait-for-ACTIVE gate.
//!
//! Octavia applies changes to a load balancer one at a time and rejects new
//! mutations while the previous one is still provisioning. Every mutating
//! call in this crate is therefore followed by [`SettleWaiter::settle`].

use std::sync::Arc;
use std::time::Duration;

use octavia_api::{LoadBalancerApi, ProvisioningStatus};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::error::SettleError;

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time to wait for ACTIVE.
pub const DEFAULT_SETTLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of times a timed-out wait is restarted.
pub const DEFAULT_TIMEOUT_RETRIES: u32 = 1;

/// Settle waiter parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettleConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// How many times [`SettleWaiter::settle`] restarts a timed-out wait.
    pub timeout_retries: u32,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_SETTLE_TIMEOUT,
            timeout_retries: DEFAULT_TIMEOUT_RETRIES,
        }
    }
}

impl SettleConfig {
    /// Minimum number of status checks before a wait may time out.
    fn min_polls(&self) -> u32 {
        let interval = self.poll_interval.as_millis().max(1);
        let polls = self.timeout.as_millis() / interval;
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }
}

/// Polls a load balancer's provisioning status until it is ACTIVE.
#[derive(Clone)]
pub struct SettleWaiter {
    api: Arc<dyn LoadBalancerApi>,
    config: SettleConfig,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SettleWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettleWaiter")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl SettleWaiter {
    pub fn new(
        api: Arc<dyn LoadBalancerApi>,
        config: SettleConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &SettleConfig {
        &self.config
    }

    /// Waits until the load balancer is ACTIVE.
    ///
    /// The first check happens one poll interval after the call. A wait
    /// times out once the timeout has elapsed and at least
    /// `timeout / poll_interval` checks were made, so a slow control plane
    /// never shortens the number of checks.
    ///
    /// # Errors
    ///
    /// - [`SettleError::ErrorState`] when the load balancer reports ERROR
    /// - [`SettleError::Timeout`] with the last observed status
    /// - [`SettleError::Api`] when a status poll fails (not retried)
    /// - [`SettleError::Cancelled`] when the cancellation token fires
    #[instrument(skip(self))]
    pub async fn wait_active(
        &self,
        load_balancer_id: &str,
    ) -> Result<ProvisioningStatus, SettleError> {
        let started = Instant::now();
        let min_polls = self.config.min_polls();
        let mut polls: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(SettleError::Cancelled {
                        load_balancer_id: load_balancer_id.to_string(),
                    });
                }
                _ = sleep(self.config.poll_interval) => {}
            }

            let status = self.poll(load_balancer_id).await?;
            polls += 1;

            match status {
                ProvisioningStatus::Active => {
                    debug!(polls, "Load balancer is ACTIVE");
                    return Ok(status);
                }
                ProvisioningStatus::Error => {
                    return Err(SettleError::ErrorState {
                        load_balancer_id: load_balancer_id.to_string(),
                    });
                }
                pending => {
                    if started.elapsed() >= self.config.timeout && polls >= min_polls {
                        return Err(SettleError::Timeout {
                            load_balancer_id: load_balancer_id.to_string(),
                            last_status: pending,
                            polls,
                        });
                    }
                    debug!(polls, status = %pending, "Load balancer still provisioning");
                }
            }
        }
    }

    /// Returns at once if the load balancer is already ACTIVE, otherwise
    /// waits like [`Self::wait_active`].
    #[instrument(skip(self))]
    pub async fn ensure_active(
        &self,
        load_balancer_id: &str,
    ) -> Result<ProvisioningStatus, SettleError> {
        if self.cancel.is_cancelled() {
            return Err(SettleError::Cancelled {
                load_balancer_id: load_balancer_id.to_string(),
            });
        }

        match self.poll(load_balancer_id).await? {
            ProvisioningStatus::Active => Ok(ProvisioningStatus::Active),
            ProvisioningStatus::Error => Err(SettleError::ErrorState {
                load_balancer_id: load_balancer_id.to_string(),
            }),
            status => {
                debug!(status = %status, "Load balancer busy, waiting before first mutation");
                self.wait_active(load_balancer_id).await
            }
        }
    }

    /// Waits for ACTIVE after the mutation named by `after`, restarting a
    /// timed-out wait up to `timeout_retries` times.
    pub async fn settle(
        &self,
        load_balancer_id: &str,
        after: &str,
    ) -> Result<ProvisioningStatus, SettleError> {
        let mut attempt = 0;
        loop {
            match self.wait_active(load_balancer_id).await {
                Err(SettleError::Timeout {
                    last_status, polls, ..
                }) if attempt < self.config.timeout_retries => {
                    attempt += 1;
                    warn!(
                        load_balancer_id,
                        after,
                        status = %last_status,
                        polls,
                        attempt,
                        "Settle timed out, waiting again"
                    );
                }
                result => return result,
            }
        }
    }

    async fn poll(&self, load_balancer_id: &str) -> Result<ProvisioningStatus, SettleError> {
        self.api
            .get_load_balancer(load_balancer_id)
            .await
            .map(|lb| lb.provisioning_status)
            .map_err(|source| SettleError::Api {
                load_balancer_id: load_balancer_id.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octavia_api::ApiError;
    use octavia_test::{load_balancer, FailPoint, FakeLoadBalancerApi};
    use pretty_assertions::assert_eq;

    fn waiter(fake: &Arc<FakeLoadBalancerApi>, config: SettleConfig) -> SettleWaiter {
        SettleWaiter::new(fake.clone(), config, CancellationToken::new())
    }

    fn fake() -> Arc<FakeLoadBalancerApi> {
        let fake = FakeLoadBalancerApi::new();
        fake.add_load_balancer(load_balancer("lb-1"));
        Arc::new(fake)
    }

    fn short() -> SettleConfig {
        SettleConfig {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
            timeout_retries: 0,
        }
    }

    #[test]
    fn test_default_config() {
        let config = SettleConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.timeout_retries, 1);
        assert_eq!(config.min_polls(), 150);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_check_after_one_interval() {
        let fake = fake();
        let started = Instant::now();

        let status = waiter(&fake, short()).wait_active("lb-1").await.unwrap();

        assert_eq!(status, ProvisioningStatus::Active);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert_eq!(fake.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_expected_polls() {
        let fake = fake();
        fake.force_status("lb-1", ProvisioningStatus::PendingUpdate);

        let err = waiter(&fake, short()).wait_active("lb-1").await.unwrap_err();

        match err {
            SettleError::Timeout {
                last_status, polls, ..
            } => {
                assert_eq!(last_status, ProvisioningStatus::PendingUpdate);
                assert_eq!(polls, 5);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(fake.status_polls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_is_terminal() {
        let fake = fake();
        fake.force_status("lb-1", ProvisioningStatus::Error);

        let err = waiter(&fake, short()).wait_active("lb-1").await.unwrap_err();
        assert!(matches!(err, SettleError::ErrorState { .. }));
        assert_eq!(fake.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_is_not_retried() {
        let fake = fake();
        fake.fail_next(FailPoint::GetLoadBalancer, ApiError::api(503, "unavailable"));

        let err = waiter(&fake, short()).wait_active("lb-1").await.unwrap_err();
        assert!(matches!(err, SettleError::Api { .. }));
        assert_eq!(fake.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_retries_timeout() {
        let fake = fake();
        fake.force_status("lb-1", ProvisioningStatus::PendingUpdate);
        let config = SettleConfig {
            timeout_retries: 2,
            ..short()
        };

        let err = waiter(&fake, config).settle("lb-1", "pool create").await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(fake.status_polls(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_active_returns_immediately() {
        let fake = fake();
        let started = Instant::now();

        waiter(&fake, short()).ensure_active("lb-1").await.unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(fake.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let fake = fake();
        fake.force_status("lb-1", ProvisioningStatus::PendingUpdate);
        let cancel = CancellationToken::new();
        let waiter = SettleWaiter::new(fake.clone(), SettleConfig::default(), cancel.clone());

        let handle = tokio::spawn(async move { waiter.wait_active("lb-1").await });
        sleep(Duration::from_secs(5)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, SettleError::Cancelled { .. }));
        assert_eq!(fake.status_polls(), 2);
    }
}
