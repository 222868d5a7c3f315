//! Retry decorator over any balancer.
//!
//! # Design Decisions
//! - One forward per online server at the time of the first attempt
//! - Each attempt goes back through the inner balancer, so it sees the
//!   live snapshot rather than the one the first attempt used
//! - Cancellation is checked before every attempt and during every delay

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::load_balancer::Balancer;
use crate::observability::metrics;
use crate::upstream::{ServerDiscovery, ServerRef};

/// Wait between two attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryDelay {
    #[default]
    None,
    Fixed(Duration),
    /// `base * 2^(n-1)` capped at `max`, plus up to 10% jitter.
    Exponential { base: Duration, max: Duration },
}

impl RetryDelay {
    /// Delay before retry number `retry` (1-based).
    pub fn for_retry(&self, retry: u32) -> Duration {
        match *self {
            RetryDelay::None => Duration::ZERO,
            RetryDelay::Fixed(d) => d,
            RetryDelay::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(retry.saturating_sub(1));
                let capped = base.saturating_mul(factor).min(max);
                let jitter_range = capped.as_millis() as u64 / 10;
                let jitter = if jitter_range > 0 {
                    rand::thread_rng().gen_range(0..jitter_range)
                } else {
                    0
                };
                capped + Duration::from_millis(jitter)
            }
        }
    }
}

/// Retries failed forwards through the wrapped balancer.
#[derive(Debug)]
pub struct Retry {
    inner: Arc<dyn Balancer>,
    delay: RetryDelay,
    policy: String,
}

impl Retry {
    pub fn new(inner: Arc<dyn Balancer>) -> Self {
        let policy = format!("retry_{}", inner.policy());
        Self {
            inner,
            delay: RetryDelay::None,
            policy,
        }
    }

    pub fn with_delay(mut self, delay: RetryDelay) -> Self {
        self.delay = delay;
        self
    }

    pub fn inner(&self) -> &Arc<dyn Balancer> {
        &self.inner
    }

    /// Sleep for `delay`, returning early with the scope's error if it ends first.
    /// Takes the scope by value: the context itself is not `Sync`.
    async fn pause(token: CancellationToken, deadline: Option<Instant>, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return Ok(());
        }
        let wake = Instant::now() + delay;
        match deadline {
            Some(deadline) if deadline <= wake => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Canceled),
                    _ = tokio::time::sleep_until(deadline) => Err(Error::Timeout),
                }
            }
            _ => {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::Canceled),
                    _ = tokio::time::sleep_until(wake) => Ok(()),
                }
            }
        }
    }
}

#[async_trait]
impl Balancer for Retry {
    fn policy(&self) -> &str {
        &self.policy
    }

    fn select(&self, ctx: &RequestContext, servers: &[ServerRef]) -> Option<ServerRef> {
        self.inner.select(ctx, servers)
    }

    async fn forward(&self, ctx: &mut RequestContext, discovery: &dyn ServerDiscovery) -> Result<()> {
        let attempts = discovery.online_num();
        if attempts <= 1 {
            return self.inner.forward(ctx, discovery).await;
        }

        let mut last_error = Error::NoAvailableServers;
        for attempt in 0..attempts {
            ctx.check_done()?;
            if attempt > 0 {
                metrics::record_retry(&self.policy);
                tracing::debug!(
                    policy = %self.policy,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    error = %last_error,
                    "Retrying forward"
                );
                let delay = self.delay.for_retry(attempt as u32);
                Self::pause(ctx.cancel_token().clone(), ctx.deadline(), delay).await?;
            }

            match self.inner.forward(ctx, discovery).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_terminal() => return Err(err),
                Err(err) => last_error = err,
            }
        }
        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthCheckInfo;
    use crate::load_balancer::{LeastConn, RoundRobin};
    use crate::test_support::StaticServer;
    use crate::upstream::{Server, ServerStatus, ServersManager, StaticDiscovery};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Weak;

    /// Fails and takes itself offline in its registry.
    struct Dropout {
        id: String,
        registry: Weak<ServersManager>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl Server for Dropout {
        fn id(&self) -> &str {
            &self.id
        }

        async fn check(&self, _info: &HealthCheckInfo) -> Result<()> {
            Ok(())
        }

        async fn serve(&self, _ctx: &mut RequestContext) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(registry) = self.registry.upgrade() {
                registry.set_server_status(&self.id, ServerStatus::Offline);
            }
            Err(Error::forward(&self.id, "went away"))
        }
    }

    fn failing(n: usize) -> (Vec<Arc<StaticServer>>, StaticDiscovery) {
        let servers: Vec<Arc<StaticServer>> = (0..n)
            .map(|i| {
                let s = StaticServer::new(&format!("s{i}"), 1);
                s.set_failing(true);
                s
            })
            .collect();
        let refs = servers.iter().cloned().map(StaticServer::into_ref).collect();
        (servers, StaticDiscovery::new(refs))
    }

    fn total_calls(servers: &[Arc<StaticServer>]) -> u64 {
        servers.iter().map(|s| s.calls()).sum()
    }

    #[tokio::test]
    async fn test_attempts_once_per_server() {
        let (servers, discovery) = failing(4);
        let retry = Retry::new(Arc::new(RoundRobin::new()));
        assert_eq!(retry.policy(), "retry_round_robin");

        let mut ctx = RequestContext::new();
        let err = retry.forward(&mut ctx, &discovery).await.unwrap_err();
        assert!(matches!(err, Error::Forward { .. }));
        assert_eq!(total_calls(&servers), 4);
        // Round robin spreads the attempts over every server.
        assert!(servers.iter().all(|s| s.calls() == 1));
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let (servers, discovery) = failing(3);
        servers[2].set_failing(false);
        let retry = Retry::new(Arc::new(RoundRobin::new()));

        let mut ctx = RequestContext::new();
        retry.forward(&mut ctx, &discovery).await.unwrap();
        assert!(ctx.response.is_some());
        assert_eq!(total_calls(&servers), 3);
    }

    #[tokio::test]
    async fn test_canceled_context_stops_retrying() {
        let (servers, discovery) = failing(5);
        let retry = Retry::new(Arc::new(RoundRobin::new()));

        let mut ctx = RequestContext::new();
        ctx.cancel();
        let err = retry.forward(&mut ctx, &discovery).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert_eq!(total_calls(&servers), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_delay() {
        let (servers, discovery) = failing(3);
        let retry = Retry::new(Arc::new(RoundRobin::new()))
            .with_delay(RetryDelay::Fixed(Duration::from_secs(30)));

        let mut ctx = RequestContext::new();
        let token = ctx.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let started = std::time::Instant::now();
        let err = retry.forward(&mut ctx, &discovery).await.unwrap_err();
        assert!(matches!(err, Error::Canceled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(total_calls(&servers), 1);
    }

    #[tokio::test]
    async fn test_deadline_cuts_delay_short() {
        let (servers, discovery) = failing(3);
        let retry = Retry::new(Arc::new(RoundRobin::new()))
            .with_delay(RetryDelay::Fixed(Duration::from_secs(30)));

        let mut ctx = RequestContext::new();
        ctx.set_deadline(Some(Instant::now() + Duration::from_millis(30)));
        let err = retry.forward(&mut ctx, &discovery).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(total_calls(&servers), 1);
    }

    #[tokio::test]
    async fn test_each_attempt_sees_live_servers() {
        let registry = Arc::new(ServersManager::new());
        let servers: Vec<Arc<Dropout>> = ["a", "b", "c"]
            .into_iter()
            .map(|id| {
                Arc::new(Dropout {
                    id: id.to_string(),
                    registry: Arc::downgrade(&registry),
                    calls: AtomicU64::new(0),
                })
            })
            .collect();
        registry.reset_servers(servers.iter().map(|s| Arc::clone(s) as ServerRef));

        // Equal loads make least_conn pick the first online server every time.
        let retry = Retry::new(Arc::new(LeastConn::new()));
        let mut ctx = RequestContext::new();
        let result = retry.forward(&mut ctx, registry.as_ref()).await;

        assert!(matches!(result, Err(Error::Forward { .. })));
        for server in &servers {
            assert_eq!(server.calls.load(Ordering::SeqCst), 1, "server {}", server.id);
        }
        assert_eq!(registry.online_num(), 0);
    }

    #[tokio::test]
    async fn test_single_server_forwarded_once() {
        let (servers, discovery) = failing(1);
        let retry = Retry::new(Arc::new(RoundRobin::new()));

        let mut ctx = RequestContext::new();
        assert!(retry.forward(&mut ctx, &discovery).await.is_err());
        assert_eq!(total_calls(&servers), 1);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let retry = Retry::new(Arc::new(RoundRobin::new()));
        let mut ctx = RequestContext::new();
        let err = retry
            .forward(&mut ctx, &StaticDiscovery::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoAvailableServers));
    }

    #[test]
    fn test_exponential_delay() {
        let delay = RetryDelay::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        let first = delay.for_retry(1);
        assert!(first >= Duration::from_millis(100) && first < Duration::from_millis(110));
        assert!(delay.for_retry(2) >= Duration::from_millis(200));
        let capped = delay.for_retry(10);
        assert!(capped >= Duration::from_millis(1000) && capped < Duration::from_millis(1100));
        assert_eq!(RetryDelay::None.for_retry(3), Duration::ZERO);
    }
}
