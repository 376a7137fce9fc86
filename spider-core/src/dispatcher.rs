//! The dispatcher loop: an interval-paced drain of the scheduler, publishing
//! batches to agent topics over the message bus.
//!
//! Mirrors the teacher crate's `DownloadEngine::process_queue_interruptible_with_options`
//! shape — a loop that dequeues, checks a shutdown flag, and publishes —
//! generalized from a semaphore-bounded concurrent downloader to an
//! interval-paced publisher, since here the actual download happens out of
//! process on the agent side.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, instrument, warn};

use crate::admission::add_requests;
use crate::config::{SpiderConfig, MIN_PROXY_SCORE};
use crate::contracts::{ApplicationLifetime, MessageBus, ProxyPool, SchedulerStore, StatisticsClient};
use crate::error::CoreError;
use crate::inflight::RequestedQueue;
use crate::message::MessageCodec;
use crate::request::{Policy, Request, DEFAULT_DOWNLOADER_TYPE};

/// User hook invoked on every request immediately before publish, giving the
/// host program a chance to tweak headers, proxy hints, etc.
pub trait RequestConfigurer: Send + Sync {
    /// Mutates `request` in place.
    fn configure(&self, request: &mut Request);
}

/// Default [`RequestConfigurer`] that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfigurer;

impl RequestConfigurer for NoopConfigurer {
    fn configure(&self, _request: &mut Request) {}
}

/// Why the dispatcher loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchExit {
    /// The scheduler stayed empty for longer than `empty_sleep_time`.
    Drained,
    /// The in-flight count stayed above `requested_queue_count` for longer
    /// than `empty_sleep_time`.
    PausedTooLong,
    /// `use_proxy` is enabled and the proxy pool returned no lease.
    NoProxy,
    /// The lifetime's cancellation signal was observed.
    Cancelled,
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Picks the outbound topic for a request about to be published, per §4.4:
/// a blank `agent` (or `Policy::Random`) goes to the downloader type's
/// topic; `Policy::Chained` pins to the agent that served the parent.
///
/// Statically typed `Policy` closes the "any other policy" failure mode the
/// distilled spec describes for an open string-typed policy field; that
/// case only remains reachable at the wire-decode boundary
/// ([`crate::message::RequestDecodeError::UnsupportedPolicy`]), not here.
#[must_use]
pub fn choose_topic(request: &Request) -> String {
    if request.agent.is_empty() {
        return request.downloader_type_or_default().to_uppercase();
    }
    match request.policy {
        Policy::Chained => request.agent.to_uppercase(),
        Policy::Random => request.downloader_type_or_default().to_uppercase(),
    }
}

/// Publishes one request per §4.4.
///
/// Returns `Ok(true)` if the request was published (or silently dropped as
/// an in-flight duplicate), `Ok(false)` if `use_proxy` is enabled and no
/// proxy lease was available (a terminal condition for the caller).
pub(crate) async fn publish_request(
    request: &mut Request,
    config: &SpiderConfig,
    proxy_pool: Option<&dyn ProxyPool>,
    inflight: &RequestedQueue,
    bus: &dyn MessageBus,
    codec: &dyn MessageCodec,
) -> Result<bool, CoreError> {
    if config.use_proxy {
        let lease = match proxy_pool {
            Some(pool) => pool.lease(MIN_PROXY_SCORE).await,
            None => None,
        };
        match lease {
            Some(proxy) => request.proxy = Some(proxy),
            None => return Ok(false),
        }
    }

    request.timestamp = now_ms();
    let topic = choose_topic(request);

    if !inflight.enqueue(request.clone()) {
        debug!(hash = %request.hash, "duplicate in-flight request dropped at publish");
        return Ok(true);
    }

    let payload = codec.encode_request(request);
    bus.publish(&topic, payload)
        .await
        .map_err(CoreError::MessageBus)?;
    Ok(true)
}

/// Dependencies the dispatcher loop needs, bundled so [`run`] takes one
/// argument instead of eight.
pub struct DispatcherDeps {
    pub spider_id: String,
    pub config: SpiderConfig,
    pub scheduler: Arc<dyn SchedulerStore>,
    pub bus: Arc<dyn MessageBus>,
    pub codec: Arc<dyn MessageCodec>,
    pub inflight: Arc<RequestedQueue>,
    pub stats: Arc<dyn StatisticsClient>,
    pub proxy_pool: Option<Arc<dyn ProxyPool>>,
    pub lifetime: Arc<dyn ApplicationLifetime>,
    pub configurer: Arc<dyn RequestConfigurer>,
}

/// Runs the dispatcher loop until a terminal condition is hit, per §4.3.
#[instrument(skip(deps), fields(spider_id = %deps.spider_id))]
pub async fn run(deps: &DispatcherDeps) -> DispatchExit {
    let (interval_ms, batch_size) = deps.config.pacing();
    let interval = Duration::from_millis(interval_ms);
    let sleep_limit_ms = deps.config.sleep_limit_ms();
    let request_timeout = Duration::from_millis(deps.config.request_timeout_ms);

    let mut paused_ms: u64 = 0;
    let mut idle_ms: u64 = 0;
    let mut print_accum_ms: u64 = 0;

    loop {
        if deps.lifetime.is_stopping() {
            return DispatchExit::Cancelled;
        }

        print_accum_ms += interval_ms;
        if print_accum_ms >= 5000 {
            print_accum_ms = 0;
            deps.stats.print(&deps.spider_id).await;
        }

        if deps.inflight.count() as u64 > u64::from(deps.config.requested_queue_count) {
            paused_ms += interval_ms;
            if paused_ms > sleep_limit_ms {
                warn!(spider_id = %deps.spider_id, "dispatcher paused too long; terminating");
                return DispatchExit::PausedTooLong;
            }
            tokio::time::sleep(interval).await;
            continue;
        }
        paused_ms = 0;

        let timed_out = deps.inflight.sweep_timeouts(request_timeout);
        if !timed_out.is_empty() {
            debug!(count = timed_out.len(), "re-admitting timed-out requests");
            if let Err(err) = add_requests(
                &deps.spider_id,
                &deps.config,
                timed_out,
                deps.scheduler.as_ref(),
                &deps.stats,
            )
            .await
            {
                warn!(error = %err, "failed to re-admit timed-out requests");
            }
            tokio::time::sleep(interval).await;
            continue;
        }

        let dequeued = match deps.scheduler.dequeue(batch_size).await {
            Ok(items) => items,
            Err(err) => {
                warn!(error = %err, "scheduler dequeue failed; treating as empty this tick");
                Vec::new()
            }
        };

        if dequeued.is_empty() {
            idle_ms += interval_ms;
            if idle_ms > sleep_limit_ms {
                info!(spider_id = %deps.spider_id, "scheduler drained; dispatcher exiting");
                return DispatchExit::Drained;
            }
            tokio::time::sleep(interval).await;
            continue;
        }
        idle_ms = 0;

        for mut request in dequeued {
            deps.configurer.configure(&mut request);
            match publish_request(
                &mut request,
                &deps.config,
                deps.proxy_pool.as_deref(),
                deps.inflight.as_ref(),
                deps.bus.as_ref(),
                deps.codec.as_ref(),
            )
            .await
            {
                Ok(true) => {}
                Ok(false) => {
                    warn!(spider_id = %deps.spider_id, "no proxy available; dispatcher terminating");
                    return DispatchExit::NoProxy;
                }
                Err(err) => {
                    warn!(hash = %request.hash, error = %err, "publish failed for this request; skipping");
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{AlwaysAvailableProxyPool, ExhaustedProxyPool, InProcessMessageBus};
    use crate::message::JsonCodec;

    fn req(hash: &str, agent: &str, policy: Policy) -> Request {
        let mut r = Request::new(hash, "https://example.com");
        r.agent = agent.to_string();
        r.policy = policy;
        r
    }

    #[test]
    fn blank_agent_routes_to_downloader_type_uppercased() {
        let mut r = req("h1", "", Policy::Random);
        r.downloader_type = "headless".into();
        assert_eq!(choose_topic(&r), "HEADLESS");
    }

    #[test]
    fn blank_agent_and_downloader_type_routes_to_default() {
        let r = req("h1", "", Policy::Random);
        assert_eq!(choose_topic(&r), DEFAULT_DOWNLOADER_TYPE.to_uppercase());
    }

    #[test]
    fn chained_policy_pins_to_parent_agent_uppercased() {
        let r = req("h2", "a7", Policy::Chained);
        assert_eq!(choose_topic(&r), "A7");
    }

    #[test]
    fn random_policy_with_agent_set_still_uses_downloader_type() {
        let mut r = req("h2", "a7", Policy::Random);
        r.downloader_type = "HttpClient".into();
        assert_eq!(choose_topic(&r), "HTTPCLIENT");
    }

    #[tokio::test]
    async fn publish_stamps_timestamp_and_enqueues_inflight() {
        let inflight = RequestedQueue::new();
        let bus = InProcessMessageBus::new();
        let _sub = bus.subscribe("HTTPCLIENT").await.unwrap();
        let codec = JsonCodec;
        let config = SpiderConfig::default();

        let mut request = Request::new("h1", "https://example.com");
        let published = publish_request(&mut request, &config, None, &inflight, &bus, &codec)
            .await
            .unwrap();

        assert!(published);
        assert!(request.timestamp > 0);
        assert_eq!(inflight.count(), 1);
    }

    #[tokio::test]
    async fn publish_drops_duplicate_inflight_silently() {
        let inflight = RequestedQueue::new();
        inflight.enqueue(Request::new("h1", "https://example.com"));
        let bus = InProcessMessageBus::new();
        let codec = JsonCodec;
        let config = SpiderConfig::default();

        let mut request = Request::new("h1", "https://example.com");
        let published = publish_request(&mut request, &config, None, &inflight, &bus, &codec)
            .await
            .unwrap();

        assert!(published, "duplicate drop is not a fatal condition");
        assert_eq!(inflight.count(), 1, "duplicate must not create a second entry");
    }

    #[tokio::test]
    async fn publish_leases_proxy_when_use_proxy_enabled() {
        let inflight = RequestedQueue::new();
        let bus = InProcessMessageBus::new();
        let codec = JsonCodec;
        let mut config = SpiderConfig::default();
        config.use_proxy = true;
        let pool = AlwaysAvailableProxyPool::new("http://proxy.example:8080");

        let mut request = Request::new("h1", "https://example.com");
        let published = publish_request(&mut request, &config, Some(&pool), &inflight, &bus, &codec)
            .await
            .unwrap();

        assert!(published);
        assert_eq!(request.proxy.as_deref(), Some("http://proxy.example:8080"));
    }

    #[tokio::test]
    async fn publish_returns_false_when_proxy_pool_exhausted() {
        let inflight = RequestedQueue::new();
        let bus = InProcessMessageBus::new();
        let codec = JsonCodec;
        let mut config = SpiderConfig::default();
        config.use_proxy = true;
        let pool = ExhaustedProxyPool;

        let mut request = Request::new("h1", "https://example.com");
        let published = publish_request(&mut request, &config, Some(&pool), &inflight, &bus, &codec)
            .await
            .unwrap();

        assert!(!published);
        assert_eq!(inflight.count(), 0, "a request that failed to publish must not be in-flight");
    }
}
