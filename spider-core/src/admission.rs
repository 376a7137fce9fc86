//! `RequestAdmission`: validate, count retries, enforce depth, stamp owner,
//! and hand the surviving batch to the scheduler.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::SpiderConfig;
use crate::contracts::{SchedulerStore, StatisticsClient};
use crate::error::{CoreError, Result};
use crate::request::Request;

/// Admits `requests` into the scheduler on behalf of `spider_id`.
///
/// For each request, in order: validates the ADSL/`RedialRegExp` invariant,
/// increments `requested_times`, checks it against `config.retried_times`
/// (recording one spider-level failure and dropping the request if the
/// budget is exhausted), checks `depth` against `config.depth` (dropping
/// silently if the limit is set and exceeded), then stamps `owner` and adds
/// the request to the batch handed to the scheduler.
///
/// Counters are incremented *before* the retry test so a request dispatched
/// `N` times naturally retires after exactly `retried_times` dispatches.
///
/// # Errors
///
/// Returns [`CoreError::InvalidRequest`] on the first request that fails
/// ADSL header validation; no partial batch is admitted for that call.
///
/// Returns whatever the scheduler's own enqueue call produces, wrapped as
/// [`CoreError::Scheduler`].
#[instrument(skip(requests, scheduler, stats), fields(spider_id = %spider_id, submitted = requests.len()))]
pub async fn add_requests(
    spider_id: &str,
    config: &SpiderConfig,
    requests: Vec<Request>,
    scheduler: &dyn SchedulerStore,
    stats: &Arc<dyn StatisticsClient>,
) -> Result<usize> {
    let mut batch = Vec::with_capacity(requests.len());

    for mut request in requests {
        if !request.has_valid_adsl_header() {
            return Err(CoreError::InvalidRequest {
                uri: request.request_uri,
            });
        }

        request.requested_times += 1;

        if request.requested_times > config.retried_times {
            debug!(
                hash = %request.hash,
                requested_times = request.requested_times,
                retried_times = config.retried_times,
                "retry budget exhausted; recording failure and dropping"
            );
            stats.increase_failure(spider_id).await;
            continue;
        }

        if config.depth > 0 && request.depth > config.depth {
            debug!(
                hash = %request.hash,
                depth = request.depth,
                limit = config.depth,
                "depth limit exceeded; dropping silently"
            );
            continue;
        }

        request.owner = spider_id.to_string();
        batch.push(request);
    }

    if batch.is_empty() {
        return Ok(0);
    }

    let accepted = scheduler
        .enqueue(batch)
        .await
        .map_err(CoreError::Scheduler)?;

    if accepted == 0 {
        warn!(spider_id = %spider_id, "scheduler accepted zero requests from a non-empty batch");
    }

    Ok(accepted)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::request::REDIAL_REGEXP_HEADER;
    use crate::testing::{InMemoryScheduler, RecordingStatisticsClient};

    fn req(hash: &str) -> Request {
        Request::new(hash, format!("https://example.com/{hash}"))
    }

    #[tokio::test]
    async fn stamps_owner_on_every_admitted_request() {
        let scheduler = InMemoryScheduler::new();
        let stats: Arc<dyn StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
        let config = SpiderConfig::default();

        add_requests("spider-1", &config, vec![req("h1")], &scheduler, &stats)
            .await
            .unwrap();

        let pending = scheduler.snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].owner, "spider-1");
        assert_eq!(pending[0].requested_times, 1);
    }

    #[tokio::test]
    async fn rejects_adsl_without_redial_header() {
        let scheduler = InMemoryScheduler::new();
        let stats: Arc<dyn StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
        let config = SpiderConfig::default();

        let mut bad = req("h1");
        bad.downloader_type = "ADSL-A".into();

        let err = add_requests("spider-1", &config, vec![bad], &scheduler, &stats)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest { .. }));
        assert!(scheduler.snapshot().is_empty());
    }

    #[tokio::test]
    async fn accepts_adsl_with_redial_header() {
        let scheduler = InMemoryScheduler::new();
        let stats: Arc<dyn StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
        let config = SpiderConfig::default();

        let mut good = req("h1");
        good.downloader_type = "ADSL-A".into();
        good.headers
            .insert(REDIAL_REGEXP_HEADER.to_string(), "^retry$".into());

        let accepted = add_requests("spider-1", &config, vec![good], &scheduler, &stats)
            .await
            .unwrap();
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn drops_request_past_retry_budget_and_records_failure() {
        let scheduler = InMemoryScheduler::new();
        let stats = Arc::new(RecordingStatisticsClient::new());
        let stats_dyn: Arc<dyn StatisticsClient> = stats.clone();
        let mut config = SpiderConfig::default();
        config.retried_times = 2;

        let mut exhausted = req("h1");
        exhausted.requested_times = 2; // about to become 3, over budget

        let accepted = add_requests(
            "spider-1",
            &config,
            vec![exhausted],
            &scheduler,
            &stats_dyn,
        )
        .await
        .unwrap();

        assert_eq!(accepted, 0);
        assert!(scheduler.snapshot().is_empty());
        assert_eq!(stats.failures(), 1);
    }

    #[tokio::test]
    async fn drops_request_past_depth_limit_silently() {
        let scheduler = InMemoryScheduler::new();
        let stats = Arc::new(RecordingStatisticsClient::new());
        let stats_dyn: Arc<dyn StatisticsClient> = stats.clone();
        let mut config = SpiderConfig::default();
        config.depth = 2;

        let mut too_deep = req("h1");
        too_deep.depth = 3;

        let accepted = add_requests(
            "spider-1",
            &config,
            vec![too_deep],
            &scheduler,
            &stats_dyn,
        )
        .await
        .unwrap();

        assert_eq!(accepted, 0);
        assert_eq!(stats.failures(), 0, "depth drops are silent, not a failure");
    }

    #[tokio::test]
    async fn depth_zero_disables_the_check() {
        let scheduler = InMemoryScheduler::new();
        let stats: Arc<dyn StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
        let config = SpiderConfig::default(); // depth defaults to 0

        let mut deep = req("h1");
        deep.depth = 10_000;

        let accepted = add_requests("spider-1", &config, vec![deep], &scheduler, &stats)
            .await
            .unwrap();
        assert_eq!(accepted, 1);
    }
}
