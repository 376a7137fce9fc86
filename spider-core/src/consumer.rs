//! The consumer loop: an event-driven handler for inbound control frames on
//! `Spider.<SPIDER_ID_UPPER>`, per §4.5.
//!
//! Mirrors the teacher crate's event-delegate shape for handling inbound
//! agent traffic — decode, dispatch on message kind, log and drop anything
//! unrecognized — the same posture `DownloadEngine` takes toward a
//! malformed queue row rather than letting one bad message take the whole
//! loop down.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::admission::add_requests;
use crate::config::SpiderConfig;
use crate::contracts::{MessageBus, SchedulerStore, StatisticsClient, Subscription};
use crate::dataflow::{run_pipeline, DataFlowStage};
use crate::error::Result;
use crate::inflight::RequestedQueue;
use crate::message::{InboundMessage, MessageCodec};
use crate::response::Response;

/// Why the consumer loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    /// An [`crate::message::InboundMessage::Exit`] frame named this spider.
    ExitRequested,
    /// The subscription's underlying transport closed.
    SubscriptionClosed,
}

/// Dependencies the consumer loop needs.
pub struct ConsumerDeps {
    pub spider_id: String,
    pub config: SpiderConfig,
    pub scheduler: Arc<dyn SchedulerStore>,
    pub bus: Arc<dyn MessageBus>,
    pub codec: Arc<dyn MessageCodec>,
    pub inflight: Arc<RequestedQueue>,
    pub stats: Arc<dyn StatisticsClient>,
}

fn control_topic(spider_id: &str) -> String {
    format!("Spider.{}", spider_id.to_uppercase())
}

/// Handles one decoded response frame: dequeues the matching in-flight
/// entry, runs the data-flow pipeline on success, records statistics, and
/// re-admits follow-ups (success path) or the original request (failure
/// path, via the retry budget).
///
/// A response whose hash has no in-flight match is a stale or duplicate
/// delivery; logged and dropped, per §4.5's dequeue-miss contract.
#[instrument(skip(deps, stages, response), fields(spider_id = %deps.spider_id, hash = %response.request_hash))]
async fn handle_response(
    deps: &ConsumerDeps,
    stages: &[Box<dyn DataFlowStage>],
    response: Response,
) -> Result<()> {
    let Some(mut request) = deps.inflight.dequeue(&response.request_hash) else {
        debug!("stale or duplicate response; no matching in-flight entry");
        return Ok(());
    };

    request.agent = response.agent.clone();

    if response.is_success() {
        deps.stats
            .increase_agent_success(&deps.spider_id, response.elapsed_milliseconds)
            .await;

        match run_pipeline(stages, request, response).await {
            Ok(outcome) => {
                deps.stats.increase_success(&deps.spider_id).await;
                if !outcome.follow_requests.is_empty() {
                    let accepted = add_requests(
                        &deps.spider_id,
                        &deps.config,
                        outcome.follow_requests,
                        deps.scheduler.as_ref(),
                        &deps.stats,
                    )
                    .await?;
                    deps.stats.increase_total(&deps.spider_id, accepted as u64).await;
                }
            }
            Err(original_request) => {
                warn!("data-flow pipeline failed; re-admitting original request");
                add_requests(
                    &deps.spider_id,
                    &deps.config,
                    vec![original_request],
                    deps.scheduler.as_ref(),
                    &deps.stats,
                )
                .await?;
            }
        }
    } else {
        deps.stats
            .increase_agent_failure(&deps.spider_id, response.elapsed_milliseconds)
            .await;
        add_requests(
            &deps.spider_id,
            &deps.config,
            vec![request],
            deps.scheduler.as_ref(),
            &deps.stats,
        )
        .await?;
    }

    Ok(())
}

/// Runs the consumer loop until an exit frame names this spider or the
/// subscription closes.
#[instrument(skip(deps, stages), fields(spider_id = %deps.spider_id))]
pub async fn run(deps: &ConsumerDeps, stages: &[Box<dyn DataFlowStage>]) -> Result<ConsumerExit> {
    let topic = control_topic(&deps.spider_id);
    let mut subscription: Box<dyn Subscription> = deps
        .bus
        .subscribe(&topic)
        .await
        .map_err(crate::error::CoreError::MessageBus)?;

    loop {
        let Some(frame) = subscription.recv().await else {
            return Ok(ConsumerExit::SubscriptionClosed);
        };

        let decoded = match deps.codec.decode(&frame) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "unrecognized control frame; dropped");
                continue;
            }
        };

        match decoded {
            InboundMessage::Exit(exit) => {
                if exit.id == deps.spider_id {
                    return Ok(ConsumerExit::ExitRequested);
                }
                debug!(target_id = %exit.id, "exit frame for a different spider; ignored");
            }
            InboundMessage::Response(frame) => {
                let response: Response = frame.into();
                if let Err(err) = handle_response(deps, stages, response).await {
                    warn!(error = %err, "failed to process response; continuing");
                }
            }
        }
    }
}
