//! Black-box scenarios exercising the assembled engine through its public
//! API, using the in-memory fakes from `spider_core::testing`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use spider_core::dispatcher::{DispatchExit, DispatcherDeps, NoopConfigurer};
use spider_core::testing::{
    AlwaysAvailableProxyPool, ExhaustedProxyPool, InMemoryScheduler, InProcessMessageBus,
    RecordingStatisticsClient, SimpleApplicationLifetime, VecRequestSupplier,
};
use spider_core::{
    ApplicationLifetime, CoreError, DataContext, DataFlowStage, InboundMessage, JsonCodec,
    MessageBus, MessageCodec, Policy, Request, Response, SpiderConfig, SpiderExit,
};
use spider_core::inflight::RequestedQueue;
use spider_core::lifecycle::Spider;

fn make_request(hash: &str) -> Request {
    Request::new(hash, format!("https://example.test/{hash}"))
}

/// Spawns a fake agent that answers every request published to `topic` with
/// `status_code`, correlating by hash, and stops after `expected` replies.
fn spawn_fake_agent(
    bus: Arc<InProcessMessageBus>,
    topic: &'static str,
    control_topic: String,
    codec: JsonCodec,
    status_code: u16,
    expected: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = bus.subscribe(topic).await.expect("subscribe");
        for _ in 0..expected {
            let Some(frame) = sub.recv().await else {
                break;
            };
            let request = codec.decode_request(&frame).expect("decode request");
            let response = Response {
                request_hash: request.hash.clone(),
                status_code,
                agent: "A7".into(),
                elapsed_milliseconds: 5,
                content: vec![],
            };
            let payload = serde_json::to_vec(&InboundMessage::Response(response.into()))
                .expect("encode response");
            bus.publish(&control_topic, payload)
                .await
                .expect("publish response");
        }
    })
}

#[tokio::test]
async fn s1_simple_drain() {
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    let bus = Arc::new(InProcessMessageBus::new());
    let stats = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.speed = 2.0;
    config.retried_times = 3;
    config.depth = 0;
    config.requested_queue_count = 100;
    config.empty_sleep_time = 2;
    config.use_proxy = false;

    let agent = spawn_fake_agent(
        bus.clone(),
        "HTTPCLIENT",
        "Spider.SPIDER-1".into(),
        JsonCodec,
        200,
        4,
    );
    // Give the fake agent a chance to subscribe before the dispatcher's
    // first publish.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut spider = Spider::new(
        "spider-1",
        "s1 simple drain",
        config,
        scheduler,
        bus as Arc<dyn MessageBus>,
        Arc::new(JsonCodec),
        stats.clone() as Arc<dyn spider_core::StatisticsClient>,
        None,
        lifetime,
    );
    spider.add_supplier(Arc::new(VecRequestSupplier::new(vec![
        make_request("H1"),
        make_request("H2"),
        make_request("H3"),
        make_request("H4"),
    ])));

    let exit = spider.run().await.expect("spider run");
    assert_eq!(exit, SpiderExit::Dispatcher(DispatchExit::Drained));
    assert_eq!(stats.successes(), 4);
    assert_eq!(stats.agent_successes(), 4);
    assert_eq!(stats.exits(), 1);

    agent.await.expect("agent task");
}

#[tokio::test]
async fn s2_retry_exhaustion() {
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    let bus = Arc::new(InProcessMessageBus::new());
    let stats = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.retried_times = 2;
    config.speed = 5.0;
    config.empty_sleep_time = 1;

    // H1 is published on attempt 1 and attempt 2 (after its first 500
    // response re-admits it); the 2-reply agent answers both.
    let agent = spawn_fake_agent(
        bus.clone(),
        "HTTPCLIENT",
        "Spider.SPIDER-2".into(),
        JsonCodec,
        500,
        2,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut spider = Spider::new(
        "spider-2",
        "s2 retry exhaustion",
        config,
        scheduler,
        bus as Arc<dyn MessageBus>,
        Arc::new(JsonCodec),
        stats.clone() as Arc<dyn spider_core::StatisticsClient>,
        None,
        lifetime,
    );
    spider.add_supplier(Arc::new(VecRequestSupplier::new(vec![make_request("H1")])));

    let exit = spider.run().await.expect("spider run");
    assert_eq!(exit, SpiderExit::Dispatcher(DispatchExit::Drained));
    assert_eq!(stats.agent_failures(), 2);
    assert_eq!(
        stats.failures(),
        1,
        "retry budget exhaustion records exactly one admission failure"
    );

    agent.await.expect("agent task");
}

#[tokio::test]
async fn s3_adsl_validation_rejects_without_redial_header() {
    let scheduler = InMemoryScheduler::new();
    let stats: Arc<dyn spider_core::StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let config = SpiderConfig::default();

    let mut bad = make_request("H1");
    bad.downloader_type = "ADSL-A".into();

    let err = spider_core::admission::add_requests(
        "spider-3",
        &config,
        vec![bad],
        &scheduler,
        &stats,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CoreError::InvalidRequest { .. }));
    assert!(scheduler.snapshot().is_empty(), "no scheduler interaction");
}

struct ChainedFollowupStage;

#[async_trait]
impl DataFlowStage for ChainedFollowupStage {
    fn name(&self) -> &str {
        "chained-followup"
    }

    async fn process(
        &self,
        ctx: &mut DataContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut follow = Request::new("R2", "https://example.test/r2");
        follow.policy = Policy::Chained;
        follow.agent = "a7".into();
        ctx.push_follow_request(follow);
        Ok(())
    }
}

#[tokio::test]
async fn s4_chained_policy_routes_followup_to_parent_agent_topic() {
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    let bus = Arc::new(InProcessMessageBus::new());
    let stats = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.speed = 5.0;
    config.empty_sleep_time = 1;

    // R1 dispatches to HTTPCLIENT and gets a success reply from "agent A7".
    // Its follow-up R2 (Policy::Chained, Agent "a7") must then dispatch to
    // topic "A7" specifically.
    let r1_agent = spawn_fake_agent(
        bus.clone(),
        "HTTPCLIENT",
        "Spider.SPIDER-4".into(),
        JsonCodec,
        200,
        1,
    );
    let a7_agent = spawn_fake_agent(
        bus.clone(),
        "A7",
        "Spider.SPIDER-4".into(),
        JsonCodec,
        200,
        1,
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut spider = Spider::new(
        "spider-4",
        "s4 chained policy",
        config,
        scheduler,
        bus as Arc<dyn MessageBus>,
        Arc::new(JsonCodec),
        stats.clone() as Arc<dyn spider_core::StatisticsClient>,
        None,
        lifetime,
    );
    spider.add_supplier(Arc::new(VecRequestSupplier::new(vec![make_request("R1")])));
    spider.add_stage(Box::new(ChainedFollowupStage));

    let exit = spider.run().await.expect("spider run");
    assert_eq!(exit, SpiderExit::Dispatcher(DispatchExit::Drained));
    assert_eq!(stats.successes(), 2, "both R1 and its chained follow-up succeed");

    r1_agent.await.expect("r1 agent task");
    a7_agent.await.expect("a7 agent task");
}

#[tokio::test]
async fn s5_back_pressure_terminal_preserves_inflight_entry() {
    let inflight = Arc::new(RequestedQueue::new());
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    scheduler
        .enqueue(vec![make_request("H1"), make_request("H2")])
        .await
        .unwrap();
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessMessageBus::new());
    let stats: Arc<dyn spider_core::StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.requested_queue_count = 1;
    config.empty_sleep_time = 1;
    config.speed = 10.0;

    let deps = DispatcherDeps {
        spider_id: "spider-5".into(),
        config,
        scheduler,
        bus,
        codec: Arc::new(JsonCodec),
        inflight: inflight.clone(),
        stats,
        proxy_pool: None,
        lifetime,
        configurer: Arc::new(NoopConfigurer),
    };

    let exit = spider_core::dispatcher::run(&deps).await;
    assert_eq!(exit, DispatchExit::PausedTooLong);
    assert_eq!(
        inflight.count(),
        1,
        "the one published request remains in the in-flight table"
    );
}

#[tokio::test]
async fn s6_timeout_sweep_readmits_and_republishes() {
    let inflight = Arc::new(RequestedQueue::new());
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    scheduler.enqueue(vec![make_request("H1")]).await.unwrap();
    let bus = Arc::new(InProcessMessageBus::new());
    let stats: Arc<dyn spider_core::StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.speed = 10.0;
    config.empty_sleep_time = 2;
    config.request_timeout_ms = 500;

    let sub = bus.subscribe("HTTPCLIENT").await.expect("subscribe");

    let deps = DispatcherDeps {
        spider_id: "spider-6".into(),
        config,
        scheduler,
        bus: bus as Arc<dyn MessageBus>,
        codec: Arc::new(JsonCodec),
        inflight: inflight.clone(),
        stats,
        proxy_pool: None,
        lifetime,
        configurer: Arc::new(NoopConfigurer),
    };

    let run_handle = tokio::spawn(async move { spider_core::dispatcher::run(&deps).await });

    // First dispatch happens almost immediately (batch of up to 10, one
    // request available); the timeout (500ms) then fires well before the
    // 2s idle/paused terminal thresholds, re-admitting and republishing H1.
    let mut sub = sub;
    let codec = JsonCodec;

    let first = sub.recv().await.expect("first publish");
    let first_request = codec.decode_request(&first).expect("decode first");
    assert_eq!(first_request.hash, "H1");
    assert_eq!(first_request.requested_times, 1);

    let second = tokio::time::timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("re-publish within 2s")
        .expect("re-publish frame");
    let second_request = codec.decode_request(&second).expect("decode second");
    assert_eq!(second_request.hash, "H1");
    assert_eq!(
        second_request.requested_times, 2,
        "the timeout sweep re-admits through the normal admission path, incrementing requested_times"
    );

    run_handle.abort();
}

#[tokio::test]
async fn dispatcher_terminates_when_use_proxy_enabled_and_pool_exhausted() {
    let inflight = Arc::new(RequestedQueue::new());
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    scheduler.enqueue(vec![make_request("H1")]).await.unwrap();
    let bus: Arc<dyn MessageBus> = Arc::new(InProcessMessageBus::new());
    let stats: Arc<dyn spider_core::StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.use_proxy = true;
    config.speed = 10.0;

    let deps = DispatcherDeps {
        spider_id: "spider-7".into(),
        config,
        scheduler,
        bus,
        codec: Arc::new(JsonCodec),
        inflight,
        stats,
        proxy_pool: Some(Arc::new(ExhaustedProxyPool)),
        lifetime,
        configurer: Arc::new(NoopConfigurer),
    };

    let exit = spider_core::dispatcher::run(&deps).await;
    assert_eq!(exit, DispatchExit::NoProxy);
}

#[tokio::test]
async fn dispatcher_leases_proxy_and_publishes_when_available() {
    let inflight = Arc::new(RequestedQueue::new());
    let scheduler: Arc<dyn spider_core::SchedulerStore> = Arc::new(InMemoryScheduler::new());
    scheduler.enqueue(vec![make_request("H1")]).await.unwrap();
    let bus = Arc::new(InProcessMessageBus::new());
    let sub = bus.subscribe("HTTPCLIENT").await.expect("subscribe");
    let stats: Arc<dyn spider_core::StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());

    let mut config = SpiderConfig::default();
    config.use_proxy = true;
    config.speed = 10.0;

    let deps = DispatcherDeps {
        spider_id: "spider-8".into(),
        config,
        scheduler,
        bus: bus as Arc<dyn MessageBus>,
        codec: Arc::new(JsonCodec),
        inflight,
        stats,
        proxy_pool: Some(Arc::new(AlwaysAvailableProxyPool::new("http://proxy.test:1"))),
        lifetime,
        configurer: Arc::new(NoopConfigurer),
    };

    let run_handle = tokio::spawn(async move { spider_core::dispatcher::run(&deps).await });

    let mut sub = sub;
    let frame = sub.recv().await.expect("publish with proxy leased");
    let request = JsonCodec.decode_request(&frame).expect("decode");
    assert_eq!(request.proxy.as_deref(), Some("http://proxy.test:1"));

    run_handle.abort();
}
