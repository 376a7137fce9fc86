//! CLI entry point for the crawler demo harness.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, info, warn};

use spider_core::testing::{
    AlwaysAvailableProxyPool, InMemoryScheduler, InProcessMessageBus, RecordingStatisticsClient,
    SimpleApplicationLifetime, VecRequestSupplier,
};
use spider_core::message::{InboundMessage, ResponseFrame};
use spider_core::{
    ApplicationLifetime, DataContext, DataFlowStage, JsonCodec, MessageBus, MessageCodec,
    ProxyPool, Request, Response, SchedulerStore, Spider, SpiderConfig, StatisticsClient,
    StorageRegistry, Subscription,
};

mod cli;
mod file_config;

use cli::Args;

/// Data-flow stage that logs each response to stdout. Registered under
/// `"stdout"` in the demo's [`StorageRegistry`].
struct StdoutSink;

#[async_trait::async_trait]
impl DataFlowStage for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn process(
        &self,
        ctx: &mut DataContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!(
            "{} -> {} ({} bytes)",
            ctx.request.request_uri,
            ctx.response.status_code,
            ctx.response.content.len()
        );
        Ok(())
    }
}

fn build_storage_registry() -> StorageRegistry {
    let mut registry = StorageRegistry::new();
    registry.register("stdout", Box::new(|| Box::new(StdoutSink)));
    registry
}

/// Merges CLI overrides, then file config, on top of the engine's defaults.
fn merge_config(args: &Args, file: Option<&file_config::FileConfig>) -> SpiderConfig {
    let mut config = SpiderConfig::default();

    if let Some(file) = file {
        if let Some(storage) = &file.storage {
            config.storage = Some(storage.clone());
        }
        if let Some(retried_times) = file.retried_times {
            config.retried_times = retried_times;
        }
        if let Some(depth) = file.depth {
            config.depth = depth;
        }
        if let Some(speed) = file.speed {
            config.speed = speed;
        }
        if let Some(requested_queue_count) = file.requested_queue_count {
            config.requested_queue_count = requested_queue_count;
        }
        if let Some(empty_sleep_time) = file.empty_sleep_time {
            config.empty_sleep_time = empty_sleep_time;
        }
        if let Some(request_timeout_ms) = file.request_timeout_ms {
            config.request_timeout_ms = request_timeout_ms;
        }
        if let Some(use_proxy) = file.use_proxy {
            config.use_proxy = use_proxy;
        }
    }

    if let Some(storage) = &args.storage {
        config.storage = Some(storage.clone());
    }
    if let Some(retried_times) = args.retried_times {
        config.retried_times = retried_times;
    }
    if let Some(depth) = args.depth {
        config.depth = depth;
    }
    if let Some(speed) = args.speed {
        config.speed = speed;
    }
    if let Some(requested_queue_count) = args.requested_queue_count {
        config.requested_queue_count = requested_queue_count;
    }
    if let Some(empty_sleep_time) = args.empty_sleep_time {
        config.empty_sleep_time = empty_sleep_time;
    }
    if let Some(request_timeout_ms) = args.request_timeout_ms {
        config.request_timeout_ms = request_timeout_ms;
    }
    if args.use_proxy {
        config.use_proxy = true;
    }

    config
}

fn control_topic(spider_id: &str) -> String {
    format!("Spider.{}", spider_id.to_uppercase())
}

/// Spawns a demo agent that answers every request dispatched to the default
/// downloader topic with a synthetic success, standing in for the real
/// out-of-process downloader this crawler is designed to talk to.
fn spawn_demo_agent(bus: Arc<InProcessMessageBus>, spider_id: String, codec: Arc<JsonCodec>) {
    tokio::spawn(async move {
        let topic = spider_core::request::DEFAULT_DOWNLOADER_TYPE.to_uppercase();
        let Ok(mut subscription) = bus.subscribe(&topic).await else {
            warn!(topic = %topic, "demo agent failed to subscribe");
            return;
        };
        let control = control_topic(&spider_id);

        while let Some(frame) = subscription.recv().await {
            let Ok(request) = codec.decode_request(&frame) else {
                warn!("demo agent received an undecodable request frame");
                continue;
            };
            debug!(uri = %request.request_uri, "demo agent serving request");

            let response = Response {
                request_hash: request.hash,
                status_code: 200,
                agent: "demo-agent".into(),
                elapsed_milliseconds: 5,
                content: request.request_uri.clone().into_bytes(),
            };
            let payload = serde_json::to_vec(&InboundMessage::Response(ResponseFrame::from(response)))
                .unwrap_or_default();
            if bus.publish(&control, payload).await.is_err() {
                warn!("demo agent failed to publish response");
            }
        }
    });
}

fn read_seed_urls(urls: &[String]) -> Result<Vec<String>> {
    if !urls.is_empty() {
        return Ok(urls.to_vec());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");
    info!("spider CLI starting");

    let loaded = match &args.config {
        Some(path) => {
            let config = file_config::load_file_config_at(path)?;
            file_config::LoadedConfig {
                path: Some(path.clone()),
                config: Some(config),
                loaded_from_file: true,
            }
        }
        None => file_config::load_default_file_config()?,
    };
    if loaded.loaded_from_file {
        info!(path = ?loaded.path, "loaded file configuration");
    }

    let config = merge_config(&args, loaded.config.as_ref());
    config.validate()?;

    let seed_urls = read_seed_urls(&args.urls)?;
    if seed_urls.is_empty() {
        info!("No seed URLs provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://example.com' | spider --id demo-spider");
        return Ok(());
    }

    let seeds: Vec<Request> = seed_urls
        .iter()
        .enumerate()
        .map(|(index, uri)| Request::new(format!("seed-{index}"), uri.clone()))
        .collect();

    let scheduler: Arc<dyn SchedulerStore> = Arc::new(InMemoryScheduler::new());
    let bus = Arc::new(InProcessMessageBus::new());
    let bus_dyn: Arc<dyn MessageBus> = bus.clone();
    let codec = Arc::new(JsonCodec);
    let stats: Arc<dyn StatisticsClient> = Arc::new(RecordingStatisticsClient::new());
    let lifetime: Arc<dyn ApplicationLifetime> = Arc::new(SimpleApplicationLifetime::new());
    let proxy_pool: Option<Arc<dyn ProxyPool>> = if config.use_proxy {
        Some(Arc::new(AlwaysAvailableProxyPool::new("http://demo-proxy.local:8080")))
    } else {
        None
    };

    spawn_demo_agent(bus.clone(), args.id.clone(), codec.clone());

    let mut spider = Spider::new(
        args.id.clone(),
        args.name.clone(),
        config.clone(),
        scheduler,
        bus_dyn,
        codec,
        stats,
        proxy_pool,
        lifetime,
    );
    spider.add_supplier(Arc::new(VecRequestSupplier::new(seeds)));

    if let Some(name) = &config.storage {
        let registry = build_storage_registry();
        let stage = registry.resolve(name)?;
        spider.add_stage(stage);
    }

    let exit = spider.run().await?;
    info!(exit = ?exit, "spider finished");

    Ok(())
}
