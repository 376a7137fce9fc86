//! The `Spider` lifecycle controller: validates identity, starts
//! statistics, drains seed suppliers, initializes the data-flow pipeline,
//! and runs the dispatcher and consumer loops concurrently until one of
//! them exits, per §4.6.
//!
//! Grounded in the teacher crate's top-level orchestration in
//! `download::DownloadEngine` — construct collaborators, validate
//! configuration, drive a bounded loop, and unwind resources in the
//! reverse of acquisition order on the way out.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::admission::add_requests;
use crate::config::{SpiderConfig, MIN_PROXY_SCORE};
use crate::contracts::{
    ApplicationLifetime, MessageBus, ProxyPool, RequestSupplier, SchedulerStore, StatisticsClient,
};
use crate::consumer::{self, ConsumerDeps, ConsumerExit};
use crate::dataflow::{dispose_stages, init_stages, DataFlowStage};
use crate::dispatcher::{self, DispatchExit, DispatcherDeps, NoopConfigurer, RequestConfigurer};
use crate::error::{CoreError, Result};
use crate::inflight::RequestedQueue;
use crate::message::MessageCodec;

const MAX_ID_LEN: usize = 36;

/// User hook invoked once at startup, between `StatisticsClient.start` and
/// draining seed suppliers. Mirrors [`RequestConfigurer`]'s shape: a plain
/// synchronous hook the hosting program can use to prepare state (open a
/// connection pool, warm a cache) before the spider admits any requests.
pub trait Initializer: Send + Sync {
    /// Runs once at startup.
    fn initialize(&self);
}

/// Default [`Initializer`] that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInitializer;

impl Initializer for NoopInitializer {
    fn initialize(&self) {}
}

/// Validates a spider identity per §4.6: non-blank and at most 36
/// characters.
///
/// # Errors
///
/// Returns [`CoreError::InvalidId`] if `id` is blank or too long.
pub fn validate_spider_id(id: &str) -> Result<()> {
    if id.trim().is_empty() || id.chars().count() > MAX_ID_LEN {
        return Err(CoreError::InvalidId { id: id.to_string() });
    }
    Ok(())
}

/// Why the spider's run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiderExit {
    /// The dispatcher reached a terminal condition first.
    Dispatcher(DispatchExit),
    /// The consumer reached a terminal condition first.
    Consumer(ConsumerExit),
}

/// Everything one running spider needs, assembled by the hosting program.
pub struct Spider {
    id: String,
    name: String,
    config: SpiderConfig,
    scheduler: Arc<dyn SchedulerStore>,
    bus: Arc<dyn MessageBus>,
    codec: Arc<dyn MessageCodec>,
    stats: Arc<dyn StatisticsClient>,
    proxy_pool: Option<Arc<dyn ProxyPool>>,
    lifetime: Arc<dyn ApplicationLifetime>,
    suppliers: Vec<Arc<dyn RequestSupplier>>,
    stages: Vec<Box<dyn DataFlowStage>>,
    configurer: Arc<dyn RequestConfigurer>,
    initializer: Arc<dyn Initializer>,
}

impl Spider {
    /// Creates a spider. Identity is validated in [`Self::run`], not here,
    /// so a builder can be assembled before the id is finalized.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        config: SpiderConfig,
        scheduler: Arc<dyn SchedulerStore>,
        bus: Arc<dyn MessageBus>,
        codec: Arc<dyn MessageCodec>,
        stats: Arc<dyn StatisticsClient>,
        proxy_pool: Option<Arc<dyn ProxyPool>>,
        lifetime: Arc<dyn ApplicationLifetime>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            config,
            scheduler,
            bus,
            codec,
            stats,
            proxy_pool,
            lifetime,
            suppliers: Vec::new(),
            stages: Vec::new(),
            configurer: Arc::new(NoopConfigurer),
            initializer: Arc::new(NoopInitializer),
        }
    }

    /// Registers a seed supplier, drained once during startup in
    /// registration order.
    pub fn add_supplier(&mut self, supplier: Arc<dyn RequestSupplier>) {
        self.suppliers.push(supplier);
    }

    /// Appends a data-flow stage to the pipeline, run in registration
    /// order on every successful response.
    pub fn add_stage(&mut self, stage: Box<dyn DataFlowStage>) {
        self.stages.push(stage);
    }

    /// Installs a [`RequestConfigurer`] hook run on every request
    /// immediately before publish. Replaces the default no-op.
    pub fn set_configurer(&mut self, configurer: Arc<dyn RequestConfigurer>) {
        self.configurer = configurer;
    }

    /// Installs an [`Initializer`] hook run once at startup, after
    /// statistics start and before seed suppliers are drained. Replaces the
    /// default no-op.
    pub fn set_initializer(&mut self, initializer: Arc<dyn Initializer>) {
        self.initializer = initializer;
    }

    /// Runs the full lifecycle: validate, start statistics, load seeds,
    /// init data-flow stages, then run the dispatcher and consumer
    /// concurrently until one exits, and unwind in the reverse order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidId`] if the spider's identity fails
    /// validation, or [`CoreError::StageInitFailed`] if any data-flow
    /// stage's `init` hook fails (both fatal to startup, per §4.6).
    #[instrument(skip(self), fields(spider_id = %self.id))]
    pub async fn run(&mut self) -> Result<SpiderExit> {
        validate_spider_id(&self.id)?;

        self.stats.start(&self.id, &self.name).await;

        self.initializer.initialize();

        for supplier in &self.suppliers {
            let seeds = supplier.requests().await;
            if seeds.is_empty() {
                continue;
            }
            add_requests(
                &self.id,
                &self.config,
                seeds,
                self.scheduler.as_ref(),
                &self.stats,
            )
            .await?;
        }

        if let Err(err) = init_stages(&mut self.stages).await {
            warn!(error = %err, "data-flow init failed; stopping application");
            self.lifetime.stop_application();
            return Err(err);
        }

        let total = self
            .scheduler
            .total()
            .await
            .map_err(CoreError::Scheduler)?;
        self.stats.increase_total(&self.id, total).await;

        let inflight = Arc::new(RequestedQueue::new());

        let consumer_deps = ConsumerDeps {
            spider_id: self.id.clone(),
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            bus: self.bus.clone(),
            codec: self.codec.clone(),
            inflight: inflight.clone(),
            stats: self.stats.clone(),
        };

        let dispatcher_deps = DispatcherDeps {
            spider_id: self.id.clone(),
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            bus: self.bus.clone(),
            codec: self.codec.clone(),
            inflight,
            stats: self.stats.clone(),
            proxy_pool: self.proxy_pool.clone(),
            lifetime: self.lifetime.clone(),
            configurer: self.configurer.clone(),
        };

        info!(spider_id = %self.id, "spider started; running dispatcher and consumer");

        let stages = &self.stages;
        let exit = tokio::select! {
            dispatch_exit = dispatcher::run(&dispatcher_deps) => {
                SpiderExit::Dispatcher(dispatch_exit)
            }
            consumer_result = consumer::run(&consumer_deps, stages) => {
                SpiderExit::Consumer(consumer_result?)
            }
        };

        info!(spider_id = %self.id, exit = ?exit, "spider loop exited; tearing down");

        dispose_stages(&mut self.stages).await;
        self.stats.exit(&self.id).await;
        self.lifetime.stop_application();

        if exit == SpiderExit::Dispatcher(DispatchExit::NoProxy) {
            return Err(CoreError::NoProxyAvailable {
                min_score: MIN_PROXY_SCORE,
            });
        }

        Ok(exit)
    }
}
