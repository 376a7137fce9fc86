//! In-memory fakes for every external contract, so the engine's scenarios
//! (see §8 of the specification) can be exercised without standing up real
//! message-bus, scheduler, or proxy infrastructure.
//!
//! Gated behind `cfg(any(test, feature = "testing"))`, the same way the
//! teacher crate gates its `test_support` module — available to this
//! crate's own tests and to downstream crates that opt into the `testing`
//! feature, but never compiled into a production binary by default.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::contracts::{
    ApplicationLifetime, InboundFrame, MessageBus, ProxyPool, RequestSupplier, SchedulerStore,
    StatisticsClient, Subscription,
};
use crate::request::Request;

/// FIFO scheduler fake with hash-based dedup, matching the external
/// scheduler's documented contract (dedup policy belongs to the store).
pub struct InMemoryScheduler {
    pending: Mutex<VecDeque<Request>>,
    known_hashes: Mutex<std::collections::HashSet<String>>,
}

impl Default for InMemoryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryScheduler {
    /// Creates an empty scheduler fake.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            known_hashes: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Returns a snapshot of all currently pending requests, in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Request> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SchedulerStore for InMemoryScheduler {
    async fn enqueue(
        &self,
        requests: Vec<Request>,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut known = self
            .known_hashes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut accepted = 0;
        for request in requests {
            if known.insert(request.hash.clone()) {
                pending.push_back(request);
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    async fn dequeue(
        &self,
        batch: usize,
    ) -> Result<Vec<Request>, Box<dyn std::error::Error + Send + Sync>> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut known = self
            .known_hashes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut out = Vec::with_capacity(batch.min(pending.len()));
        while out.len() < batch {
            let Some(request) = pending.pop_front() else {
                break;
            };
            known.remove(&request.hash);
            out.push(request);
        }
        Ok(out)
    }

    async fn total(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self
            .pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len() as u64)
    }
}

/// In-process message bus backed by one unbounded `mpsc` channel per topic.
/// Good enough to exercise publish/subscribe semantics in tests; not a
/// substitute for a real broker.
#[derive(Default)]
pub struct InProcessMessageBus {
    topics: Mutex<std::collections::HashMap<String, mpsc::UnboundedSender<InboundFrame>>>,
}

impl InProcessMessageBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct ChannelSubscription {
    rx: mpsc::UnboundedReceiver<InboundFrame>,
}

#[async_trait]
impl Subscription for ChannelSubscription {
    async fn recv(&mut self) -> Option<InboundFrame> {
        self.rx.recv().await
    }
}

#[async_trait]
impl MessageBus for InProcessMessageBus {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let topics = self
            .topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(sender) = topics.get(topic) {
            // A send error means nobody is listening on this topic; that is
            // not a transport failure worth surfacing to the dispatcher.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    /// Only the most recent subscriber for a topic receives frames
    /// (single-consumer, matching the spider's one control-topic-per-spider
    /// model).
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Box<dyn Subscription>, Box<dyn std::error::Error + Send + Sync>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(topic.to_string(), tx);
        Ok(Box::new(ChannelSubscription { rx }))
    }
}

/// Statistics client that records every call for assertions, in addition to
/// behaving like a no-op sink.
#[derive(Default)]
pub struct RecordingStatisticsClient {
    starts: AtomicU64,
    totals: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    agent_successes: AtomicU64,
    agent_failures: AtomicU64,
    exits: AtomicU64,
    prints: AtomicU64,
}

impl RecordingStatisticsClient {
    /// Creates a fresh, zeroed recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`StatisticsClient::start`] calls observed.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }
    /// Sum of counts passed to [`StatisticsClient::increase_total`].
    pub fn total(&self) -> u64 {
        self.totals.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::increase_success`] calls observed.
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::increase_failure`] calls observed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::increase_agent_success`] calls observed.
    pub fn agent_successes(&self) -> u64 {
        self.agent_successes.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::increase_agent_failure`] calls observed.
    pub fn agent_failures(&self) -> u64 {
        self.agent_failures.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::exit`] calls observed.
    pub fn exits(&self) -> u64 {
        self.exits.load(Ordering::SeqCst)
    }
    /// Number of [`StatisticsClient::print`] calls observed.
    pub fn prints(&self) -> u64 {
        self.prints.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatisticsClient for RecordingStatisticsClient {
    async fn start(&self, _id: &str, _name: &str) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }
    async fn increase_total(&self, _id: &str, count: u64) {
        self.totals.fetch_add(count, Ordering::SeqCst);
    }
    async fn increase_success(&self, _id: &str) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
    async fn increase_failure(&self, _id: &str) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
    async fn increase_agent_success(&self, _id: &str, _elapsed_ms: u64) {
        self.agent_successes.fetch_add(1, Ordering::SeqCst);
    }
    async fn increase_agent_failure(&self, _id: &str, _elapsed_ms: u64) {
        self.agent_failures.fetch_add(1, Ordering::SeqCst);
    }
    async fn exit(&self, _id: &str) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
    async fn print(&self, _id: &str) {
        self.prints.fetch_add(1, Ordering::SeqCst);
    }
}

/// Proxy pool fake that always has capacity, or never does.
pub struct AlwaysAvailableProxyPool {
    uri: String,
}

impl AlwaysAvailableProxyPool {
    /// Creates a pool that always leases `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl ProxyPool for AlwaysAvailableProxyPool {
    async fn lease(&self, _min_score: u32) -> Option<String> {
        Some(self.uri.clone())
    }
}

/// Proxy pool fake that is always exhausted, for exercising the dispatcher's
/// [`crate::dispatcher::DispatchExit::NoProxy`] exit, which [`crate::Spider::run`]
/// translates into [`crate::error::CoreError::NoProxyAvailable`].
#[derive(Default)]
pub struct ExhaustedProxyPool;

#[async_trait]
impl ProxyPool for ExhaustedProxyPool {
    async fn lease(&self, _min_score: u32) -> Option<String> {
        None
    }
}

/// Seed supplier fake backed by a fixed in-memory list.
pub struct VecRequestSupplier {
    requests: Mutex<Vec<Request>>,
}

impl VecRequestSupplier {
    /// Creates a supplier that yields `requests` exactly once.
    #[must_use]
    pub fn new(requests: Vec<Request>) -> Self {
        Self {
            requests: Mutex::new(requests),
        }
    }
}

#[async_trait]
impl RequestSupplier for VecRequestSupplier {
    async fn requests(&self) -> Vec<Request> {
        std::mem::take(
            &mut *self
                .requests
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

/// Cooperative shutdown flag, observed by both the dispatcher and consumer.
#[derive(Default)]
pub struct SimpleApplicationLifetime {
    stopping: std::sync::atomic::AtomicBool,
}

impl SimpleApplicationLifetime {
    /// Creates a lifetime handle that is not yet stopping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApplicationLifetime for SimpleApplicationLifetime {
    fn stop_application(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }
}
