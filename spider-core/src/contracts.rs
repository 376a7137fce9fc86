//! Abstract bindings to the external collaborators the core requires but
//! does not own: the message bus, the scheduler store, the statistics
//! sink, the proxy pool, the seed suppliers, and the whole-process shutdown
//! handle.
//!
//! Every trait here is `async_trait` + `Send + Sync` so it is object-safe
//! and shareable across the dispatcher and consumer tasks, the same pattern
//! the teacher crate uses for its `Resolver` trait (`dyn Resolver` behind a
//! registry) since Rust 2024's native async traits are not yet object-safe.

use async_trait::async_trait;

use crate::request::Request;

/// Publish-by-topic, subscribe-by-topic transport for opaque byte payloads.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `payload` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns an implementation-defined error if the publish could not be
    /// delivered to the transport.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Subscribes to `topic`, returning a handle that receives every frame
    /// subsequently published to it.
    ///
    /// # Errors
    ///
    /// Returns an implementation-defined error if the subscription could not
    /// be established.
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<Box<dyn Subscription>, Box<dyn std::error::Error + Send + Sync>>;
}

/// An inbound frame delivered by a [`MessageBus`] subscription, paired with
/// the raw bytes for decoding.
pub type InboundFrame = Vec<u8>;

/// Subscription handle a [`MessageBus`] hands back from `subscribe`.
///
/// Modeled as a pull interface (`recv`) rather than a push callback so the
/// consumer loop owns its own polling cadence, matching the dispatcher's
/// pull-based relationship with the scheduler.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for and returns the next frame, or `None` once the topic is
    /// closed.
    async fn recv(&mut self) -> Option<InboundFrame>;
}

/// Persistent FIFO-ish queue of pending requests, external to the core.
/// De-duplication policy belongs entirely to the store; the core only
/// calls this interface.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    /// Admits `requests` into the store. Returns how many were newly
    /// accepted; duplicates per the store's own dedup policy are silently
    /// dropped and not counted.
    async fn enqueue(
        &self,
        requests: Vec<Request>,
    ) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;

    /// Removes and returns up to `batch` pending requests, in the store's
    /// own order.
    async fn dequeue(
        &self,
        batch: usize,
    ) -> Result<Vec<Request>, Box<dyn std::error::Error + Send + Sync>>;

    /// Total number of requests currently pending in the store.
    async fn total(&self) -> Result<u64, Box<dyn std::error::Error + Send + Sync>>;
}

/// Fire-and-forget counters. Errors from this client must never affect
/// business flow, so its methods do not return `Result`.
#[async_trait]
pub trait StatisticsClient: Send + Sync {
    /// Records spider start with its id and display name.
    async fn start(&self, id: &str, name: &str);
    /// Adds `count` to the spider's total-requests counter.
    async fn increase_total(&self, id: &str, count: u64);
    /// Increments the spider's success counter.
    async fn increase_success(&self, id: &str);
    /// Increments the spider's admission-failure counter (a request retired
    /// its retry budget without ever succeeding).
    async fn increase_failure(&self, id: &str);
    /// Records one successful agent response and its elapsed time.
    async fn increase_agent_success(&self, id: &str, elapsed_ms: u64);
    /// Records one failed agent response and its elapsed time.
    async fn increase_agent_failure(&self, id: &str, elapsed_ms: u64);
    /// Records spider exit.
    async fn exit(&self, id: &str);
    /// Periodic progress print, fired by the dispatcher every ~5s.
    async fn print(&self, id: &str);
}

/// Leases a proxy endpoint meeting a minimum quality score.
#[async_trait]
pub trait ProxyPool: Send + Sync {
    /// Returns a proxy URI with score `>= min_score`, or `None` if the pool
    /// is exhausted.
    async fn lease(&self, min_score: u32) -> Option<String>;
}

/// Initial seed producer: drained once at spider startup.
#[async_trait]
pub trait RequestSupplier: Send + Sync {
    /// Returns every seed request this supplier has to offer. Called once;
    /// the supplier owns whatever internal state it needs to avoid
    /// re-supplying on a later call.
    async fn requests(&self) -> Vec<Request>;
}

/// Handle to request whole-process shutdown, observed cooperatively by both
/// the dispatcher and consumer loops rather than via process-wide mutable
/// state.
pub trait ApplicationLifetime: Send + Sync {
    /// Requests shutdown. Idempotent: calling more than once has no
    /// additional effect.
    fn stop_application(&self);
    /// Returns `true` once [`Self::stop_application`] has been called.
    fn is_stopping(&self) -> bool;
}
