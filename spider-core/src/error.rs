//! Error types for the crawler core.
//!
//! Each error kind maps directly to one of the fatal or contained failure
//! modes the engine can hit: a malformed request at admission time, a bad
//! spider identity at start, a misconfigured default storage stage, an
//! unsupported routing policy on publish, a data-flow stage that failed to
//! initialize, or a proxy pool that came up empty while proxying is required.

use thiserror::Error;

/// Errors raised by the crawler core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `DownloaderType` contains `"ADSL"` but the `RedialRegExp` header is
    /// absent or blank.
    #[error("request for {uri} uses an ADSL downloader type but has no RedialRegExp header")]
    InvalidRequest {
        /// The offending request's URI, for diagnostics.
        uri: String,
    },

    /// The spider identity is blank or exceeds 36 characters.
    #[error("invalid spider id {id:?}: must be non-blank and at most 36 characters")]
    InvalidId {
        /// The identity string that failed validation.
        id: String,
    },

    /// Config names a `Storage` identifier with no matching registry entry.
    #[error("storage {name:?} is not registered in the storage registry")]
    StorageMisconfigured {
        /// The unresolved storage identifier from config.
        name: String,
    },

    /// A request carries a `Policy` the publisher does not recognize.
    #[error("unsupported policy {policy:?} on request {hash}")]
    UnsupportedPolicy {
        /// The request's hash, for diagnostics.
        hash: String,
        /// The unrecognized policy tag.
        policy: String,
    },

    /// A data-flow stage's `init` hook failed; fatal at startup.
    #[error("data-flow stage {stage} failed to initialize: {source}")]
    StageInitFailed {
        /// Name of the stage that failed to initialize.
        stage: String,
        /// The stage's own error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// `ProxyPool` returned no lease while `use_proxy` is enabled.
    #[error("no proxy available with minimum score {min_score}")]
    NoProxyAvailable {
        /// The minimum score that was requested.
        min_score: u32,
    },

    /// The message bus rejected a publish or subscribe call.
    #[error("message bus error: {0}")]
    MessageBus(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The scheduler store rejected an enqueue or dequeue call.
    #[error("scheduler error: {0}")]
    Scheduler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Result alias used throughout the core for [`CoreError`]-producing calls.
pub type Result<T> = std::result::Result<T, CoreError>;
