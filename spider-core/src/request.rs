//! The `Request` type: the crawler's unit of work.
//!
//! Mirrors the admission/dispatch counters the engine depends on: a stable
//! `hash` used to correlate publishes with responses and to deduplicate
//! in-flight work, and `requested_times`/`depth` counters that the admission
//! and publish stages mutate in place.

use std::collections::HashMap;

/// Header key whose presence (non-blank) is required for ADSL downloader
/// types. See [`Request::validate_adsl`].
pub const REDIAL_REGEXP_HEADER: &str = "RedialRegExp";

/// Default downloader type used when a request specifies none.
pub const DEFAULT_DOWNLOADER_TYPE: &str = "HttpClient";

/// Routing policy for a request whose `agent` is already set (i.e. a
/// follow-up produced from a prior response).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Pin the follow-up to the agent that served its parent.
    Chained,
    /// Re-balance the follow-up across agents of the relevant downloader type.
    Random,
}

impl Policy {
    /// Parses a wire policy tag (as carried by [`crate::message::RequestFrame`])
    /// into a [`Policy`].
    ///
    /// In-process code always constructs a [`Request`] with one of the two
    /// variants directly, so this boundary only matters when a request is
    /// reconstituted from an externally supplied frame whose `policy`
    /// string does not match either recognized tag.
    ///
    /// # Errors
    ///
    /// Returns the unrecognized tag as `Err(String)` for the caller to wrap
    /// in [`crate::error::CoreError::UnsupportedPolicy`].
    pub fn parse(tag: &str) -> Result<Self, String> {
        match tag {
            "Chained" => Ok(Self::Chained),
            "Random" => Ok(Self::Random),
            other => Err(other.to_string()),
        }
    }

    /// Returns the wire tag for this policy.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chained => "Chained",
            Self::Random => "Random",
        }
    }
}

/// A unit of crawl work: a URI to fetch, plus the routing and bookkeeping
/// metadata the core needs to admit, schedule, dispatch, and correlate it.
#[derive(Debug, Clone)]
pub struct Request {
    /// Stable fingerprint used for in-flight dedup and response correlation.
    /// Supplied by the caller or computed by the scheduler; the core treats
    /// it as opaque.
    pub hash: String,
    /// The URI to fetch.
    pub request_uri: String,
    /// The spider that owns this request. Blank until admission stamps it.
    pub owner: String,
    /// Downloader type tag; empty means [`DEFAULT_DOWNLOADER_TYPE`].
    pub downloader_type: String,
    /// Identifier of the agent that should serve (or served) this request.
    /// Blank on first dispatch.
    pub agent: String,
    /// Routing policy for follow-ups with a non-blank `agent`.
    pub policy: Policy,
    /// Leased proxy URI, set during publish when `use_proxy` is enabled.
    pub proxy: Option<String>,
    /// Arbitrary request headers.
    pub headers: HashMap<String, String>,
    /// Number of admission attempts so far. Zero on construction;
    /// incremented exactly once per admission attempt.
    pub requested_times: u32,
    /// Hop count from the seed requests. Monotonically non-decreasing along
    /// a follow-up chain.
    pub depth: u32,
    /// Unix-ms timestamp stamped at dispatch.
    pub timestamp: i64,
}

impl Request {
    /// Creates a new request with zeroed counters, ready for admission.
    #[must_use]
    pub fn new(hash: impl Into<String>, request_uri: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            request_uri: request_uri.into(),
            owner: String::new(),
            downloader_type: String::new(),
            agent: String::new(),
            policy: Policy::Random,
            proxy: None,
            headers: HashMap::new(),
            requested_times: 0,
            depth: 0,
            timestamp: 0,
        }
    }

    /// Returns the effective downloader type, defaulting to
    /// [`DEFAULT_DOWNLOADER_TYPE`] when unset.
    #[must_use]
    pub fn downloader_type_or_default(&self) -> &str {
        if self.downloader_type.is_empty() {
            DEFAULT_DOWNLOADER_TYPE
        } else {
            &self.downloader_type
        }
    }

    /// Validates the ADSL/`RedialRegExp` invariant: a `downloader_type`
    /// containing `"ADSL"` requires a non-blank `RedialRegExp` header.
    #[must_use]
    pub fn has_valid_adsl_header(&self) -> bool {
        if !self.downloader_type.contains("ADSL") {
            return true;
        }
        self.headers
            .get(REDIAL_REGEXP_HEADER)
            .is_some_and(|v| !v.trim().is_empty())
    }
}
