//! The data-flow pipeline: an ordered sequence of user-supplied stages
//! executed once per successful response.
//!
//! Per the design note in the specification, the C#-style "create a DI
//! scope per response" is replaced here with an explicit [`DataContext`]
//! value: a short-lived bundle carrying the request, the response, an
//! extensible property map for stages to pass data forward, and the
//! `follow_requests` accumulator. Likewise, the reflection-based storage
//! factory (`CreateFromOptions` by type name) is replaced with an explicit
//! [`StorageRegistry`]: a string-keyed map of constructor closures the
//! hosting program populates at startup, mirroring the way the teacher
//! crate's `build_default_resolver_registry` registers concrete resolvers
//! up front rather than discovering them via reflection.

use std::any::Any;
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{error, warn};

use crate::error::CoreError;
use crate::request::Request;
use crate::response::Response;

/// Ephemeral, per-response bundle handed to every data-flow stage.
pub struct DataContext {
    /// The request this response answers.
    pub request: Request,
    /// The agent's response being processed.
    pub response: Response,
    /// Extensible slot for data extracted by earlier stages, keyed by
    /// stage-chosen name.
    properties: HashMap<String, Box<dyn Any + Send + Sync>>,
    /// Follow-up requests accumulated by stages so far.
    pub follow_requests: Vec<Request>,
}

impl DataContext {
    /// Creates a fresh context for one response.
    #[must_use]
    pub fn new(request: Request, response: Response) -> Self {
        Self {
            request,
            response,
            properties: HashMap::new(),
            follow_requests: Vec::new(),
        }
    }

    /// Stores a value under `key`, overwriting any previous value there.
    pub fn set_property<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.properties.insert(key.into(), Box::new(value));
    }

    /// Retrieves a previously stored value of type `T` under `key`.
    #[must_use]
    pub fn property<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        self.properties.get(key).and_then(|v| v.downcast_ref())
    }

    /// Appends a follow-up request discovered while processing this
    /// response.
    pub fn push_follow_request(&mut self, request: Request) {
        self.follow_requests.push(request);
    }
}

/// One stage in the data-flow pipeline.
///
/// Stages run sequentially in registration order. A stage may read/augment
/// the [`DataContext`] and may append follow-up requests; it must not
/// assume anything about stages before or after it beyond the context's
/// public surface.
#[async_trait]
pub trait DataFlowStage: Send + Sync {
    /// A short, stable name used in logs and error messages.
    fn name(&self) -> &str;

    /// One-time setup, called during lifecycle startup in registration
    /// order. An error here is fatal to spider startup
    /// ([`CoreError::StageInitFailed`]).
    async fn init(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    /// Processes one response. May mutate `ctx` to record extracted data
    /// or queue follow-up requests.
    async fn process(
        &self,
        ctx: &mut DataContext,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Releases any resources held by this stage, called in registration
    /// order during shutdown.
    async fn dispose(&mut self) {}
}

/// Constructor for a named storage stage, registered ahead of time by the
/// hosting program.
pub type StorageConstructor =
    Box<dyn Fn() -> Box<dyn DataFlowStage> + Send + Sync>;

/// Explicit string-keyed registry standing in for the reflective
/// `CreateFromOptions` factory lookup the original design used.
#[derive(Default)]
pub struct StorageRegistry {
    constructors: HashMap<String, StorageConstructor>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under `name`. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, constructor: StorageConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Resolves `name` to a freshly constructed storage stage.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StorageMisconfigured`] if `name` has no
    /// registered constructor.
    pub fn resolve(&self, name: &str) -> Result<Box<dyn DataFlowStage>, CoreError> {
        let constructor =
            self.constructors
                .get(name)
                .ok_or_else(|| CoreError::StorageMisconfigured {
                    name: name.to_string(),
                })?;
        Ok(constructor())
    }
}

/// The outcome of running the pipeline over one response.
pub struct PipelineOutcome {
    /// Follow-up requests collected from all stages that ran successfully.
    pub follow_requests: Vec<Request>,
}

/// Runs `stages` in order over a context built from `request`/`response`.
///
/// On success, returns the accumulated follow-up requests. On a stage
/// failure, the error is logged and `Err` is returned with the *original*
/// request so the caller can re-admit it (per §4.7, "the retry budget will
/// eventually retire it"); data written by earlier stages before the
/// failure is discarded along with the rest of the context.
pub async fn run_pipeline(
    stages: &[Box<dyn DataFlowStage>],
    request: Request,
    response: Response,
) -> Result<PipelineOutcome, Request> {
    let mut ctx = DataContext::new(request, response);

    for stage in stages {
        if let Err(source) = stage.process(&mut ctx).await {
            error!(
                stage = stage.name(),
                error = %source,
                "data-flow stage failed; re-admitting original request"
            );
            return Err(ctx.request);
        }
    }

    Ok(PipelineOutcome {
        follow_requests: ctx.follow_requests,
    })
}

/// Initializes `stages` in registration order. On the first failure, logs
/// and returns [`CoreError::StageInitFailed`] (fatal at startup per §4.6).
pub async fn init_stages(stages: &mut [Box<dyn DataFlowStage>]) -> Result<(), CoreError> {
    for stage in stages.iter_mut() {
        if let Err(source) = stage.init().await {
            warn!(stage = stage.name(), error = %source, "stage init failed");
            return Err(CoreError::StageInitFailed {
                stage: stage.name().to_string(),
                source,
            });
        }
    }
    Ok(())
}

/// Disposes `stages` in registration order, swallowing nothing visibly but
/// never failing the overall shutdown sequence.
pub async fn dispose_stages(stages: &mut [Box<dyn DataFlowStage>]) {
    for stage in stages.iter_mut() {
        stage.dispose().await;
    }
}
