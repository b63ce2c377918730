//! Operation executor: runs single, batch, sequence and parallel requests
//! against the tool registry.
//!
//! Every item goes through the same pipeline:
//!
//! ```text
//! validate → fingerprint → cache → rate limit → in-flight guard → tool (deadline, retry)
//! ```
//!
//! The cache, the token buckets and the guard table are shared by every clone
//! of an [`OperationExecutor`]. The executor is independent of the plan layer
//! and can be used on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

pub mod cache;
pub mod fingerprint;
pub mod inflight;
pub mod rate_limit;
pub mod retry;

pub use cache::{CacheEntry, ResultCache};
pub use fingerprint::Fingerprint;
pub use inflight::{Flight, FlightOutcome, InFlightTable};
pub use rate_limit::{RateLimiter, TokenBucket};
pub use retry::{RetryDecision, RetryPolicy};

use crate::config::{CacheConfig, EngineConfig};
use crate::error::{EngineError, ErrorKind, OperationError, Result};
use crate::models::{
    Admission, ItemStatus, Mode, OperationItem, OperationRequest, OperationResult, StepId,
};
use crate::reference;
use crate::registry::{Action, Tool, ToolErrorKind, ToolRegistry, ToolSpec};
use crate::store::ResultStore;

struct Shared {
    registry: ToolRegistry,
    results: Arc<dyn ResultStore>,
    cache: ResultCache,
    limiter: RateLimiter,
    inflight: Arc<InFlightTable>,
    retry: RetryPolicy,
    cache_config: CacheConfig,
    max_parallel: usize,
    default_deadline: Duration,
}

/// Cheap to clone; clones share cache, buckets and guards.
#[derive(Clone)]
pub struct OperationExecutor {
    shared: Arc<Shared>,
}

impl OperationExecutor {
    /// Creates an executor after validating `config` against `registry`.
    pub fn new(
        registry: ToolRegistry,
        results: Arc<dyn ResultStore>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate(&registry)?;
        Ok(Self {
            shared: Arc::new(Shared {
                limiter: RateLimiter::new(&config.rate_limits),
                registry,
                results,
                cache: ResultCache::new(),
                inflight: Arc::new(InFlightTable::new()),
                retry: RetryPolicy::from(&config.retry),
                cache_config: config.cache.clone(),
                max_parallel: config.executor.max_parallel,
                default_deadline: Duration::from_millis(config.executor.default_deadline_ms),
            }),
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.shared.registry
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.shared.results
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.shared.retry
    }

    pub fn cache(&self) -> &ResultCache {
        &self.shared.cache
    }

    /// How long a dispatched step may stay processing before its turn counts
    /// as lost: `steps` items run back to back, each with its full retry
    /// budget at the default deadline.
    pub fn stale_after(&self, steps: usize) -> Duration {
        let per_item = self
            .shared
            .retry
            .execution_budget(self.shared.default_deadline);
        per_item.saturating_mul(u32::try_from(steps.max(1)).unwrap_or(u32::MAX))
    }

    /// Takes a rate-limit token for `action` ahead of execution, waiting at
    /// most the action's bounded wait. On refusal returns the time until the
    /// next token.
    pub async fn admit(&self, action: &str) -> std::result::Result<Admission, Duration> {
        self.shared.limiter.acquire(action).await?;
        Ok(Admission(()))
    }

    /// Like [`admit`](Self::admit) but never waits.
    pub fn try_admit(&self, action: &str) -> std::result::Result<Admission, Duration> {
        self.shared.limiter.try_acquire(action)?;
        Ok(Admission(()))
    }

    /// Runs a request. Item failures are reported in the result array, which
    /// is order-aligned with `request.items`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InvalidInput` for a malformed request and
    /// propagates result store failures.
    pub async fn execute(&self, request: OperationRequest) -> Result<Vec<OperationResult>> {
        let deadline = request
            .options
            .deadline_ms
            .map_or(self.shared.default_deadline, Duration::from_millis);
        let count = request.items.len();

        let results = match request.mode {
            Mode::Single => {
                if count != 1 {
                    return Err(EngineError::invalid_input("items")
                        .with_reason(format!("single mode takes one item, got {count}")));
                }
                let item = &request.items[0];
                vec![self.run_standalone(item, deadline).await?]
            }
            Mode::Batch => {
                self.run_pool(request.items, self.shared.max_parallel, deadline)
                    .await?
            }
            Mode::Parallel => {
                let ceiling = request
                    .options
                    .max_parallel
                    .unwrap_or(self.shared.max_parallel);
                if ceiling == 0 {
                    return Err(EngineError::invalid_input("max_parallel")
                        .with_reason("must be at least 1"));
                }
                self.run_pool(request.items, ceiling, deadline).await?
            }
            Mode::Sequence => {
                self.run_sequence(&request.items, request.options.continue_on_error, deadline)
                    .await?
            }
        };

        let failed = results.iter().filter(|r| !r.is_success()).count();
        info!(
            "{} request finished: {} item(s), {} unsuccessful",
            request.mode.as_str(),
            count,
            failed
        );
        Ok(results)
    }

    /// An item with no earlier outputs to reference.
    async fn run_standalone(
        &self,
        item: &OperationItem,
        deadline: Duration,
    ) -> Result<OperationResult> {
        match reference::substitute(&item.params, &HashMap::new()) {
            Ok(params) => self.run_item(item, params, deadline).await,
            Err(error) => Ok(OperationResult::failed(item, error)),
        }
    }

    async fn run_pool(
        &self,
        items: Vec<OperationItem>,
        limit: usize,
        deadline: Duration,
    ) -> Result<Vec<OperationResult>> {
        let semaphore = Arc::new(Semaphore::new(limit.max(1)));
        let mut workers = JoinSet::new();

        for (index, item) in items.iter().cloned().enumerate() {
            let executor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| EngineError::configuration(format!("worker pool closed: {e}")))?;
                let result = executor.run_standalone(&item, deadline).await?;
                Ok::<_, EngineError>((index, result))
            });
        }

        let mut slots: Vec<Option<OperationResult>> = vec![None; items.len()];
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => {
                    let (index, result) = outcome?;
                    slots[index] = Some(result);
                }
                Err(e) => warn!("worker task failed: {e}"),
            }
        }

        // A slot left empty belongs to a worker that panicked.
        Ok(slots
            .into_iter()
            .zip(&items)
            .map(|(slot, item)| {
                slot.unwrap_or_else(|| {
                    OperationResult::failed(
                        item,
                        OperationError::new(ErrorKind::Abandoned, "worker task panicked"),
                    )
                })
            })
            .collect())
    }

    async fn run_sequence(
        &self,
        items: &[OperationItem],
        continue_on_error: bool,
        deadline: Duration,
    ) -> Result<Vec<OperationResult>> {
        let needs_outputs = items
            .iter()
            .any(|item| reference::has_references(&item.params));
        let mut outputs: HashMap<StepId, Value> = HashMap::new();
        let mut results = Vec::with_capacity(items.len());
        let mut first_failure: Option<String> = None;

        for item in items {
            if let Some(after) = &first_failure {
                if !continue_on_error {
                    results.push(OperationResult::skipped(item, after));
                    continue;
                }
            }

            let result = match reference::substitute(&item.params, &outputs) {
                Ok(params) => self.run_item(item, params, deadline).await?,
                Err(error) => OperationResult::failed(item, error),
            };

            if result.is_success() {
                if let (true, Some(id), Some(payload_ref)) =
                    (needs_outputs, &item.id, &result.payload_ref)
                {
                    let payload = self.shared.results.get(payload_ref).await?;
                    outputs.insert(StepId::new(id.clone()), payload);
                }
            } else if first_failure.is_none() {
                debug!("sequence item '{}' failed", item.label());
                first_failure = Some(item.label().to_string());
            }
            results.push(result);
        }
        Ok(results)
    }

    /// The per-item pipeline, on fully resolved params.
    async fn run_item(
        &self,
        item: &OperationItem,
        params: Map<String, Value>,
        deadline: Duration,
    ) -> Result<OperationResult> {
        let started = Instant::now();
        let mut result = self.pipeline(item, params, deadline).await?;
        result.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        Ok(result)
    }

    async fn pipeline(
        &self,
        item: &OperationItem,
        params: Map<String, Value>,
        deadline: Duration,
    ) -> Result<OperationResult> {
        let tool = match self.shared.registry.resolve(&item.action) {
            Action::Known(tool) => tool,
            Action::Unknown(name) => {
                return Ok(OperationResult::failed(
                    item,
                    OperationError::unknown_action(&name),
                ));
            }
        };
        let spec = tool.spec();

        if let Err(reason) = tool.validate(&params) {
            return Ok(OperationResult::failed(
                item,
                OperationError::new(ErrorKind::InvalidParams, reason),
            ));
        }

        let fingerprint = Fingerprint::compute(&item.action, &params);

        if spec.idempotent {
            if let Some(entry) = self.shared.cache.get(&fingerprint) {
                debug!("cache hit for '{}' ({})", item.action, fingerprint.short());
                let mut result = OperationResult::for_item(item, ItemStatus::CacheHit);
                result.payload_ref = Some(entry.payload_ref);
                return Ok(result);
            }
        }

        if item.admission.is_none() {
            if let Err(retry_after) = self.shared.limiter.acquire(&item.action).await {
                info!(
                    "'{}' rate limited, next token in {}ms",
                    item.action,
                    retry_after.as_millis()
                );
                let mut result = OperationResult::for_item(item, ItemStatus::RateLimited);
                result.error = Some(OperationError::new(
                    ErrorKind::RateLimited,
                    format!(
                        "no token for '{}' within the allowed wait; retry after {}ms",
                        item.action,
                        retry_after.as_millis()
                    ),
                ));
                return Ok(result);
            }
        }

        let (outcome, coalesced) = match self.shared.inflight.join_or_lead(&fingerprint) {
            Flight::Follower(follower) => {
                debug!("joining in-flight '{}' ({})", item.action, fingerprint.short());
                (follower.wait().await, true)
            }
            Flight::Leader(publisher) => {
                // The leader runs detached so a dropped caller never aborts a
                // started call.
                let shared = Arc::clone(&self.shared);
                let leader = tokio::spawn(shared.lead(
                    publisher,
                    tool,
                    spec.clone(),
                    fingerprint,
                    params,
                    deadline,
                ));
                let outcome = match leader.await {
                    Ok(outcome) => outcome?,
                    Err(e) => FlightOutcome::abandoned(&format!("executing task failed: {e}")),
                };
                (outcome, false)
            }
        };

        let mut result = match outcome.result {
            Ok(payload_ref) => {
                let status = if outcome.from_cache {
                    ItemStatus::CacheHit
                } else {
                    ItemStatus::Done
                };
                let mut result = OperationResult::for_item(item, status);
                result.payload_ref = Some(payload_ref);
                result
            }
            Err(error) => OperationResult::failed(item, error),
        };
        result.attempts = outcome.attempts;
        result.coalesced = coalesced;
        Ok(result)
    }
}

impl Shared {
    /// Executes as the guard's leader and publishes the outcome.
    async fn lead(
        self: Arc<Self>,
        publisher: inflight::Publisher,
        tool: Arc<dyn Tool>,
        spec: ToolSpec,
        fingerprint: Fingerprint,
        params: Map<String, Value>,
        deadline: Duration,
    ) -> Result<FlightOutcome> {
        // A previous leader may have filled the cache between our miss and
        // the guard creation.
        if spec.idempotent {
            if let Some(entry) = self.cache.get(&fingerprint) {
                let outcome = FlightOutcome {
                    result: Ok(entry.payload_ref),
                    attempts: 0,
                    from_cache: true,
                };
                publisher.publish(outcome.clone());
                return Ok(outcome);
            }
        }

        let (result, attempts) = self.call_with_retry(tool.as_ref(), &spec, params, deadline).await;

        let outcome = match result {
            Ok(payload) => {
                let payload_ref = self.results.put(payload).await?;
                if spec.idempotent {
                    self.cache.insert(
                        fingerprint,
                        payload_ref.clone(),
                        self.cache_config.ttl_for(&spec.category),
                    );
                }
                FlightOutcome {
                    result: Ok(payload_ref),
                    attempts,
                    from_cache: false,
                }
            }
            Err(error) => FlightOutcome {
                result: Err(error),
                attempts,
                from_cache: false,
            },
        };
        publisher.publish(outcome.clone());
        Ok(outcome)
    }

    async fn call_with_retry(
        &self,
        tool: &dyn Tool,
        spec: &ToolSpec,
        params: Map<String, Value>,
        deadline: Duration,
    ) -> (std::result::Result<Value, OperationError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let call_deadline = Instant::now() + deadline;
            let error = match tokio::time::timeout_at(
                call_deadline,
                tool.execute(params.clone(), call_deadline),
            )
            .await
            {
                Ok(Ok(payload)) => return (Ok(payload), attempts),
                Ok(Err(tool_error)) => {
                    let kind = match tool_error.kind {
                        ToolErrorKind::Transient => ErrorKind::Transient,
                        ToolErrorKind::Permanent => ErrorKind::Permanent,
                    };
                    OperationError::new(kind, tool_error.message)
                }
                Err(_) => OperationError::new(
                    ErrorKind::Timeout,
                    format!("'{}' exceeded its {}ms deadline", spec.name, deadline.as_millis()),
                ),
            };

            match self.retry.decide(&error, attempts, spec.idempotent) {
                RetryDecision::Retry { after } => {
                    warn!(
                        "'{}' attempt {} failed ({}); retrying in {}ms",
                        spec.name,
                        attempts,
                        error,
                        after.as_millis()
                    );
                    tokio::time::sleep(after).await;
                }
                RetryDecision::GiveUp => return (Err(error), attempts),
            }
        }
    }
}
