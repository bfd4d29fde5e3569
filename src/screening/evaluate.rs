//! Evaluation strategies: single profile, sequential, batched and dispatched.
//!
//! Every strategy follows the same path per unit of work:
//! prompt -> one LLM call -> normalize -> aggregate. LLM failures never
//! surface here; they become an empty response and therefore default scores.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::gateway::{Attribution, ChatGateway, ChatModel, ChatRequest};
use crate::prompts::{render_batch_prompt, render_profile_prompt};

use super::aggregate::{actual_speedup, aggregate, per_profile_time_ms, rank_results};
use super::dispatch::{DispatchError, Dispatcher, DEFAULT_DISPATCH_DELAY};
use super::normalize::{default_scores, normalize_batch, normalize_single};
use super::stream::{EventSink, StreamError, StreamEvent};
use super::types::*;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_SINGLE_MODEL: &str = "gpt-4";
pub const DEFAULT_BATCH_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

pub const DEFAULT_BATCH_SIZE: usize = 5;
/// Default for `/api/evaluate` in concurrency mode.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default for `/api/evaluate-concurrent`.
pub const DEFAULT_CONCURRENT_MAX_CONCURRENT: usize = 200;

pub const MAX_BATCH_SIZE: usize = 50;
pub const MAX_CONCURRENCY: usize = 256;

const EMPTY_RESPONSE: &str = "{}";
const UNKNOWN_NAME: &str = "Unknown";

// =============================================================================
// Config & errors
// =============================================================================

/// Model and pacing parameters shared by every strategy.
#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Model for single-profile prompts.
    pub single_model: String,
    /// Model for multi-profile prompts.
    pub batch_model: String,
    /// Temperature for single-profile prompts. Batch prompts use the provider default.
    pub temperature: f32,
    /// Output cap for single-profile prompts.
    pub max_tokens: u32,
    /// Pause after each dispatched unit completes.
    pub dispatch_delay: Duration,
    /// `batchSize` when a multi-profile request omits it.
    pub batch_size: usize,
    /// `maxConcurrent` when an `/api/evaluate` request omits it.
    pub max_concurrent: usize,
    /// Run these calls belong to, for usage attribution.
    pub run_id: Option<Uuid>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            single_model: DEFAULT_SINGLE_MODEL.to_string(),
            batch_model: DEFAULT_BATCH_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            dispatch_delay: DEFAULT_DISPATCH_DELAY,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            run_id: None,
        }
    }
}

impl EvaluationConfig {
    fn attribution(&self, caller: &'static str) -> Attribution {
        match self.run_id {
            Some(run_id) => Attribution::new(caller).with_run(run_id),
            None => Attribution::new(caller),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

fn invalid(message: impl Into<String>) -> EvaluationError {
    EvaluationError::InvalidRequest(message.into())
}

// =============================================================================
// Validation
// =============================================================================

pub fn validate_rubric(rubric: &Rubric) -> Result<(), EvaluationError> {
    if rubric.items.is_empty() {
        return Err(invalid("Rubric must contain at least one item"));
    }
    let mut seen = std::collections::HashSet::new();
    for item in &rubric.items {
        if item.id.trim().is_empty() {
            return Err(invalid("Rubric item ids must be non-empty"));
        }
        if !seen.insert(item.id.as_str()) {
            return Err(invalid(format!("Duplicate rubric item id: {}", item.id)));
        }
    }
    Ok(())
}

fn validate_profiles(profiles: &[Profile]) -> Result<(), EvaluationError> {
    if profiles.is_empty() {
        return Err(invalid("At least one profile is required"));
    }
    Ok(())
}

/// Zero is rejected; anything above `max` is clamped to it.
fn bounded(name: &str, value: usize, max: usize) -> Result<usize, EvaluationError> {
    if value == 0 {
        return Err(invalid(format!("{name} must be at least 1")));
    }
    Ok(value.min(max))
}

// =============================================================================
// Request parsing
// =============================================================================

/// Body of `/api/evaluate`: one profile or many.
#[derive(Debug, Clone)]
pub enum EvaluateRequest {
    Single(SingleEvaluationRequest),
    Multi(MultiEvaluationRequest),
}

impl EvaluateRequest {
    /// Pick the request shape from the keys present.
    pub fn from_value(value: Value) -> Result<Self, EvaluationError> {
        let has = |key: &str| value.get(key).is_some_and(|v| !v.is_null());

        if has("profile") && has("rubric") {
            serde_json::from_value(value)
                .map(Self::Single)
                .map_err(|e| invalid(format!("Invalid request body: {e}")))
        } else if has("profiles") && has("rubric") {
            serde_json::from_value(value)
                .map(Self::Multi)
                .map_err(|e| invalid(format!("Invalid request body: {e}")))
        } else {
            Err(invalid(
                "Invalid request format. Provide either {profile, rubric} or {profiles, rubric}",
            ))
        }
    }
}

/// A validated `/api/evaluate-concurrent` request with defaults applied.
#[derive(Debug, Clone)]
pub struct ConcurrentPlan {
    pub profiles: Vec<Profile>,
    pub rubric: Rubric,
    pub max_concurrent: usize,
    pub batch_size: usize,
}

impl ConcurrentPlan {
    pub fn new(request: ConcurrentEvaluationRequest) -> Result<Self, EvaluationError> {
        validate_profiles(&request.profiles)?;
        validate_rubric(&request.rubric)?;
        let max_concurrent = bounded(
            "maxConcurrent",
            request
                .max_concurrent
                .unwrap_or(DEFAULT_CONCURRENT_MAX_CONCURRENT),
            MAX_CONCURRENCY,
        )?;
        let batch_size = bounded(
            "batchSize",
            request.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            MAX_BATCH_SIZE,
        )?;
        Ok(Self {
            profiles: request.profiles,
            rubric: request.rubric,
            max_concurrent,
            batch_size,
        })
    }
}

// =============================================================================
// Units of work
// =============================================================================

/// Send one request; any failure becomes an empty JSON object.
pub async fn complete_or_empty(gateway: &dyn ChatGateway, request: ChatRequest) -> String {
    let caller = request.attribution.caller;
    match gateway.chat(request).await {
        Ok(resp) => {
            if resp.finish_reason.is_truncated() {
                warn!(
                    caller,
                    output_tokens = resp.output_tokens,
                    "LLM response hit the token limit; missing scores will default"
                );
            }
            debug!(caller, body = %resp.content, "LLM response");
            resp.content
        }
        Err(err) => {
            warn!(caller, error = %err, code = err.code(), "LLM call failed; assigning default scores");
            EMPTY_RESPONSE.to_string()
        }
    }
}

/// One profile, every rubric item, one call.
async fn evaluate_profile_unit(
    gateway: &dyn ChatGateway,
    profile: &Profile,
    rubric: &Rubric,
    config: &EvaluationConfig,
) -> EvaluationResult {
    let prompt = render_profile_prompt(profile, rubric);
    let request = ChatRequest::new(
        ChatModel::openai(&config.single_model),
        prompt.to_messages(),
        config.attribution("screening::single"),
    )
    .temperature(config.temperature)
    .max_tokens(config.max_tokens);

    let raw = complete_or_empty(gateway, request).await;
    let scores = normalize_single(&raw, rubric);
    aggregate(&profile.id, rubric, scores, Utc::now())
}

/// Several profiles, every rubric item, one call. Results follow input order.
async fn evaluate_batch_unit(
    gateway: &dyn ChatGateway,
    profiles: &[Profile],
    rubric: &Rubric,
    config: &EvaluationConfig,
) -> Vec<EvaluationResult> {
    let prompt = render_batch_prompt(profiles, rubric);
    let request = ChatRequest::new(
        ChatModel::openai(&config.batch_model),
        prompt.to_messages(),
        config.attribution("screening::batch"),
    );

    let raw = complete_or_empty(gateway, request).await;
    let evaluated_at = Utc::now();
    normalize_batch(&raw, rubric, profiles.len())
        .into_iter()
        .zip(profiles)
        .map(|(scores, profile)| aggregate(&profile.id, rubric, scores, evaluated_at))
        .collect()
}

fn display_name(profile: &Profile) -> String {
    if profile.name.is_empty() {
        UNKNOWN_NAME.to_string()
    } else {
        profile.name.clone()
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

// =============================================================================
// Single & sequential strategies
// =============================================================================

/// Evaluate one profile with an all-items prompt.
pub async fn evaluate_single(
    gateway: &dyn ChatGateway,
    request: SingleEvaluationRequest,
    config: &EvaluationConfig,
) -> Result<SingleEvaluationResponse, EvaluationError> {
    validate_rubric(&request.rubric)?;
    info!(profile = %request.profile.name, "evaluating single profile");

    let result = evaluate_profile_unit(gateway, &request.profile, &request.rubric, config).await;
    Ok(SingleEvaluationResponse {
        result,
        profile_name: display_name(&request.profile),
        optimization: Optimization::PromptRedesign,
        profile_count: 1,
    })
}

/// Evaluate all profiles in one batched call.
pub async fn evaluate_batch(
    gateway: &dyn ChatGateway,
    request: BatchEvaluationRequest,
    config: &EvaluationConfig,
) -> Result<BatchEvaluationResponse, EvaluationError> {
    validate_profiles(&request.profiles)?;
    validate_rubric(&request.rubric)?;

    let mut results =
        evaluate_batch_unit(gateway, &request.profiles, &request.rubric, config).await;
    rank_results(&mut results);

    Ok(BatchEvaluationResponse {
        results,
        batch_size: request.profiles.len(),
        optimization: Optimization::Batching,
    })
}

/// `/api/evaluate`: dispatch on request shape and optimization.
pub async fn evaluate(
    gateway: Arc<dyn ChatGateway>,
    request: EvaluateRequest,
    config: &EvaluationConfig,
) -> Result<EvaluateResponse, EvaluationError> {
    match request {
        EvaluateRequest::Single(req) => evaluate_single(gateway.as_ref(), req, config)
            .await
            .map(EvaluateResponse::Single),
        EvaluateRequest::Multi(req) => evaluate_multi(gateway, req, config)
            .await
            .map(EvaluateResponse::Multi),
    }
}

async fn evaluate_multi(
    gateway: Arc<dyn ChatGateway>,
    request: MultiEvaluationRequest,
    config: &EvaluationConfig,
) -> Result<MultiEvaluationResponse, EvaluationError> {
    validate_profiles(&request.profiles)?;
    validate_rubric(&request.rubric)?;

    let profile_count = request.profiles.len();
    let optimization = request.optimization.resolve(profile_count);
    info!(
        profiles = profile_count,
        optimization = optimization.as_str(),
        "evaluating profiles"
    );

    match optimization {
        Optimization::PromptRedesign => {
            let start = Instant::now();
            let mut results = Vec::with_capacity(profile_count);
            for (i, profile) in request.profiles.iter().enumerate() {
                debug!(profile = i + 1, of = profile_count, name = %profile.name, "sequential evaluation");
                results.push(
                    evaluate_profile_unit(gateway.as_ref(), profile, &request.rubric, config).await,
                );
            }
            rank_results(&mut results);

            Ok(MultiEvaluationResponse {
                results,
                total_time: elapsed_ms(start),
                profile_count,
                optimization,
                batch_size: None,
                total_api_calls: Some(profile_count),
                average_profiles_per_call: None,
                max_concurrent: None,
                actual_speedup: None,
            })
        }
        Optimization::Batching => {
            let batch_size = bounded(
                "batchSize",
                request.batch_size.unwrap_or(config.batch_size),
                MAX_BATCH_SIZE,
            )?;
            let start = Instant::now();
            let mut results = Vec::with_capacity(profile_count);
            let mut total_api_calls = 0usize;
            for (i, chunk) in request.profiles.chunks(batch_size).enumerate() {
                info!(batch = i + 1, profiles = chunk.len(), "processing batch");
                results.extend(
                    evaluate_batch_unit(gateway.as_ref(), chunk, &request.rubric, config).await,
                );
                total_api_calls += 1;
            }
            rank_results(&mut results);

            Ok(MultiEvaluationResponse {
                results,
                total_time: elapsed_ms(start),
                profile_count,
                optimization,
                batch_size: Some(batch_size),
                total_api_calls: Some(total_api_calls),
                average_profiles_per_call: Some(profile_count as f64 / total_api_calls as f64),
                max_concurrent: None,
                actual_speedup: None,
            })
        }
        Optimization::Concurrency | Optimization::Auto => {
            let max_concurrent = bounded(
                "maxConcurrent",
                request.max_concurrent.unwrap_or(config.max_concurrent),
                MAX_CONCURRENCY,
            )?;
            let evaluation = run_dispatched(
                gateway,
                request.profiles,
                request.rubric,
                config,
                max_concurrent,
                UnitShape::PerProfile,
                None,
                None,
            )
            .await?;
            let mut results = evaluation.results;
            rank_results(&mut results);

            Ok(MultiEvaluationResponse {
                results,
                total_time: evaluation.total_time_ms,
                profile_count,
                optimization: Optimization::Concurrency,
                batch_size: None,
                total_api_calls: None,
                average_profiles_per_call: None,
                max_concurrent: Some(max_concurrent),
                actual_speedup: Some(evaluation.actual_speedup),
            })
        }
    }
}

// =============================================================================
// Dispatched strategy
// =============================================================================

/// A profile finished evaluating during a dispatched run.
#[derive(Debug, Clone)]
pub struct ProfileEvaluated {
    /// Position in the submitted profile list.
    pub index: usize,
    pub profile_id: String,
    pub profile_name: String,
    pub evaluation_time_ms: u64,
    /// Profiles completed so far, this one included.
    pub completed: usize,
    pub total: usize,
    pub result: EvaluationResult,
}

/// Receives each completed profile, in completion order, from a single owner.
pub trait ProfileObserver: Send + Sync {
    fn on_profile(&self, event: &ProfileEvaluated) -> Result<(), StreamError>;
}

/// Outcome of a dispatched run.
#[derive(Debug, Clone)]
pub struct ConcurrentEvaluation {
    /// Results in completion order.
    pub results: Vec<EvaluationResult>,
    pub total_time_ms: u64,
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub actual_speedup: f64,
    /// True if the run stopped early; `results` then holds only what finished.
    pub cancelled: bool,
}

impl ConcurrentEvaluation {
    /// Aggregate response, ranked by average score.
    pub fn into_response(self) -> ConcurrentEvaluationResponse {
        let mut results = self.results;
        rank_results(&mut results);
        ConcurrentEvaluationResponse {
            results,
            total_time: self.total_time_ms,
            max_concurrent: self.max_concurrent,
            actual_speedup: self.actual_speedup,
            optimization: Optimization::Concurrency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitShape {
    /// Single-profile prompts.
    PerProfile,
    /// Multi-profile prompts of up to n profiles.
    Batch(usize),
}

impl UnitShape {
    fn size(self) -> usize {
        match self {
            UnitShape::PerProfile => 1,
            UnitShape::Batch(n) => n.max(1),
        }
    }
}

#[derive(Clone)]
struct CancelFlags {
    external: Option<Arc<AtomicBool>>,
    abort: Arc<AtomicBool>,
}

impl CancelFlags {
    fn is_set(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
            || self
                .external
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

struct UnitOutcome {
    results: Vec<EvaluationResult>,
    elapsed_ms: u64,
}

/// Evaluate a validated plan with batched units through the dispatcher.
pub async fn evaluate_concurrent(
    gateway: Arc<dyn ChatGateway>,
    plan: ConcurrentPlan,
    config: &EvaluationConfig,
    observer: Option<&dyn ProfileObserver>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<ConcurrentEvaluation, EvaluationError> {
    let shape = UnitShape::Batch(plan.batch_size);
    run_dispatched(
        gateway,
        plan.profiles,
        plan.rubric,
        config,
        plan.max_concurrent,
        shape,
        observer,
        cancel,
    )
    .await
}

struct SinkObserver<'a> {
    sink: &'a dyn EventSink,
}

impl ProfileObserver for SinkObserver<'_> {
    fn on_profile(&self, event: &ProfileEvaluated) -> Result<(), StreamError> {
        self.sink.emit(StreamEvent::Result {
            index: event.index,
            profile_id: event.profile_id.clone(),
            profile_name: event.profile_name.clone(),
            evaluation_time: event.evaluation_time_ms,
            completed: event.completed,
            total: event.total,
            result: event.result.clone(),
        })
    }
}

/// Like [`evaluate_concurrent`], emitting `start`, one `result` per profile
/// and a terminal `done` or `error` event.
pub async fn evaluate_concurrent_stream(
    gateway: Arc<dyn ChatGateway>,
    plan: ConcurrentPlan,
    config: &EvaluationConfig,
    sink: &dyn EventSink,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<ConcurrentEvaluation, EvaluationError> {
    sink.emit(StreamEvent::Start {
        total: plan.profiles.len(),
        max_concurrent: plan.max_concurrent,
        batch_size: plan.batch_size,
    })?;

    let observer = SinkObserver { sink };
    match evaluate_concurrent(gateway, plan, config, Some(&observer), cancel).await {
        Ok(evaluation) if !evaluation.cancelled => {
            sink.emit(StreamEvent::Done {
                total_time: evaluation.total_time_ms,
                max_concurrent: evaluation.max_concurrent,
                actual_speedup: evaluation.actual_speedup,
            })?;
            Ok(evaluation)
        }
        Ok(evaluation) => {
            sink.emit(StreamEvent::Error {
                message: "Evaluation cancelled".to_string(),
            })?;
            Ok(evaluation)
        }
        Err(err @ EvaluationError::Stream(_)) => Err(err),
        Err(err) => {
            let _ = sink.emit(StreamEvent::Error {
                message: err.to_string(),
            });
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_dispatched(
    gateway: Arc<dyn ChatGateway>,
    profiles: Vec<Profile>,
    rubric: Rubric,
    config: &EvaluationConfig,
    max_concurrent: usize,
    shape: UnitShape,
    observer: Option<&dyn ProfileObserver>,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<ConcurrentEvaluation, EvaluationError> {
    let started = Instant::now();
    let total = profiles.len();
    let unit_size = shape.size();
    let total_units = total.div_ceil(unit_size);

    let profiles = Arc::new(profiles);
    let rubric = Arc::new(rubric);
    let unit_config = Arc::new(config.clone());
    let abort = Arc::new(AtomicBool::new(false));
    let flags = CancelFlags {
        external: cancel,
        abort: Arc::clone(&abort),
    };
    let dispatcher = Dispatcher::new(max_concurrent, config.dispatch_delay);

    info!(
        profiles = total,
        units = total_units,
        unit_size,
        max_concurrent,
        "starting dispatched evaluation"
    );

    // Units are queued in submission order as the iterator is collected.
    let mut pending: FuturesUnordered<_> = (0..total)
        .step_by(unit_size)
        .map(|start| {
            let end = (start + unit_size).min(total);
            let gateway = Arc::clone(&gateway);
            let profiles = Arc::clone(&profiles);
            let rubric = Arc::clone(&rubric);
            let config = Arc::clone(&unit_config);
            let flags = flags.clone();

            let unit = async move {
                if flags.is_set() {
                    return None;
                }
                let unit_no = start / unit_size + 1;
                let chunk = &profiles[start..end];
                debug!(batch = unit_no, of = total_units, profiles = chunk.len(), "starting unit");

                let unit_start = Instant::now();
                let results = match shape {
                    UnitShape::PerProfile => {
                        let mut out = Vec::with_capacity(chunk.len());
                        for profile in chunk {
                            out.push(
                                evaluate_profile_unit(gateway.as_ref(), profile, &rubric, &config)
                                    .await,
                            );
                        }
                        out
                    }
                    UnitShape::Batch(_) => {
                        evaluate_batch_unit(gateway.as_ref(), chunk, &rubric, &config).await
                    }
                };
                let elapsed_ms = elapsed_ms(unit_start);
                info!(batch = unit_no, of = total_units, elapsed_ms, "completed unit");

                Some(UnitOutcome {
                    results,
                    elapsed_ms,
                })
            };

            dispatcher
                .execute(unit)
                .map(move |outcome| (start, end, outcome))
        })
        .collect();

    let mut results = Vec::with_capacity(total);
    let mut times = Vec::with_capacity(total);
    let mut completed = 0usize;
    let mut cancelled = false;

    while let Some((start, end, outcome)) = pending.next().await {
        if flags.is_set() {
            cancelled = true;
            break;
        }

        let outcome = match outcome {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                cancelled = true;
                break;
            }
            Err(err) => {
                warn!(error = %err, start, end, "unit failed; assigning default scores");
                let evaluated_at = Utc::now();
                UnitOutcome {
                    results: profiles[start..end]
                        .iter()
                        .map(|p| aggregate(&p.id, &rubric, default_scores(&rubric), evaluated_at))
                        .collect(),
                    elapsed_ms: 0,
                }
            }
        };

        let evaluation_time_ms = per_profile_time_ms(outcome.elapsed_ms, outcome.results.len());
        for (offset, result) in outcome.results.into_iter().enumerate() {
            let index = start + offset;
            completed += 1;
            let event = ProfileEvaluated {
                index,
                profile_id: result.profile_id.clone(),
                profile_name: display_name(&profiles[index]),
                evaluation_time_ms,
                completed,
                total,
                result,
            };

            if let Some(observer) = observer {
                if let Err(err) = observer.on_profile(&event) {
                    abort.store(true, Ordering::SeqCst);
                    warn!(error = %err, "observer failed; aborting evaluation");
                    return Err(err.into());
                }
            }

            times.push(evaluation_time_ms);
            results.push(event.result);
        }
    }

    if cancelled {
        abort.store(true, Ordering::SeqCst);
        info!(completed, total, "dispatched evaluation cancelled");
    }

    let total_time_ms = elapsed_ms(started);
    let speedup = actual_speedup(times, total_time_ms);
    info!(
        profiles = completed,
        total_time_ms,
        speedup,
        "dispatched evaluation finished"
    );

    Ok(ConcurrentEvaluation {
        results,
        total_time_ms,
        max_concurrent: dispatcher.max_concurrent(),
        batch_size: unit_size,
        actual_speedup: speedup,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ChatResponse, FinishReason, ProviderError};
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedGateway {
        reply: Result<String, ()>,
        finish_reason: FinishReason,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedGateway {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                finish_reason: FinishReason::Stop,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn truncated(reply: &str) -> Self {
            Self {
                finish_reason: FinishReason::Length,
                ..Self::replying(reply)
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                finish_reason: FinishReason::Stop,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ChatGateway for ScriptedGateway {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.requests.lock().unwrap().push(req);
            match &self.reply {
                Ok(content) => Ok(ChatResponse {
                    content: content.clone(),
                    input_tokens: 1,
                    output_tokens: 1,
                    latency: Duration::from_millis(1),
                    finish_reason: self.finish_reason.clone(),
                    request_id: None,
                }),
                Err(()) => Err(ProviderError::provider("openai", "boom")),
            }
        }
    }

    fn rubric() -> Rubric {
        serde_json::from_value(json!({
            "id": "r1",
            "title": "Backend",
            "items": [
                {"id": "a", "description": "A", "scoreDescriptions": {}},
                {"id": "b", "description": "B", "scoreDescriptions": {}}
            ]
        }))
        .unwrap()
    }

    fn profiles(n: usize) -> Vec<Profile> {
        (0..n)
            .map(|i| Profile {
                id: format!("p{i}"),
                name: format!("Person {i}"),
                ..Default::default()
            })
            .collect()
    }

    fn fast_config() -> EvaluationConfig {
        EvaluationConfig {
            dispatch_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn request_shape_is_picked_from_keys() {
        let single = EvaluateRequest::from_value(json!({
            "profile": {"name": "A"},
            "rubric": {"id": "r", "items": []}
        }))
        .unwrap();
        assert!(matches!(single, EvaluateRequest::Single(_)));

        let multi = EvaluateRequest::from_value(json!({
            "profiles": [],
            "rubric": {"id": "r", "items": []},
            "optimization": "batching"
        }))
        .unwrap();
        match multi {
            EvaluateRequest::Multi(m) => assert_eq!(m.optimization, Optimization::Batching),
            other => panic!("unexpected {other:?}"),
        }

        assert!(EvaluateRequest::from_value(json!({"rubric": {}})).is_err());
        assert!(EvaluateRequest::from_value(json!({
            "profiles": [],
            "rubric": {"id": "r"},
            "optimization": "warp"
        }))
        .is_err());
    }

    #[test]
    fn rubric_validation_rejects_empty_and_duplicate_items() {
        let mut r = rubric();
        assert!(validate_rubric(&r).is_ok());
        r.items[1].id = "a".into();
        assert!(validate_rubric(&r).is_err());
        r.items.clear();
        assert!(validate_rubric(&r).is_err());
    }

    #[test]
    fn concurrent_plan_applies_defaults_and_bounds() {
        let plan = ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: profiles(2),
            rubric: rubric(),
            max_concurrent: None,
            batch_size: None,
        })
        .unwrap();
        assert_eq!(plan.max_concurrent, DEFAULT_CONCURRENT_MAX_CONCURRENT);
        assert_eq!(plan.batch_size, DEFAULT_BATCH_SIZE);

        let err = ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: profiles(2),
            rubric: rubric(),
            max_concurrent: Some(1),
            batch_size: Some(0),
        })
        .unwrap_err();
        assert!(err.to_string().contains("batchSize"));

        let plan = ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: profiles(2),
            rubric: rubric(),
            max_concurrent: Some(MAX_CONCURRENCY + 44),
            batch_size: Some(MAX_BATCH_SIZE * 2),
        })
        .unwrap();
        assert_eq!(plan.max_concurrent, MAX_CONCURRENCY);
        assert_eq!(plan.batch_size, MAX_BATCH_SIZE);

        assert!(ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: vec![],
            rubric: rubric(),
            max_concurrent: None,
            batch_size: None,
        })
        .is_err());
    }

    #[tokio::test]
    async fn single_profile_uses_single_model_params() {
        let gateway = ScriptedGateway::replying(r#"{"a":{"score":4,"explanation":"ok"}}"#);
        let resp = evaluate_single(
            &gateway,
            SingleEvaluationRequest {
                profile: profiles(1).remove(0),
                rubric: rubric(),
            },
            &fast_config(),
        )
        .await
        .unwrap();

        assert_eq!(resp.result.scores.len(), 2);
        assert_eq!(resp.result.total_score, 7);
        assert_eq!(resp.optimization, Optimization::PromptRedesign);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].model.model_id(), DEFAULT_SINGLE_MODEL);
        assert_eq!(requests[0].temperature, Some(DEFAULT_TEMPERATURE));
        assert_eq!(requests[0].max_tokens, Some(DEFAULT_MAX_TOKENS));
    }

    #[tokio::test]
    async fn truncated_completion_still_scores_every_item() {
        let cut = r#"{"a":{"score":5,"explanation":"ok"},"b":{"sco"#;
        let gateway = ScriptedGateway::truncated(cut);
        let request = ChatRequest::new(
            ChatModel::openai(DEFAULT_SINGLE_MODEL),
            vec![],
            Attribution::new("test"),
        );
        assert_eq!(complete_or_empty(&gateway, request).await, cut);

        let resp = evaluate_single(
            &gateway,
            SingleEvaluationRequest {
                profile: profiles(1).remove(0),
                rubric: rubric(),
            },
            &fast_config(),
        )
        .await
        .unwrap();
        assert_eq!(resp.result.scores.len(), 2);
        assert!(resp.result.scores.iter().all(|s| (1..=5).contains(&s.score)));
    }

    #[tokio::test]
    async fn provider_failure_yields_default_scores() {
        let gateway = ScriptedGateway::failing();
        let resp = evaluate_batch(
            &gateway,
            BatchEvaluationRequest {
                profiles: profiles(3),
                rubric: rubric(),
            },
            &fast_config(),
        )
        .await
        .unwrap();

        assert_eq!(resp.results.len(), 3);
        assert_eq!(resp.batch_size, 3);
        for result in &resp.results {
            assert!(result.scores.iter().all(|s| s.score == 3));
            assert_eq!(result.average_score, 3.0);
        }
        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model.model_id(), DEFAULT_BATCH_MODEL);
        assert_eq!(requests[0].temperature, None);
    }

    #[tokio::test]
    async fn batching_mode_counts_api_calls() {
        let gateway: Arc<dyn ChatGateway> = Arc::new(ScriptedGateway::replying("{}"));
        let resp = evaluate(
            gateway,
            EvaluateRequest::Multi(MultiEvaluationRequest {
                profiles: profiles(7),
                rubric: rubric(),
                optimization: Optimization::Auto,
                batch_size: Some(3),
                max_concurrent: None,
            }),
            &fast_config(),
        )
        .await
        .unwrap();

        let EvaluateResponse::Multi(resp) = resp else {
            panic!("expected multi response");
        };
        assert_eq!(resp.optimization, Optimization::Batching);
        assert_eq!(resp.total_api_calls, Some(3));
        assert_eq!(resp.results.len(), 7);
        assert_eq!(resp.average_profiles_per_call, Some(7.0 / 3.0));
    }

    #[tokio::test]
    async fn concurrency_mode_evaluates_each_profile() {
        let scripted = Arc::new(ScriptedGateway::replying(
            r#"{"a":{"score":5,"explanation":"x"},"b":{"score":5,"explanation":"y"}}"#,
        ));
        let gateway: Arc<dyn ChatGateway> = scripted.clone();
        let resp = evaluate(
            gateway,
            EvaluateRequest::Multi(MultiEvaluationRequest {
                profiles: profiles(2),
                rubric: rubric(),
                optimization: Optimization::Concurrency,
                batch_size: None,
                max_concurrent: Some(2),
            }),
            &fast_config(),
        )
        .await
        .unwrap();

        let EvaluateResponse::Multi(resp) = resp else {
            panic!("expected multi response");
        };
        assert_eq!(resp.max_concurrent, Some(2));
        assert!(resp.actual_speedup.is_some());
        assert!(resp.results.iter().all(|r| r.total_score == 10));
        assert_eq!(scripted.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn preset_cancel_flag_skips_all_calls() {
        let scripted = Arc::new(ScriptedGateway::replying("{}"));
        let gateway: Arc<dyn ChatGateway> = scripted.clone();
        let plan = ConcurrentPlan::new(ConcurrentEvaluationRequest {
            profiles: profiles(4),
            rubric: rubric(),
            max_concurrent: Some(2),
            batch_size: Some(1),
        })
        .unwrap();

        let cancel = Arc::new(AtomicBool::new(true));
        let evaluation = evaluate_concurrent(gateway, plan, &fast_config(), None, Some(cancel))
            .await
            .unwrap();

        assert!(evaluation.cancelled);
        assert!(evaluation.results.is_empty());
        assert!(scripted.requests.lock().unwrap().is_empty());
    }
}
