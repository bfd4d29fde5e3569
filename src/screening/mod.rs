//! Rubric screening: prompts out, normalized scores back, ranked results.
//!
//! Flow per request:
//! 1. Partition profiles into units (one profile, or a batch).
//! 2. Render a prompt per unit and make one LLM call.
//! 3. Normalize the response into one score per rubric item per profile.
//! 4. Aggregate, rank and optionally stream results as they complete.

pub mod aggregate;
pub mod dispatch;
pub mod evaluate;
pub mod normalize;
pub mod report;
pub mod runner;
pub mod stream;
pub mod types;

pub use aggregate::{actual_speedup, aggregate, per_profile_time_ms, rank_results};
pub use dispatch::{DispatchError, Dispatcher};
pub use evaluate::{
    complete_or_empty, evaluate, evaluate_batch, evaluate_concurrent, evaluate_concurrent_stream,
    evaluate_single, ConcurrentEvaluation, ConcurrentPlan, EvaluateRequest, EvaluationConfig,
    EvaluationError, ProfileEvaluated, ProfileObserver,
};
pub use normalize::{clamp_score, normalize_batch, normalize_single};
pub use report::{build_report, render_report_markdown, ReportOptions, ScreeningReport};
pub use runner::{run_all_rubrics, RunSummary};
pub use stream::{ChannelEventSink, EventSink, StreamError, StreamEvent, WriterEventSink};
pub use types::*;
