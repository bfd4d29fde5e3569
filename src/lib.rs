#![forbid(unsafe_code)]

//! # screening-harness
//!
//! Score candidate profiles against user-defined rubrics with an LLM.
//!
//! A rubric is a list of items, each with five level descriptions. For every
//! profile the harness asks a chat model for a 1-5 score and a short
//! explanation per item, normalizes whatever comes back (fenced JSON, missing
//! items, out-of-range numbers) into exactly one score per item, then
//! aggregates and ranks. Profiles can be sent one per prompt or several per
//! prompt, and prompts can be issued sequentially or through a bounded
//! dispatcher that streams results as they complete.
//!
//! A failed or garbled LLM call never fails a run: affected items get the
//! neutral default score instead.

pub mod config;
pub mod gateway;
pub mod logging;
pub mod profiles;
pub mod prompts;
pub mod screening;
pub mod server;
pub mod state;

pub use config::{ConfigError, Settings};
pub use gateway::{Attribution, ChatGateway, ProviderError, ProviderGateway, UsageSink};
pub use profiles::{load_profiles, ProfileLoadError};
pub use screening::{
    evaluate, evaluate_batch, evaluate_concurrent, evaluate_concurrent_stream, evaluate_single,
    EvaluationConfig, EvaluationError, EvaluationResult, Profile, Rubric,
};
pub use state::{AppState, StateError};
