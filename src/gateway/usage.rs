//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every call through a UsageSink so the caller decides
//! where call records go:
//! - the server and CLI use TracingUsageSink
//! - tests use NoopUsageSink or a collecting sink of their own

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a provider API call for logging.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Provider name, e.g. "openai".
    pub provider: &'static str,
    /// Endpoint, e.g. "chat/completions".
    pub endpoint: &'static str,
    /// Model used.
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Evaluation run this call belongs to (if any).
    pub run_id: Option<Uuid>,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Provider request ID (for debugging).
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            run_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that emits each record as a structured tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        match record.status {
            CallStatus::Success => tracing::debug!(
                target: "screening_harness::usage",
                provider = record.provider,
                endpoint = record.endpoint,
                model = %record.model,
                tokens = record.input_tokens + record.output_tokens,
                latency_ms = record.latency_ms,
                caller = record.caller,
                run_id = ?record.run_id,
                status = record.status.as_str(),
                "provider call"
            ),
            CallStatus::Error => tracing::warn!(
                target: "screening_harness::usage",
                provider = record.provider,
                endpoint = record.endpoint,
                model = %record.model,
                caller = record.caller,
                run_id = ?record.run_id,
                status = record.status.as_str(),
                error_code = record.error_code.as_deref().unwrap_or("unknown"),
                request_id = record.request_id.as_deref().unwrap_or(""),
                "provider call failed"
            ),
        }
    }
}
