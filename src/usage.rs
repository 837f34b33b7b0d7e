//! Token and cost accounting shared by every model-backed call.
//!
//! Stages and judges call the completion capability through [`MeteredClient`], which applies
//! the per-call timeout and feeds a [`UsageMeter`]. The meter's [`UsageRecord`] is what ends
//! up in the run's append-only cost ledger.

use crate::error::ApiError;
use crate::provider::{Completion, CompletionClient, ModelHint, ModelsConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Usage of one stage execution or one evaluation tier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub source: String,
    pub calls: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Aggregated tokens and cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub tokens: u64,
    pub cost_usd: f64,
}

impl CostSummary {
    pub fn add(&mut self, record: &UsageRecord) {
        self.tokens += record.total_tokens();
        self.cost_usd += record.cost_usd;
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        let mut summary = Self::default();
        for record in records {
            summary.add(record);
        }
        summary
    }

    /// Difference since an earlier snapshot of the same accumulating counters.
    pub fn since(&self, earlier: &CostSummary) -> CostSummary {
        CostSummary {
            tokens: self.tokens.saturating_sub(earlier.tokens),
            cost_usd: (self.cost_usd - earlier.cost_usd).max(0.0),
        }
    }
}

/// Accumulates usage across the calls of one stage or tier.
#[derive(Debug)]
pub struct UsageMeter {
    source: String,
    started: Instant,
    calls: u32,
    prompt_tokens: u64,
    completion_tokens: u64,
    cost_usd: f64,
}

impl UsageMeter {
    pub fn start(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            started: Instant::now(),
            calls: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
        }
    }

    pub fn record(&mut self, completion: &Completion, cost_usd: f64) {
        self.calls += 1;
        self.prompt_tokens += u64::from(completion.usage.prompt_tokens);
        self.completion_tokens += u64::from(completion.usage.completion_tokens);
        self.cost_usd += cost_usd;
    }

    pub fn finish(self) -> UsageRecord {
        UsageRecord {
            source: self.source,
            calls: self.calls,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            cost_usd: self.cost_usd,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Completion client wrapper applying the call timeout and pricing.
#[derive(Clone)]
pub struct MeteredClient {
    client: Arc<dyn CompletionClient>,
    models: ModelsConfig,
    call_timeout: Duration,
}

impl MeteredClient {
    pub fn new(client: Arc<dyn CompletionClient>, models: ModelsConfig, call_timeout: Duration) -> Self {
        Self {
            client,
            models,
            call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub async fn complete(
        &self,
        meter: &mut UsageMeter,
        prompt: &str,
        hint: ModelHint,
    ) -> Result<Completion, ApiError> {
        self.complete_within(meter, prompt, hint, self.call_timeout).await
    }

    /// Like [`MeteredClient::complete`] with a caller-chosen timeout. The meter stays with the
    /// caller, so a timeout never discards usage booked by earlier calls.
    pub async fn complete_within(
        &self,
        meter: &mut UsageMeter,
        prompt: &str,
        hint: ModelHint,
        timeout: Duration,
    ) -> Result<Completion, ApiError> {
        let completion = tokio::time::timeout(timeout, self.client.complete(prompt, hint))
            .await
            .map_err(|_| {
                ApiError::ProviderTimeout(format!(
                    "{} call exceeded {}ms",
                    hint.as_str(),
                    timeout.as_millis()
                ))
            })??;
        let cost = self.models.cost(hint, &completion.usage);
        meter.record(&completion, cost);
        debug!(
            source = %meter.source,
            provider = %self.client.provider_name(),
            model = %completion.model,
            prompt_tokens = completion.usage.prompt_tokens,
            completion_tokens = completion.usage.completion_tokens,
            cost_usd = cost,
            "Completion recorded"
        );
        Ok(completion)
    }
}
